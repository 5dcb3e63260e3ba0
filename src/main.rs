//! Bot entry point.

use tracing::error;

#[tokio::main]
async fn main() {
    // Respects RUST_LOG, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dogbot::run().await {
        error!(error = %e, "bot stopped");
        std::process::exit(1);
    }
}
