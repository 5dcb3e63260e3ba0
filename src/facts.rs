//! Random dog facts from the public dog API.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const FACT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FactError {
    #[error("fact request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fact service answered {0}")]
    Status(u16),
    #[error("malformed fact response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("fact response contained no facts")]
    Empty,
}

#[derive(Deserialize)]
struct FactsResponse {
    data: Vec<FactData>,
}

#[derive(Deserialize)]
struct FactData {
    attributes: FactAttributes,
}

#[derive(Deserialize)]
struct FactAttributes {
    body: String,
}

/// Pull `data[0].attributes.body` out of a response body.
pub fn parse_fact(body: &str) -> Result<String, FactError> {
    let response: FactsResponse = serde_json::from_str(body)?;
    response
        .data
        .into_iter()
        .next()
        .map(|d| d.attributes.body)
        .ok_or(FactError::Empty)
}

#[derive(Debug, Clone)]
pub struct FactClient {
    http: reqwest::Client,
    url: String,
}

impl FactClient {
    pub fn new(url: impl Into<String>) -> Result<Self, FactError> {
        let http = reqwest::Client::builder().timeout(FACT_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<String, FactError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FactError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        debug!(bytes = body.len(), "fetched dog fact");
        parse_fact(&body)
    }
}
