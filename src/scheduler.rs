//! Periodic spawning.
//!
//! One timer serves every guild: after a random delay, [`SpawnScheduler::tick`]
//! walks all registered scopes and announces a freshly drawn dog in each
//! empty one. Channels the bot can no longer use are deregistered as they are
//! discovered.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bot::BotContext;
use crate::catalog::EntityDefinition;
use crate::chat::{send_with_media, ChatClient, ChatError, Media};
use crate::spawn::{ActiveSpawn, Scope};
use crate::types::CreateMessage;

/// Counters from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    /// Scopes that already held (or were announcing) a spawn.
    pub skipped_active: usize,
    /// Scopes removed because the bot lost access.
    pub deregistered: usize,
    /// Scopes skipped for missing channels or transient errors.
    pub failed: usize,
}

/// The announcement text for `entity`.
pub fn spawn_text(entity: &EntityDefinition) -> String {
    format!(
        "A {} {} has spawned! Type 'dog' to catch it!",
        entity.emoji, entity.name
    )
}

/// Post the spawn announcement for `entity` in `scope`.
///
/// Does not touch the spawn table; callers decide how the result is
/// recorded.
pub async fn announce_spawn<C: ChatClient>(
    ctx: &BotContext<C>,
    scope: &Scope,
    entity: &EntityDefinition,
) -> Result<ActiveSpawn, ChatError> {
    let media = Media::from_ref(&entity.image).await;
    let msg = CreateMessage::new().content(spawn_text(entity));
    let sent = send_with_media(&ctx.chat, &scope.channel_id, msg, media).await?;

    let spawned_at = sent.created_at().unwrap_or_else(chrono::Utc::now);
    Ok(ActiveSpawn {
        entity: entity.clone(),
        spawned_at,
        channel_id: sent.channel_id,
        message_id: sent.id,
    })
}

pub struct SpawnScheduler<C> {
    ctx: Arc<BotContext<C>>,
}

impl<C: ChatClient + 'static> SpawnScheduler<C> {
    pub fn new(ctx: Arc<BotContext<C>>) -> Self {
        Self { ctx }
    }

    /// Sleep a random interval, tick, repeat. Never returns.
    pub async fn run(self) {
        let interval = self.ctx.config.spawn_interval;
        info!(
            min_secs = interval.min.as_secs(),
            max_secs = interval.max.as_secs(),
            "spawn scheduler started"
        );
        loop {
            let delay = interval.sample(&mut rand::thread_rng());
            debug!(delay_secs = delay.as_secs(), "next spawn pass scheduled");
            tokio::time::sleep(delay).await;

            let report = self.tick().await;
            debug!(?report, "spawn pass finished");
        }
    }

    /// One pass over every registered scope.
    pub async fn tick(&self) -> TickReport {
        let ctx = &*self.ctx;
        let mut report = TickReport::default();

        let scopes = match ctx.store.all_scopes() {
            Ok(scopes) => scopes,
            Err(e) => {
                error!(error = %e, "failed to list catching channels");
                return report;
            }
        };

        for scope in scopes {
            if ctx.spawns.is_occupied(&scope) {
                report.skipped_active += 1;
                continue;
            }

            match ctx.chat.channel_access(&scope.channel_id).await {
                Ok(access) if access.can_post() => {}
                Ok(_) | Err(ChatError::PermissionDenied) => {
                    self.deregister(&scope);
                    report.deregistered += 1;
                    continue;
                }
                Err(ChatError::NotFound) => {
                    debug!(%scope, "catching channel not found, skipping");
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(%scope, error = %e, "could not check catching channel");
                    report.failed += 1;
                    continue;
                }
            }

            if !ctx.spawns.reserve(&scope) {
                report.skipped_active += 1;
                continue;
            }

            let entity = ctx.catalog.pick_random(&mut rand::thread_rng()).clone();
            match announce_spawn(ctx, &scope, &entity).await {
                Ok(spawn) => {
                    let message_id = spawn.message_id.clone();
                    if ctx.spawns.activate(&scope, spawn) {
                        info!(%scope, dog = %entity.name, "dog spawned");
                        report.spawned += 1;
                    } else {
                        // Overridden or torn down while we were announcing.
                        debug!(%scope, "reservation lost, retracting announcement");
                        let _ = ctx.chat.delete_message(&scope.channel_id, &message_id).await;
                        report.skipped_active += 1;
                    }
                }
                Err(ChatError::PermissionDenied) => {
                    ctx.spawns.release(&scope);
                    self.deregister(&scope);
                    report.deregistered += 1;
                }
                Err(e) => {
                    ctx.spawns.release(&scope);
                    warn!(%scope, error = %e, "failed to announce spawn");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn deregister(&self, scope: &Scope) {
        info!(%scope, "bot lost access to catching channel, removing it");
        self.ctx.spawns.clear(scope);
        if let Err(e) = self
            .ctx
            .store
            .remove_channel(&scope.guild_id, &scope.channel_id)
        {
            error!(%scope, error = %e, "failed to remove catching channel");
        }
    }
}
