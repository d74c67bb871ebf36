//! `afkwarden serve`: wires config, storage, the watchdog and the Discord gateway.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use afkwarden_channels::DiscordAdapter;
use afkwarden_config::{AfkWardenConfig, WatchdogConfig};
use afkwarden_core::{SystemClock, WatchdogEvent};
use afkwarden_logging::EventLogger;
use afkwarden_progression::{ProgressionEngine, SqliteProgressionStore};
use afkwarden_scheduler::DeliveryQueue;
use afkwarden_watchdog::{Watchdog, WatchdogHandle, WatchdogSettings};

const STATS_EVERY: Duration = Duration::from_secs(300);

/// Runtime settings from a defaulted config section.
pub fn watchdog_settings(config: &WatchdogConfig) -> WatchdogSettings {
    let defaults = WatchdogSettings::default();
    WatchdogSettings {
        challenge_interval: config.challenge_interval(),
        confirm_timeout: config.confirm_timeout(),
        capacity_ceiling: config.capacity_ceiling.unwrap_or(defaults.capacity_ceiling),
        warn_threshold: config.warn_threshold.unwrap_or(defaults.warn_threshold),
        warn_every: config.warn_every.unwrap_or(defaults.warn_every),
        confirm_token: config
            .confirm_token
            .clone()
            .unwrap_or(defaults.confirm_token),
    }
}

pub async fn run(config: AfkWardenConfig, dir: &Path) -> Result<()> {
    let token = config
        .bot_token()
        .context("discord.botToken is not set; export DISCORD_TOKEN or edit the config")?
        .to_string();

    let watchdog_config = config.watchdog();
    let settings = watchdog_settings(&watchdog_config);
    settings.validate()?;

    let db_path = crate::db_path(&config, dir);
    info!(
        db = %db_path.display(),
        interval_secs = settings.challenge_interval.as_secs(),
        timeout_secs = settings.confirm_timeout.as_secs(),
        ceiling = settings.capacity_ceiling,
        test_mode = watchdog_config.is_test_mode(),
        "Starting afkwarden"
    );

    let store = SqliteProgressionStore::open(&db_path.to_string_lossy())
        .with_context(|| format!("open progression database {}", db_path.display()))?;
    let engine = ProgressionEngine::new(Arc::new(store), Arc::new(SystemClock));
    let queue = DeliveryQueue::spawn(watchdog_config.delivery_spacing());

    let (handle, mailbox) = WatchdogHandle::channel();
    let adapter = DiscordAdapter::new(token, settings.confirm_token.clone());
    let (mut client, notifier) = adapter.connect(handle.clone()).await?;

    let watchdog = Watchdog::new(settings, notifier, queue, engine, mailbox)?.spawn();
    spawn_event_logger(handle.subscribe());
    spawn_stats_reporter(handle.clone());

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!(error = %e, "Discord gateway stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    }

    if let Err(e) = handle.shutdown() {
        warn!(error = %e, "Watchdog already stopped");
    }
    if let Err(e) = watchdog.await {
        error!(error = %e, "Watchdog task panicked");
    }
    Ok(())
}

fn spawn_event_logger(mut events: broadcast::Receiver<WatchdogEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => EventLogger::log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_stats_reporter(handle: WatchdogHandle) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_EVERY);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match handle.stats().await {
                Ok(stats) => info!(
                    active = stats.active_users,
                    pending = stats.pending_challenges,
                    sent = stats.challenges_sent,
                    kicked = stats.users_kicked,
                    queued = stats.queued_messages,
                    "Watchdog stats"
                ),
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkwarden_config::apply_all_defaults;

    #[test]
    fn defaulted_config_matches_default_settings() {
        let config = apply_all_defaults(AfkWardenConfig::default());
        assert_eq!(watchdog_settings(&config.watchdog()), WatchdogSettings::default());
    }

    #[test]
    fn test_mode_config_matches_test_settings() {
        let config = apply_all_defaults(AfkWardenConfig {
            watchdog: Some(WatchdogConfig {
                test_mode: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(watchdog_settings(&config.watchdog()), WatchdogSettings::test_mode());
    }

    #[test]
    fn explicit_values_flow_through() {
        let config = WatchdogConfig {
            challenge_interval_minutes: Some(45),
            capacity_ceiling: Some(10),
            warn_threshold: Some(5),
            confirm_token: Some("!present".into()),
            ..Default::default()
        };
        let settings = watchdog_settings(&config);
        assert_eq!(settings.challenge_interval, Duration::from_secs(45 * 60));
        assert_eq!(settings.capacity_ceiling, 10);
        assert_eq!(settings.warn_threshold, 5);
        assert_eq!(settings.confirm_token, "!present");
        assert!(settings.validate().is_ok());
    }
}
