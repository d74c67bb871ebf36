//! Config defaults: applies sensible default values to parsed config.

use crate::schema::{
    AfkWardenConfig, DiscordConfig, LoggingConfig, ProgressionConfig, WatchdogConfig,
};

pub const DEFAULT_CHALLENGE_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CAPACITY_CEILING: usize = 500;
pub const DEFAULT_WARN_THRESHOLD: usize = 100;
pub const DEFAULT_WARN_EVERY: usize = 50;
pub const DEFAULT_DELIVERY_SPACING_MS: u64 = 500;
pub const DEFAULT_CONFIRM_TOKEN: &str = "!here";
pub const DEFAULT_DB_PATH: &str = "afkwarden.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const TEST_MODE_INTERVAL_SECS: u64 = 60;
pub const TEST_MODE_CONFIRM_SECS: u64 = 30;

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: AfkWardenConfig) -> AfkWardenConfig {
    let config = apply_watchdog_defaults(config);
    let config = apply_progression_defaults(config);
    apply_logging_defaults(config)
}

fn apply_watchdog_defaults(mut config: AfkWardenConfig) -> AfkWardenConfig {
    let watchdog = config.watchdog.get_or_insert_with(WatchdogConfig::default);
    watchdog
        .challenge_interval_minutes
        .get_or_insert(DEFAULT_CHALLENGE_INTERVAL_MINUTES);
    watchdog
        .confirm_timeout_secs
        .get_or_insert(DEFAULT_CONFIRM_TIMEOUT_SECS);
    watchdog.capacity_ceiling.get_or_insert(DEFAULT_CAPACITY_CEILING);
    watchdog.warn_threshold.get_or_insert(DEFAULT_WARN_THRESHOLD);
    watchdog.warn_every.get_or_insert(DEFAULT_WARN_EVERY);
    watchdog
        .delivery_spacing_ms
        .get_or_insert(DEFAULT_DELIVERY_SPACING_MS);
    if watchdog.confirm_token.is_none() {
        watchdog.confirm_token = Some(DEFAULT_CONFIRM_TOKEN.to_string());
    }
    watchdog.test_mode.get_or_insert(false);
    config
}

fn apply_progression_defaults(mut config: AfkWardenConfig) -> AfkWardenConfig {
    let progression = config
        .progression
        .get_or_insert_with(ProgressionConfig::default);
    if progression.db_path.is_none() {
        progression.db_path = Some(DEFAULT_DB_PATH.to_string());
    }
    config
}

fn apply_logging_defaults(mut config: AfkWardenConfig) -> AfkWardenConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    config
}

/// Starter config written by `afkwarden init-config`.
pub fn starter_config() -> AfkWardenConfig {
    let config = AfkWardenConfig {
        discord: Some(DiscordConfig {
            bot_token: Some("${DISCORD_TOKEN}".to_string()),
        }),
        ..Default::default()
    };
    apply_all_defaults(config)
}
