//! afkwarden runtime configuration schema.
//!
//! Every section is optional in the YAML file; [`crate::apply_all_defaults`]
//! fills whatever is missing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfkWardenConfig {
    /// Platform credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordConfig>,

    /// Presence checks and admission control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<WatchdogConfig>,

    /// XP / achievement storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<ProgressionConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Usually `${DISCORD_TOKEN}` so the secret stays out of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_interval_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_ceiling: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_every: Option<usize>,
    /// Minimum gap between two platform calls on the delivery queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_spacing_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_token: Option<String>,
    /// One minute between checks and 30 s to answer, overriding the two timings above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<bool>,
}

impl WatchdogConfig {
    pub fn is_test_mode(&self) -> bool {
        self.test_mode.unwrap_or(false)
    }

    /// Effective challenge interval, taking test mode into account.
    pub fn challenge_interval(&self) -> Duration {
        if self.is_test_mode() {
            return Duration::from_secs(crate::defaults::TEST_MODE_INTERVAL_SECS);
        }
        let minutes = self
            .challenge_interval_minutes
            .unwrap_or(crate::defaults::DEFAULT_CHALLENGE_INTERVAL_MINUTES);
        Duration::from_secs(minutes * 60)
    }

    /// Effective confirmation timeout, taking test mode into account.
    pub fn confirm_timeout(&self) -> Duration {
        if self.is_test_mode() {
            return Duration::from_secs(crate::defaults::TEST_MODE_CONFIRM_SECS);
        }
        Duration::from_secs(
            self.confirm_timeout_secs
                .unwrap_or(crate::defaults::DEFAULT_CONFIRM_TIMEOUT_SECS),
        )
    }

    pub fn delivery_spacing(&self) -> Duration {
        Duration::from_millis(
            self.delivery_spacing_ms
                .unwrap_or(crate::defaults::DEFAULT_DELIVERY_SPACING_MS),
        )
    }
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionConfig {
    /// SQLite database file; relative paths resolve against the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `RUST_LOG`-style filter, e.g. `info` or `afkwarden_watchdog=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for the rolling JSON log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl AfkWardenConfig {
    pub fn bot_token(&self) -> Option<&str> {
        self.discord
            .as_ref()
            .and_then(|d| d.bot_token.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn watchdog(&self) -> WatchdogConfig {
        self.watchdog.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_yaml() {
        let yaml = r#"
discord:
  botToken: abc
watchdog:
  challengeIntervalMinutes: 45
  confirmTimeoutSecs: 90
  capacityCeiling: 200
progression:
  dbPath: /var/lib/afkwarden/xp.db
"#;
        let config: AfkWardenConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bot_token(), Some("abc"));
        let watchdog = config.watchdog();
        assert_eq!(watchdog.challenge_interval(), Duration::from_secs(45 * 60));
        assert_eq!(watchdog.confirm_timeout(), Duration::from_secs(90));
        assert_eq!(watchdog.capacity_ceiling, Some(200));
        assert_eq!(
            config.progression.unwrap().db_path.as_deref(),
            Some("/var/lib/afkwarden/xp.db")
        );
    }

    #[test]
    fn test_mode_overrides_timings() {
        let watchdog = WatchdogConfig {
            challenge_interval_minutes: Some(90),
            confirm_timeout_secs: Some(300),
            test_mode: Some(true),
            ..Default::default()
        };
        assert_eq!(watchdog.challenge_interval(), Duration::from_secs(60));
        assert_eq!(watchdog.confirm_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let config = AfkWardenConfig {
            discord: Some(DiscordConfig {
                bot_token: Some("  ".into()),
            }),
            ..Default::default()
        };
        assert!(config.bot_token().is_none());
    }
}
