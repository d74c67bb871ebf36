//! Config validation with user-friendly error messages.

use crate::schema::AfkWardenConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// All errors and warnings found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &AfkWardenConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_discord(config, &mut report);
    validate_watchdog(config, &mut report);
    validate_progression(config, &mut report);
    report
}

fn validate_discord(config: &AfkWardenConfig, report: &mut ValidationReport) {
    if config.bot_token().is_none() {
        report.warn(
            "discord.botToken",
            "No bot token configured; `afkwarden serve` will refuse to start",
        );
    }
}

fn validate_watchdog(config: &AfkWardenConfig, report: &mut ValidationReport) {
    let Some(w) = &config.watchdog else { return };

    if !w.is_test_mode() {
        if let Some(minutes) = w.challenge_interval_minutes {
            if !(1..=180).contains(&minutes) {
                report.error(
                    "watchdog.challengeIntervalMinutes",
                    format!("must be between 1 and 180, got {minutes}"),
                );
            }
        }
        if let Some(secs) = w.confirm_timeout_secs {
            if !(60..=600).contains(&secs) {
                report.error(
                    "watchdog.confirmTimeoutSecs",
                    format!("must be between 60 and 600 (1 to 10 minutes), got {secs}"),
                );
            }
        }
    } else {
        report.warn(
            "watchdog.testMode",
            "Test mode is on: members are checked every minute",
        );
    }

    if w.capacity_ceiling == Some(0) {
        report.error("watchdog.capacityCeiling", "must be at least 1");
    }
    if let (Some(threshold), Some(ceiling)) = (w.warn_threshold, w.capacity_ceiling) {
        if threshold > ceiling {
            report.error(
                "watchdog.warnThreshold",
                format!("{threshold} exceeds capacityCeiling {ceiling}"),
            );
        }
    }
    if w.warn_every == Some(0) {
        report.error("watchdog.warnEvery", "must be at least 1");
    }
    if w.delivery_spacing_ms == Some(0) {
        report.warn(
            "watchdog.deliverySpacingMs",
            "No spacing between platform calls; expect rate limiting",
        );
    }
    if let Some(token) = &w.confirm_token {
        if token.trim().is_empty() {
            report.error("watchdog.confirmToken", "cannot be empty");
        }
    }
}

fn validate_progression(config: &AfkWardenConfig, report: &mut ValidationReport) {
    let Some(p) = &config.progression else { return };
    if let Some(path) = &p.db_path {
        if path.trim().is_empty() {
            report.error("progression.dbPath", "cannot be empty");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{apply_all_defaults, starter_config};
    use crate::schema::{DiscordConfig, WatchdogConfig};

    fn with_watchdog(watchdog: WatchdogConfig) -> AfkWardenConfig {
        apply_all_defaults(AfkWardenConfig {
            discord: Some(DiscordConfig {
                bot_token: Some("token".into()),
            }),
            watchdog: Some(watchdog),
            ..Default::default()
        })
    }

    #[test]
    fn defaults_with_token_are_clean() {
        let report = validate(&with_watchdog(WatchdogConfig::default()));
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_token_is_a_warning() {
        let report = validate(&apply_all_defaults(AfkWardenConfig::default()));
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].path, "discord.botToken");
    }

    #[test]
    fn interval_out_of_range() {
        let report = validate(&with_watchdog(WatchdogConfig {
            challenge_interval_minutes: Some(181),
            ..Default::default()
        }));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "watchdog.challengeIntervalMinutes");
    }

    #[test]
    fn timeout_below_a_minute_rejected_outside_test_mode() {
        let report = validate(&with_watchdog(WatchdogConfig {
            confirm_timeout_secs: Some(30),
            ..Default::default()
        }));
        assert!(!report.is_valid());

        let report = validate(&with_watchdog(WatchdogConfig {
            confirm_timeout_secs: Some(30),
            test_mode: Some(true),
            ..Default::default()
        }));
        assert!(report.is_valid());
    }

    #[test]
    fn threshold_above_ceiling() {
        let report = validate(&with_watchdog(WatchdogConfig {
            capacity_ceiling: Some(50),
            warn_threshold: Some(100),
            ..Default::default()
        }));
        assert_eq!(report.errors[0].path, "watchdog.warnThreshold");
    }

    #[test]
    fn starter_config_validates() {
        assert!(validate(&starter_config()).is_valid());
    }
}
