//! Runtime-tunable watchdog parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use afkwarden_core::WardenError;

pub const MIN_CHALLENGE_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_CHALLENGE_INTERVAL: Duration = Duration::from_secs(180 * 60);
/// Lower bound also admits the test-mode timeout.
pub const MIN_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_CONFIRM_TOKEN: &str = "!here";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogSettings {
    /// How long a member may stay unchallenged.
    pub challenge_interval: Duration,
    /// How long a posted challenge stays answerable.
    pub confirm_timeout: Duration,
    pub capacity_ceiling: usize,
    pub warn_threshold: usize,
    pub warn_every: usize,
    /// Text command accepted as a confirmation, compared case-insensitively.
    pub confirm_token: String,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            challenge_interval: Duration::from_secs(30 * 60),
            confirm_timeout: Duration::from_secs(2 * 60),
            capacity_ceiling: 500,
            warn_threshold: 100,
            warn_every: 50,
            confirm_token: DEFAULT_CONFIRM_TOKEN.to_string(),
        }
    }
}

impl WatchdogSettings {
    /// Short timings for trying the bot out: one minute between checks, 30 s to answer.
    pub fn test_mode() -> Self {
        Self {
            challenge_interval: Duration::from_secs(60),
            confirm_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), WardenError> {
        if !(MIN_CHALLENGE_INTERVAL..=MAX_CHALLENGE_INTERVAL).contains(&self.challenge_interval) {
            return Err(WardenError::InvalidSettings(format!(
                "challenge interval must be between 1 and 180 minutes, got {}s",
                self.challenge_interval.as_secs()
            )));
        }
        if !(MIN_CONFIRM_TIMEOUT..=MAX_CONFIRM_TIMEOUT).contains(&self.confirm_timeout) {
            return Err(WardenError::InvalidSettings(format!(
                "confirmation timeout must be between 30 seconds and 10 minutes, got {}s",
                self.confirm_timeout.as_secs()
            )));
        }
        if self.capacity_ceiling == 0 {
            return Err(WardenError::InvalidSettings(
                "capacity ceiling must be at least 1".into(),
            ));
        }
        if self.warn_threshold > self.capacity_ceiling {
            return Err(WardenError::InvalidSettings(format!(
                "warn threshold {} exceeds capacity ceiling {}",
                self.warn_threshold, self.capacity_ceiling
            )));
        }
        if self.warn_every == 0 {
            return Err(WardenError::InvalidSettings("warnEvery must be at least 1".into()));
        }
        if self.confirm_token.trim().is_empty() {
            return Err(WardenError::InvalidSettings("confirm token must not be empty".into()));
        }
        Ok(())
    }

    /// Whether `text` is the confirmation command.
    pub fn is_confirm_command(&self, text: &str) -> bool {
        text.trim().eq_ignore_ascii_case(self.confirm_token.trim())
    }
}
