use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, GuildId, UserId};

/// An advisory signal published by the watchdog for observers (logs, dashboards).
///
/// Events are informational only; dropping them never affects watchdog state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
}

/// Categories of watchdog events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A member started being watched
    Joined,
    /// A member stopped being watched
    Left,
    /// A member switched voice channels
    Moved,
    /// A presence challenge was posted
    ChallengeIssued,
    /// A challenge could not be delivered and will be retried
    ChallengeDeferred,
    /// A member confirmed presence
    Confirmed,
    /// A member failed to confirm and was removed
    Escalated,
    /// The disconnect action itself failed
    EscalationFailed,
    /// The watched population crossed a load checkpoint
    HighLoad,
    /// A join was dropped because the watcher is full
    CapacityReached,
    /// A member gained a level
    LevelUp,
    /// A member unlocked an achievement
    AchievementUnlocked,
    /// A progression write was lost
    StoreFailure,
    /// Runtime settings changed
    SettingsUpdated,
}

impl WatchdogEvent {
    pub fn new(kind: EventKind, user_id: Option<UserId>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            user_id,
            payload,
        }
    }

    pub fn for_user(kind: EventKind, user_id: UserId, payload: serde_json::Value) -> Self {
        Self::new(kind, Some(user_id), payload)
    }

    pub fn joined(user_id: UserId, guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self::for_user(
            EventKind::Joined,
            user_id,
            serde_json::json!({ "guild_id": guild_id, "channel_id": channel_id }),
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = WatchdogEvent::joined(UserId(1), GuildId(2), ChannelId(3));
        assert_eq!(event.kind, EventKind::Joined);
        assert_eq!(event.user_id, Some(UserId(1)));
        assert_eq!(event.payload["channel_id"], 3);
    }

    #[test]
    fn test_event_serialization() {
        let event = WatchdogEvent::new(
            EventKind::HighLoad,
            None,
            serde_json::json!({ "active_users": 150 }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: WatchdogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.kind, EventKind::HighLoad);
        assert!(deserialized.user_id.is_none());
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::ChallengeIssued.to_string(), "challenge_issued");
        assert_eq!(EventKind::LevelUp.to_string(), "level_up");
    }
}
