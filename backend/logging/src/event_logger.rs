//! Watchdog Event Logger
//!
//! Advisory watchdog events written through `tracing` at target `warden_events`,
//! which the JSON file layer turns into NDJSON lines.

use afkwarden_core::{EventKind, UserId, WatchdogEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::redact::redact_json;

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
}

impl From<&WatchdogEvent> for EventLogEntry {
    fn from(event: &WatchdogEvent) -> Self {
        let mut payload = event.payload.clone();
        redact_json(&mut payload);
        Self {
            timestamp: event.timestamp,
            kind: event.kind,
            user_id: event.user_id,
            payload,
        }
    }
}

pub struct EventLogger;

impl EventLogger {
    /// Kinds that mean something went wrong or a member was removed.
    pub fn is_warning(kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::Escalated
                | EventKind::EscalationFailed
                | EventKind::CapacityReached
                | EventKind::StoreFailure
                | EventKind::ChallengeDeferred
        )
    }

    pub fn log_event(event: &WatchdogEvent) {
        let entry = EventLogEntry::from(event);
        let payload = entry.payload.to_string();
        let user = entry.user_id.map(|u| u.0);
        if Self::is_warning(entry.kind) {
            warn!(target: "warden_events", kind = %entry.kind, user = ?user, %payload, "Watchdog event");
        } else {
            info!(target: "warden_events", kind = %entry.kind, user = ?user, %payload, "Watchdog event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_redacts_payload() {
        let event = WatchdogEvent::for_user(
            EventKind::StoreFailure,
            UserId(7),
            serde_json::json!({"error": "Bearer abc123"}),
        );
        let entry = EventLogEntry::from(&event);
        assert_eq!(entry.payload["error"], "Bearer [REDACTED_TOKEN]");
        assert_eq!(entry.user_id, Some(UserId(7)));
    }

    #[test]
    fn failures_log_as_warnings() {
        assert!(EventLogger::is_warning(EventKind::EscalationFailed));
        assert!(!EventLogger::is_warning(EventKind::LevelUp));
    }
}
