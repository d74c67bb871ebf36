//! Persistence boundary of the progression engine.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use afkwarden_core::UserId;

/// Timestamp format used for every stored wall-clock value.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Durable per-user progression row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionRecord {
    pub user_id: UserId,
    pub username: String,
    pub xp: u64,
    pub level: u32,
    pub total_time_minutes: u64,
    pub current_streak: u32,
    pub last_active: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Result of adding XP: the level is recomputed from the new total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpChange {
    pub previous_level: u32,
    pub new_level: u32,
    pub new_xp: u64,
}

impl XpChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.previous_level
    }
}

/// Row id of a session history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub i64);

/// One closed (or still open) voice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub join_time: NaiveDateTime,
    pub leave_time: Option<NaiveDateTime>,
    pub duration_minutes: u64,
    pub xp_earned: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedAchievement {
    pub kind: String,
    pub unlocked_at: NaiveDateTime,
}

/// Per-user totals over a trailing window of sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStat {
    pub user_id: UserId,
    pub username: String,
    pub minutes: u64,
    pub xp: u64,
}

/// Storage operations the engine relies on. Each call is atomic per user row;
/// nothing here spans users.
pub trait ProgressionStore: Send + Sync {
    fn get_record(&self, user_id: UserId) -> Result<Option<ProgressionRecord>>;

    /// Insert a fresh record (zero XP, level 1) unless one exists; returns the stored row.
    fn create_record(
        &self,
        user_id: UserId,
        username: &str,
        now: NaiveDateTime,
    ) -> Result<ProgressionRecord>;

    fn update_streak(&self, user_id: UserId, streak: u32, last_active: NaiveDateTime)
        -> Result<()>;

    /// Add presence minutes; returns the new lifetime total.
    fn add_time(&self, user_id: UserId, minutes: u64, now: NaiveDateTime) -> Result<u64>;

    /// Add XP and recompute the level from the new total.
    fn add_xp(&self, user_id: UserId, amount: u64, now: NaiveDateTime) -> Result<XpChange>;

    fn record_session_start(&self, user_id: UserId, joined_at: NaiveDateTime) -> Result<SessionId>;

    fn record_session_end(
        &self,
        session_id: SessionId,
        left_at: NaiveDateTime,
        duration_minutes: u64,
        xp_earned: u64,
    ) -> Result<()>;

    fn sessions(&self, user_id: UserId, limit: usize) -> Result<Vec<SessionRecord>>;

    fn has_achievement(&self, user_id: UserId, kind: &str) -> Result<bool>;

    /// Returns `true` only if this call created the unlock.
    fn unlock_achievement(&self, user_id: UserId, kind: &str, at: NaiveDateTime) -> Result<bool>;

    fn achievements(&self, user_id: UserId) -> Result<Vec<UnlockedAchievement>>;

    fn top_by_time(&self, limit: usize) -> Result<Vec<ProgressionRecord>>;

    /// Highest level first, ties broken by XP.
    fn top_by_level(&self, limit: usize) -> Result<Vec<ProgressionRecord>>;

    fn top_by_streak(&self, limit: usize) -> Result<Vec<ProgressionRecord>>;

    /// Session totals per user for sessions started at or after `since`.
    fn aggregate_window(&self, since: NaiveDateTime, limit: usize) -> Result<Vec<WindowStat>>;

    fn user_count(&self) -> Result<u64>;
}
