//! In-memory watch state, owned exclusively by the watchdog task.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use afkwarden_core::{ChannelId, GuildId, MessageRef, SessionLocation, UserId};

/// An outstanding presence challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: u64,
    pub message: MessageRef,
    pub deadline: Instant,
    /// Where the removal is executed if the challenge expires.
    pub destination: SessionLocation,
    pub voice_channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Active,
    /// The challenge timer fired and the post is queued or in flight.
    Posting { challenge_id: u64 },
    ChallengePending(Challenge),
}

impl WatchState {
    /// `Posting` counts as pending: the member is being challenged.
    pub fn is_challenge_pending(&self) -> bool {
        !matches!(self, WatchState::Active)
    }
}

#[derive(Debug, Clone)]
pub struct WatchedUser {
    pub user_id: UserId,
    pub display_name: String,
    pub location: SessionLocation,
    pub session_start: Option<Instant>,
    /// Presence from earlier sessions since process start.
    pub accumulated: Duration,
    pub state: WatchState,
}

impl WatchedUser {
    pub fn new(
        user_id: UserId,
        display_name: String,
        location: SessionLocation,
        accumulated: Duration,
    ) -> Self {
        Self {
            user_id,
            display_name,
            location,
            session_start: Some(Instant::now()),
            accumulated,
            state: WatchState::Active,
        }
    }

    pub fn session_elapsed(&self) -> Duration {
        self.session_start.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match &self.state {
            WatchState::ChallengePending(challenge) => Some(challenge),
            _ => None,
        }
    }
}

/// Counters reported by [`crate::WatchdogHandle::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogStats {
    pub active_users: usize,
    pub pending_challenges: usize,
    pub challenge_timers: usize,
    pub deadline_timers: usize,
    pub challenges_sent: u64,
    pub users_kicked: u64,
    pub queued_messages: usize,
}

/// Snapshot of one watched member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedUserView {
    pub user_id: UserId,
    pub display_name: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_secs: u64,
    /// Earlier sessions plus the current one.
    pub total_secs: u64,
    pub awaiting_confirmation: bool,
    /// Seconds until the next challenge, if one is scheduled.
    pub next_check_secs: Option<u64>,
}

/// Most entries a voice-user snapshot returns.
pub const MAX_VIEW_USERS: usize = 200;
