//! The presence watchdog task.
//!
//! One task owns every [`WatchedUser`] and processes platform events, timer
//! expiries and queued-post results strictly one at a time. Timer expiries are
//! checked against the scheduler's generation before they act, so a fire that
//! raced with a leave, move or confirmation is dropped.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::FutureExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use afkwarden_core::{
    EventKind, MessageRef, NotificationChannel, SessionLocation, UserId, WardenError,
    WatchdogEvent,
};
use afkwarden_progression::{LeaveOutcome, ProgressionEngine};
use afkwarden_scheduler::{DeliveryQueue, TimerFired, TimerKey, TimerPurpose, TimerScheduler};

use crate::admission::{Admission, AdmissionController};
use crate::destination::select_destination;
use crate::handle::{Mailbox, PostedChallenge, WatchdogHandle, WatchdogInput};
use crate::settings::WatchdogSettings;
use crate::state::{
    Challenge, WatchState, WatchdogStats, WatchedUser, WatchedUserView, MAX_VIEW_USERS,
};

/// Delay before a confirmed challenge and its reply are removed.
pub const CONFIRM_CLEANUP_DELAY: Duration = Duration::from_secs(5);
/// Delay before an expired challenge and the removal notice are removed.
pub const KICK_CLEANUP_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Left,
    Moved,
    /// Found out of voice when the challenge timer fired.
    Absent,
    /// The confirmation deadline passed.
    Expired,
}

impl EndReason {
    fn as_str(self) -> &'static str {
        match self {
            EndReason::Left => "left",
            EndReason::Moved => "moved",
            EndReason::Absent => "absent",
            EndReason::Expired => "expired",
        }
    }
}

pub struct Watchdog {
    settings: WatchdogSettings,
    admission: AdmissionController,
    channel: Arc<dyn NotificationChannel>,
    queue: DeliveryQueue,
    progression: ProgressionEngine,
    timers: TimerScheduler<TimerKey>,
    fired_rx: mpsc::UnboundedReceiver<TimerFired<TimerKey>>,
    rx: mpsc::UnboundedReceiver<WatchdogInput>,
    handle: WatchdogHandle,
    users: HashMap<UserId, WatchedUser>,
    /// Presence per member since process start, kept after their entry is gone.
    presence_totals: HashMap<UserId, Duration>,
    next_challenge_id: u64,
    challenges_sent: u64,
    users_kicked: u64,
}

impl Watchdog {
    pub fn new(
        settings: WatchdogSettings,
        channel: Arc<dyn NotificationChannel>,
        queue: DeliveryQueue,
        progression: ProgressionEngine,
        mailbox: Mailbox,
    ) -> Result<Self, WardenError> {
        settings.validate()?;
        let (timers, fired_rx) = TimerScheduler::new();
        Ok(Self {
            admission: AdmissionController::new(
                settings.capacity_ceiling,
                settings.warn_threshold,
                settings.warn_every,
            ),
            settings,
            channel,
            queue,
            progression,
            timers,
            fired_rx,
            rx: mailbox.rx,
            handle: mailbox.handle,
            users: HashMap::new(),
            presence_totals: HashMap::new(),
            next_challenge_id: 1,
            challenges_sent: 0,
            users_kicked: 0,
        })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(
            channel = self.channel.name(),
            interval_secs = self.settings.challenge_interval.as_secs(),
            timeout_secs = self.settings.confirm_timeout.as_secs(),
            capacity = self.settings.capacity_ceiling,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                input = self.rx.recv() => {
                    let Some(input) = input else { break };
                    if self.handle_input(input).await.is_break() {
                        break;
                    }
                }
                Some(fired) = self.fired_rx.recv() => self.on_timer(fired).await,
            }
        }

        let cancelled = self.timers.live_count();
        self.timers.cancel_all();
        info!(cancelled_timers = cancelled, watched = self.users.len(), "Watchdog stopped");
    }

    async fn handle_input(&mut self, input: WatchdogInput) -> ControlFlow<()> {
        match input {
            WatchdogInput::Join { user_id, display_name, location } => {
                self.on_join(user_id, display_name, location);
            }
            WatchdogInput::Leave { user_id } => {
                if !self.end_watch(user_id, EndReason::Left) {
                    debug!(user = %user_id, "Leave for unwatched member");
                }
            }
            WatchdogInput::Move { user_id, display_name, location } => {
                self.end_watch(user_id, EndReason::Moved);
                self.on_join(user_id, display_name, location);
                self.handle.publish(WatchdogEvent::for_user(
                    EventKind::Moved,
                    user_id,
                    json!({ "guild_id": location.guild_id, "channel_id": location.channel_id }),
                ));
            }
            WatchdogInput::ReactionAdded { user_id, message } => {
                self.on_confirm(user_id, Some(message));
            }
            WatchdogInput::TextCommand { user_id, text } => {
                if self.settings.is_confirm_command(&text) {
                    self.on_confirm(user_id, None);
                }
            }
            WatchdogInput::ChallengePosted { user_id, challenge_id, result } => {
                self.on_challenge_posted(user_id, challenge_id, result);
            }
            WatchdogInput::UpdateSettings { settings, reply } => {
                let _ = reply.send(self.apply_settings(settings));
            }
            WatchdogInput::Settings { reply } => {
                let _ = reply.send(self.settings.clone());
            }
            WatchdogInput::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            WatchdogInput::VoiceUsers { reply } => {
                let _ = reply.send(self.voice_users());
            }
            WatchdogInput::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn on_timer(&mut self, fired: TimerFired<TimerKey>) {
        if !self.timers.take_if_current(&fired) {
            return;
        }
        match fired.key.purpose {
            TimerPurpose::Challenge => self.on_challenge_due(fired.key.user_id).await,
            TimerPurpose::ConfirmDeadline => self.on_deadline(fired.key.user_id).await,
        }
    }

    fn on_join(&mut self, user_id: UserId, display_name: String, location: SessionLocation) {
        if self.users.contains_key(&user_id) {
            debug!(user = %user_id, "Join for a watched member, restarting the watch");
            self.end_watch(user_id, EndReason::Moved);
        }

        match self.admission.check(self.users.len()) {
            Admission::Rejected => {
                let err = WardenError::AdmissionRejected {
                    capacity: self.admission.ceiling(),
                };
                warn!(user = %user_id, error = %err, "Member will not be watched");
                self.handle.publish(WatchdogEvent::for_user(
                    EventKind::CapacityReached,
                    user_id,
                    json!({ "capacity": self.admission.ceiling() }),
                ));
                return;
            }
            Admission::Admitted { high_load: true } => {
                info!(active_users = self.users.len(), "High load");
                self.handle.publish(WatchdogEvent::new(
                    EventKind::HighLoad,
                    None,
                    json!({ "active_users": self.users.len() }),
                ));
            }
            Admission::Admitted { high_load: false } => {}
        }

        match self.progression.on_join(user_id, &display_name) {
            Ok(joined) if joined.streak > 1 => {
                info!(user = %user_id, streak = joined.streak, "Streak continues");
            }
            Ok(_) => {}
            Err(e) => self.store_failure(user_id, "join", &e),
        }

        let accumulated = self.presence_totals.get(&user_id).copied().unwrap_or_default();
        self.users.insert(
            user_id,
            WatchedUser::new(user_id, display_name, location, accumulated),
        );
        self.timers.cancel(&TimerKey::deadline(user_id));
        self.timers
            .arm(TimerKey::challenge(user_id), self.settings.challenge_interval);

        info!(
            user = %user_id,
            guild = %location.guild_id,
            channel = %location.channel_id,
            "Watching member"
        );
        self.handle.publish(WatchdogEvent::joined(
            user_id,
            location.guild_id,
            location.channel_id,
        ));
    }

    /// Stop watching `user_id`: fold the session, close it in progression and
    /// drop the entry. Returns whether the member was watched.
    fn end_watch(&mut self, user_id: UserId, reason: EndReason) -> bool {
        let Some(mut user) = self.users.remove(&user_id) else {
            return false;
        };
        self.timers.cancel(&TimerKey::challenge(user_id));
        self.timers.cancel(&TimerKey::deadline(user_id));

        let elapsed = user.session_elapsed();
        user.session_start = None;
        user.accumulated += elapsed;
        self.presence_totals.insert(user_id, user.accumulated);

        // An expired challenge is cleaned up by the escalation path.
        if reason != EndReason::Expired {
            if let Some(challenge) = user.challenge() {
                self.cleanup_later(Duration::ZERO, vec![challenge.message]);
            }
        }

        match self.progression.on_leave(user_id, elapsed) {
            Ok(Some(outcome)) => self.report_progress(user_id, &outcome),
            Ok(None) => {}
            Err(e) => self.store_failure(user_id, "leave", &e),
        }

        info!(
            user = %user_id,
            reason = reason.as_str(),
            session_secs = elapsed.as_secs(),
            total_minutes = user.accumulated.as_secs() / 60,
            "Stopped watching member"
        );
        self.handle.publish(WatchdogEvent::for_user(
            EventKind::Left,
            user_id,
            json!({ "reason": reason.as_str(), "session_secs": elapsed.as_secs() }),
        ));
        true
    }

    async fn on_challenge_due(&mut self, user_id: UserId) {
        let Some(user) = self.users.get(&user_id) else {
            return;
        };
        if user.state != WatchState::Active {
            debug!(user = %user_id, "Challenge timer fired outside ACTIVE, ignoring");
            return;
        }
        let location = user.location;

        match self
            .channel
            .current_voice_channel(location.guild_id, user_id)
            .await
        {
            Err(e) => {
                let err = WardenError::delivery(&e.context("presence lookup"));
                warn!(user = %user_id, error = %err, "Challenge deferred to next interval");
                self.defer_challenge(user_id, err.to_string());
                return;
            }
            Ok(None) => {
                debug!(user = %user_id, "Member no longer in voice, clearing entry");
                self.end_watch(user_id, EndReason::Absent);
                return;
            }
            Ok(Some(_)) => {}
        }

        let challenge_id = self.next_challenge_id;
        self.next_challenge_id += 1;
        if let Some(user) = self.users.get_mut(&user_id) {
            user.state = WatchState::Posting { challenge_id };
        }

        let channel = Arc::clone(&self.channel);
        let handle = self.handle.clone();
        let confirm_within = self.settings.confirm_timeout;
        let queued = self.queue.enqueue(format!("challenge {user_id}"), async move {
            // The result must come back even if the post panics, or the
            // member would sit in POSTING with no timer.
            let result = AssertUnwindSafe(post_challenge(
                channel.as_ref(),
                user_id,
                location,
                confirm_within,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow!("challenge post panicked")));
            let report = result
                .as_ref()
                .map(Clone::clone)
                .map_err(|e| format!("{e:#}"));
            handle.challenge_posted(user_id, challenge_id, report)?;
            result.map(|_| ())
        });
        if !queued {
            let err = WardenError::DeliveryFailure("delivery queue is closed".to_string());
            warn!(user = %user_id, error = %err, "Challenge deferred to next interval");
            self.defer_challenge(user_id, err.to_string());
            return;
        }
        debug!(user = %user_id, challenge_id, "Challenge queued");
    }

    fn on_challenge_posted(
        &mut self,
        user_id: UserId,
        challenge_id: u64,
        result: Result<PostedChallenge, String>,
    ) {
        let timeout = self.settings.confirm_timeout;
        let current = self
            .users
            .get(&user_id)
            .is_some_and(|u| u.state == WatchState::Posting { challenge_id });
        if !current {
            if let Ok(posted) = result {
                debug!(user = %user_id, challenge_id, "Challenge posted after the watch ended, removing it");
                self.cleanup_later(Duration::ZERO, vec![posted.message]);
            }
            return;
        }

        match result {
            Ok(posted) => {
                let Some(user) = self.users.get_mut(&user_id) else {
                    return;
                };
                let challenge = Challenge {
                    id: challenge_id,
                    message: posted.message,
                    deadline: Instant::now() + timeout,
                    destination: user.location,
                    voice_channel_name: posted.voice_channel_name,
                };
                info!(
                    user = %user_id,
                    message = %challenge.message,
                    voice_channel = %challenge.voice_channel_name,
                    "Challenge posted"
                );
                self.handle.publish(WatchdogEvent::for_user(
                    EventKind::ChallengeIssued,
                    user_id,
                    json!({
                        "message": challenge.message,
                        "voice_channel": challenge.voice_channel_name,
                        "timeout_secs": timeout.as_secs(),
                    }),
                ));
                user.state = WatchState::ChallengePending(challenge);
                self.timers.arm(TimerKey::deadline(user_id), timeout);
                self.challenges_sent += 1;
            }
            Err(reason) => {
                let err = WardenError::DeliveryFailure(reason);
                warn!(user = %user_id, error = %err, "Challenge deferred to next interval");
                self.defer_challenge(user_id, err.to_string());
            }
        }
    }

    /// Back to ACTIVE with a fresh interval after a challenge could not go out.
    fn defer_challenge(&mut self, user_id: UserId, reason: String) {
        if let Some(user) = self.users.get_mut(&user_id) {
            user.state = WatchState::Active;
        }
        self.timers
            .arm(TimerKey::challenge(user_id), self.settings.challenge_interval);
        self.handle.publish(WatchdogEvent::for_user(
            EventKind::ChallengeDeferred,
            user_id,
            json!({ "reason": reason }),
        ));
    }

    /// Confirm the outstanding challenge. A reaction must target the
    /// challenge message itself; a text command confirms whatever is pending.
    fn on_confirm(&mut self, user_id: UserId, reacted: Option<MessageRef>) {
        let Some(user) = self.users.get_mut(&user_id) else {
            debug!(user = %user_id, "Confirmation from unwatched member ignored");
            return;
        };
        let matches = match (&user.state, reacted) {
            (WatchState::ChallengePending(challenge), Some(message)) => challenge.message == message,
            (WatchState::ChallengePending(_), None) => true,
            _ => false,
        };
        if !matches {
            debug!(user = %user_id, "No matching challenge to confirm");
            return;
        }
        let WatchState::ChallengePending(challenge) =
            std::mem::replace(&mut user.state, WatchState::Active)
        else {
            return;
        };

        self.timers.cancel(&TimerKey::deadline(user_id));
        self.timers
            .arm(TimerKey::challenge(user_id), self.settings.challenge_interval);

        let channel = Arc::clone(&self.channel);
        let queue = self.queue.clone();
        let message = challenge.message;
        self.queue.enqueue(format!("confirmation {user_id}"), async move {
            match channel.post_confirmation(&message, user_id).await {
                Ok(reply) => {
                    cleanup_after(&queue, &channel, CONFIRM_CLEANUP_DELAY, vec![message, reply]);
                    Ok(())
                }
                Err(e) => {
                    cleanup_after(&queue, &channel, CONFIRM_CLEANUP_DELAY, vec![message]);
                    Err(e.context("reply to confirmed challenge"))
                }
            }
        });

        info!(user = %user_id, "Presence confirmed");
        self.handle.publish(WatchdogEvent::for_user(
            EventKind::Confirmed,
            user_id,
            json!({ "message": message }),
        ));
    }

    async fn on_deadline(&mut self, user_id: UserId) {
        let Some(challenge) = self
            .users
            .get(&user_id)
            .and_then(|u| u.challenge())
            .cloned()
        else {
            debug!(user = %user_id, "Deadline fired without a pending challenge");
            return;
        };
        let guild_id = challenge.destination.guild_id;

        let present = match self.channel.current_voice_channel(guild_id, user_id).await {
            Ok(current) => current.is_some(),
            Err(e) => {
                warn!(user = %user_id, error = %format!("{e:#}"), "Presence lookup failed at deadline, disconnecting anyway");
                true
            }
        };

        if !present {
            debug!(user = %user_id, "Member already left before the deadline");
            self.cleanup_later(Duration::ZERO, vec![challenge.message]);
        } else {
            match self.channel.disconnect_from_session(guild_id, user_id).await {
                Ok(()) => {
                    self.users_kicked += 1;
                    info!(
                        user = %user_id,
                        voice_channel = %challenge.voice_channel_name,
                        "Disconnected member for not confirming"
                    );
                    self.handle.publish(WatchdogEvent::for_user(
                        EventKind::Escalated,
                        user_id,
                        json!({ "voice_channel": challenge.voice_channel_name }),
                    ));
                    self.post_failure_notice(user_id, &challenge);
                }
                Err(e) => {
                    let err = WardenError::escalation(&e);
                    warn!(user = %user_id, error = %err, "Clearing local state without removal");
                    self.handle.publish(WatchdogEvent::for_user(
                        EventKind::EscalationFailed,
                        user_id,
                        json!({ "error": err.to_string() }),
                    ));
                    self.cleanup_later(Duration::ZERO, vec![challenge.message]);
                }
            }
        }

        self.end_watch(user_id, EndReason::Expired);
    }

    fn post_failure_notice(&self, user_id: UserId, challenge: &Challenge) {
        let channel = Arc::clone(&self.channel);
        let queue = self.queue.clone();
        let message = challenge.message;
        let voice_channel_name = challenge.voice_channel_name.clone();
        self.queue.enqueue(format!("removal notice {user_id}"), async move {
            match channel
                .post_failure_notice(&message, user_id, &voice_channel_name)
                .await
            {
                Ok(notice) => {
                    cleanup_after(&queue, &channel, KICK_CLEANUP_DELAY, vec![message, notice]);
                    Ok(())
                }
                Err(e) => {
                    cleanup_after(&queue, &channel, KICK_CLEANUP_DELAY, vec![message]);
                    Err(e.context("post removal notice"))
                }
            }
        });
    }

    fn cleanup_later(&self, delay: Duration, messages: Vec<MessageRef>) {
        cleanup_after(&self.queue, &self.channel, delay, messages);
    }

    fn report_progress(&self, user_id: UserId, outcome: &LeaveOutcome) {
        debug!(
            user = %user_id,
            minutes = outcome.minutes,
            xp = outcome.xp_earned,
            multiplier = outcome.multiplier,
            "Session rewarded"
        );
        if let Some(level_up) = &outcome.level_up {
            if let Some(role) = level_up.role_reward {
                info!(user = %user_id, level = level_up.to, role, "Role reward reached");
            }
            self.handle.publish(WatchdogEvent::for_user(
                EventKind::LevelUp,
                user_id,
                json!(level_up),
            ));
        }
        for unlock in &outcome.unlocked {
            self.handle.publish(WatchdogEvent::for_user(
                EventKind::AchievementUnlocked,
                user_id,
                json!(unlock),
            ));
        }
    }

    fn store_failure(&self, user_id: UserId, operation: &str, e: &anyhow::Error) {
        let err = WardenError::store(e);
        error!(user = %user_id, operation, error = %err, "Progression update lost");
        self.handle.publish(WatchdogEvent::for_user(
            EventKind::StoreFailure,
            user_id,
            json!({ "operation": operation, "error": err.to_string() }),
        ));
    }

    fn apply_settings(&mut self, settings: WatchdogSettings) -> Result<(), WardenError> {
        settings.validate()?;
        self.admission.reconfigure(
            settings.capacity_ceiling,
            settings.warn_threshold,
            settings.warn_every,
        );
        info!(
            interval_secs = settings.challenge_interval.as_secs(),
            timeout_secs = settings.confirm_timeout.as_secs(),
            capacity = settings.capacity_ceiling,
            "Settings updated"
        );
        self.handle.publish(WatchdogEvent::new(
            EventKind::SettingsUpdated,
            None,
            json!({
                "challenge_interval_secs": settings.challenge_interval.as_secs(),
                "confirm_timeout_secs": settings.confirm_timeout.as_secs(),
                "capacity_ceiling": settings.capacity_ceiling,
            }),
        ));
        self.settings = settings;
        Ok(())
    }

    fn stats(&self) -> WatchdogStats {
        WatchdogStats {
            active_users: self.users.len(),
            pending_challenges: self
                .users
                .values()
                .filter(|u| u.state.is_challenge_pending())
                .count(),
            challenge_timers: self
                .timers
                .count_where(|k| k.purpose == TimerPurpose::Challenge),
            deadline_timers: self
                .timers
                .count_where(|k| k.purpose == TimerPurpose::ConfirmDeadline),
            challenges_sent: self.challenges_sent,
            users_kicked: self.users_kicked,
            queued_messages: self.queue.pending(),
        }
    }

    fn voice_users(&self) -> Vec<WatchedUserView> {
        if self.users.len() > MAX_VIEW_USERS {
            warn!(watched = self.users.len(), limit = MAX_VIEW_USERS, "Voice user snapshot truncated");
        }
        let now = Instant::now();
        let mut users: Vec<&WatchedUser> = self.users.values().collect();
        users.sort_by_key(|u| u.user_id);
        users
            .into_iter()
            .take(MAX_VIEW_USERS)
            .map(|u| {
                let session = u.session_elapsed();
                WatchedUserView {
                    user_id: u.user_id,
                    display_name: u.display_name.clone(),
                    guild_id: u.location.guild_id,
                    channel_id: u.location.channel_id,
                    session_secs: session.as_secs(),
                    total_secs: (u.accumulated + session).as_secs(),
                    awaiting_confirmation: u.state.is_challenge_pending(),
                    next_check_secs: self
                        .timers
                        .fires_at(&TimerKey::challenge(u.user_id))
                        .map(|at| at.saturating_duration_since(now).as_secs()),
                }
            })
            .collect()
    }
}

/// Resolve the destination and post the challenge with its marker.
async fn post_challenge(
    channel: &dyn NotificationChannel,
    user_id: UserId,
    location: SessionLocation,
    confirm_within: Duration,
) -> anyhow::Result<PostedChallenge> {
    let voice_channel_name = channel
        .channel_name(location.guild_id, location.channel_id)
        .await?
        .with_context(|| format!("voice channel {} no longer exists", location.channel_id))?;
    let text_channels = channel.text_channels(location.guild_id).await?;
    let destination = select_destination(&text_channels, &voice_channel_name)
        .with_context(|| format!("no text channel in guild {}", location.guild_id))?;

    let message = channel
        .post_challenge(destination, user_id, &voice_channel_name, confirm_within)
        .await
        .with_context(|| format!("post challenge in #{}", destination.name))?;
    // The text command still works without the marker.
    if let Err(e) = channel.add_reaction_marker(&message).await {
        warn!(message = %message, error = %format!("{e:#}"), "Could not add confirmation marker");
    }
    Ok(PostedChallenge {
        message,
        voice_channel_name,
    })
}

/// Queue deletion of `messages` once `delay` has elapsed.
fn cleanup_after(
    queue: &DeliveryQueue,
    channel: &Arc<dyn NotificationChannel>,
    delay: Duration,
    messages: Vec<MessageRef>,
) {
    let channel = Arc::clone(channel);
    let label = format!(
        "cleanup {}",
        messages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );
    let work = async move {
        let mut first_err = None;
        for message in &messages {
            if let Err(e) = channel.delete_message(message).await {
                first_err.get_or_insert(e.context(format!("delete {message}")));
            }
        }
        first_err.map_or(Ok(()), Err)
    };
    if delay.is_zero() {
        queue.enqueue(label, work);
    } else {
        queue.enqueue_after(delay, label, work);
    }
}
