//! Producer side of the watchdog: every platform event and query enters the
//! watchdog task through a [`WatchdogHandle`].

use tokio::sync::{broadcast, mpsc, oneshot};

use afkwarden_core::{MessageRef, SessionLocation, UserId, WardenError, WatchdogEvent};

use crate::settings::WatchdogSettings;
use crate::state::{WatchdogStats, WatchedUserView};

const EVENT_CAPACITY: usize = 256;

/// A challenge that made it onto the platform.
#[derive(Debug, Clone)]
pub struct PostedChallenge {
    pub message: MessageRef,
    pub voice_channel_name: String,
}

/// Messages processed by the watchdog task, one at a time.
#[derive(Debug)]
pub enum WatchdogInput {
    Join {
        user_id: UserId,
        display_name: String,
        location: SessionLocation,
    },
    Leave {
        user_id: UserId,
    },
    Move {
        user_id: UserId,
        display_name: String,
        location: SessionLocation,
    },
    ReactionAdded {
        user_id: UserId,
        message: MessageRef,
    },
    TextCommand {
        user_id: UserId,
        text: String,
    },
    /// Result of a queued challenge post.
    ChallengePosted {
        user_id: UserId,
        challenge_id: u64,
        result: Result<PostedChallenge, String>,
    },
    UpdateSettings {
        settings: WatchdogSettings,
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    Settings {
        reply: oneshot::Sender<WatchdogSettings>,
    },
    Stats {
        reply: oneshot::Sender<WatchdogStats>,
    },
    VoiceUsers {
        reply: oneshot::Sender<Vec<WatchedUserView>>,
    },
    Shutdown,
}

/// Cloneable entry point into a running watchdog.
#[derive(Clone)]
pub struct WatchdogHandle {
    tx: mpsc::UnboundedSender<WatchdogInput>,
    events: broadcast::Sender<WatchdogEvent>,
}

/// Receiving side handed to [`crate::Watchdog::new`].
pub struct Mailbox {
    pub(crate) rx: mpsc::UnboundedReceiver<WatchdogInput>,
    pub(crate) handle: WatchdogHandle,
}

impl WatchdogHandle {
    /// Create a handle and the mailbox the watchdog will drain.
    ///
    /// The handle exists before the watchdog so the platform adapter can be
    /// built around it.
    pub fn channel() -> (Self, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let handle = Self { tx, events };
        (handle.clone(), Mailbox { rx, handle })
    }

    fn send(&self, input: WatchdogInput) -> Result<(), WardenError> {
        self.tx
            .send(input)
            .map_err(|_| WardenError::ChannelClosed("watchdog is not running".into()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WatchdogInput,
    ) -> Result<T, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await
            .map_err(|_| WardenError::ChannelClosed("watchdog dropped the request".into()))
    }

    pub fn join(
        &self,
        user_id: UserId,
        display_name: impl Into<String>,
        location: SessionLocation,
    ) -> Result<(), WardenError> {
        self.send(WatchdogInput::Join {
            user_id,
            display_name: display_name.into(),
            location,
        })
    }

    pub fn leave(&self, user_id: UserId) -> Result<(), WardenError> {
        self.send(WatchdogInput::Leave { user_id })
    }

    pub fn moved(
        &self,
        user_id: UserId,
        display_name: impl Into<String>,
        location: SessionLocation,
    ) -> Result<(), WardenError> {
        self.send(WatchdogInput::Move {
            user_id,
            display_name: display_name.into(),
            location,
        })
    }

    /// The confirmation marker was added to `message` by `user_id`.
    pub fn reaction_added(&self, user_id: UserId, message: MessageRef) -> Result<(), WardenError> {
        self.send(WatchdogInput::ReactionAdded { user_id, message })
    }

    pub fn text_command(&self, user_id: UserId, text: impl Into<String>) -> Result<(), WardenError> {
        self.send(WatchdogInput::TextCommand {
            user_id,
            text: text.into(),
        })
    }

    pub(crate) fn challenge_posted(
        &self,
        user_id: UserId,
        challenge_id: u64,
        result: Result<PostedChallenge, String>,
    ) -> Result<(), WardenError> {
        self.send(WatchdogInput::ChallengePosted {
            user_id,
            challenge_id,
            result,
        })
    }

    /// Validate and apply new settings. Timers already armed keep their schedule.
    pub async fn update_settings(&self, settings: WatchdogSettings) -> Result<(), WardenError> {
        self.request(|reply| WatchdogInput::UpdateSettings { settings, reply })
            .await?
    }

    pub async fn settings(&self) -> Result<WatchdogSettings, WardenError> {
        self.request(|reply| WatchdogInput::Settings { reply }).await
    }

    pub async fn stats(&self) -> Result<WatchdogStats, WardenError> {
        self.request(|reply| WatchdogInput::Stats { reply }).await
    }

    pub async fn voice_users(&self) -> Result<Vec<WatchedUserView>, WardenError> {
        self.request(|reply| WatchdogInput::VoiceUsers { reply }).await
    }

    /// Cancel every timer and stop the watchdog task.
    pub fn shutdown(&self) -> Result<(), WardenError> {
        self.send(WatchdogInput::Shutdown)
    }

    /// Advisory events published by the watchdog.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: WatchdogEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
