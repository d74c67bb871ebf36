use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use afkwarden_core::{
    ChannelId, GuildId, MessageRef, NotificationChannel, TextChannelInfo, UserId,
};

/// Text channel every [`MockChannel`] starts with.
pub const MOCK_TEXT_CHANNEL: ChannelId = ChannelId(900);

/// A platform call recorded by [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    PostChallenge {
        destination: ChannelId,
        user_id: UserId,
        message: MessageRef,
    },
    AddReaction(MessageRef),
    PostConfirmation {
        challenge: MessageRef,
        reply: MessageRef,
    },
    PostFailureNotice {
        challenge: MessageRef,
        notice: MessageRef,
    },
    Delete(MessageRef),
    Disconnect(UserId),
}

#[derive(Default)]
struct MockState {
    presence: HashMap<UserId, ChannelId>,
    channel_names: HashMap<ChannelId, String>,
    text_channels: Vec<TextChannelInfo>,
    fail_posts: bool,
    panic_posts: bool,
    fail_presence: bool,
    fail_disconnect: bool,
    next_message_id: u64,
    calls: Vec<MockCall>,
}

/// In-process notification channel that records every call.
///
/// Members are absent until [`MockChannel::set_present`] puts them in a voice
/// channel; a successful disconnect removes them again.
pub struct MockChannel {
    state: Mutex<MockState>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    pub fn new() -> Self {
        let state = MockState {
            text_channels: vec![TextChannelInfo::new(MOCK_TEXT_CHANNEL, "general")],
            next_message_id: 1,
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_present(&self, user_id: UserId, channel_id: ChannelId) {
        self.state().presence.insert(user_id, channel_id);
    }

    pub fn set_absent(&self, user_id: UserId) {
        self.state().presence.remove(&user_id);
    }

    pub fn set_channel_name(&self, channel_id: ChannelId, name: impl Into<String>) {
        self.state().channel_names.insert(channel_id, name.into());
    }

    pub fn set_text_channels(&self, channels: Vec<TextChannelInfo>) {
        self.state().text_channels = channels;
    }

    pub fn fail_posts(&self, fail: bool) {
        self.state().fail_posts = fail;
    }

    /// Make `post_challenge` panic instead of returning.
    pub fn panic_posts(&self, panic: bool) {
        self.state().panic_posts = panic;
    }

    pub fn fail_presence(&self, fail: bool) {
        self.state().fail_presence = fail;
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.state().fail_disconnect = fail;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Challenges posted for `user_id`, oldest first.
    pub fn challenges_for(&self, user_id: UserId) -> Vec<MessageRef> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::PostChallenge { user_id: u, message, .. } if *u == user_id => {
                    Some(*message)
                }
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Delete(message) => Some(*message),
                _ => None,
            })
            .collect()
    }

    pub fn disconnected(&self) -> Vec<UserId> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Disconnect(user_id) => Some(*user_id),
                _ => None,
            })
            .collect()
    }

    fn next_message(state: &mut MockState, channel_id: ChannelId) -> MessageRef {
        let id = state.next_message_id;
        state.next_message_id += 1;
        MessageRef::new(channel_id, id)
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn current_voice_channel(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<ChannelId>> {
        let state = self.state();
        if state.fail_presence {
            bail!("presence lookup unavailable");
        }
        Ok(state.presence.get(&user_id).copied())
    }

    async fn channel_name(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<String>> {
        let state = self.state();
        Ok(Some(
            state
                .channel_names
                .get(&channel_id)
                .cloned()
                .unwrap_or_else(|| format!("voice-{channel_id}")),
        ))
    }

    async fn text_channels(&self, _guild_id: GuildId) -> Result<Vec<TextChannelInfo>> {
        Ok(self.state().text_channels.clone())
    }

    async fn post_challenge(
        &self,
        destination: &TextChannelInfo,
        user_id: UserId,
        _voice_channel_name: &str,
        _confirm_within: Duration,
    ) -> Result<MessageRef> {
        let mut state = self.state();
        if state.panic_posts {
            drop(state);
            panic!("challenge post panicked in #{}", destination.name);
        }
        if state.fail_posts {
            bail!("missing permissions in #{}", destination.name);
        }
        let message = Self::next_message(&mut state, destination.id);
        state.calls.push(MockCall::PostChallenge {
            destination: destination.id,
            user_id,
            message,
        });
        Ok(message)
    }

    async fn add_reaction_marker(&self, message: &MessageRef) -> Result<()> {
        self.state().calls.push(MockCall::AddReaction(*message));
        Ok(())
    }

    async fn post_confirmation(
        &self,
        challenge: &MessageRef,
        _user_id: UserId,
    ) -> Result<MessageRef> {
        let mut state = self.state();
        let reply = Self::next_message(&mut state, challenge.channel_id);
        state.calls.push(MockCall::PostConfirmation {
            challenge: *challenge,
            reply,
        });
        Ok(reply)
    }

    async fn post_failure_notice(
        &self,
        challenge: &MessageRef,
        _user_id: UserId,
        _voice_channel_name: &str,
    ) -> Result<MessageRef> {
        let mut state = self.state();
        let notice = Self::next_message(&mut state, challenge.channel_id);
        state.calls.push(MockCall::PostFailureNotice {
            challenge: *challenge,
            notice,
        });
        Ok(notice)
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<()> {
        self.state().calls.push(MockCall::Delete(*message));
        Ok(())
    }

    async fn disconnect_from_session(&self, _guild_id: GuildId, user_id: UserId) -> Result<()> {
        let mut state = self.state();
        if state.fail_disconnect {
            bail!("missing Move Members permission");
        }
        state.presence.remove(&user_id);
        state.calls.push(MockCall::Disconnect(user_id));
        Ok(())
    }
}
