use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ChannelId, GuildId, MessageRef, TextChannelInfo, UserId};

/// Everything the watchdog needs from the chat platform.
///
/// Calls are expected to fail fast; the watchdog wraps none of them in
/// timeouts of its own.
#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    /// Platform name for logging.
    fn name(&self) -> &str;

    /// The voice channel the member currently occupies in `guild_id`, if any.
    async fn current_voice_channel(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<ChannelId>>;

    /// Display name of a channel, if it still exists.
    async fn channel_name(&self, guild_id: GuildId, channel_id: ChannelId)
        -> Result<Option<String>>;

    /// Top-level text-capable channels of the guild, in platform order.
    async fn text_channels(&self, guild_id: GuildId) -> Result<Vec<TextChannelInfo>>;

    /// Post the presence challenge mentioning `user_id`.
    async fn post_challenge(
        &self,
        destination: &TextChannelInfo,
        user_id: UserId,
        voice_channel_name: &str,
        confirm_within: Duration,
    ) -> Result<MessageRef>;

    /// Add the confirmation marker reaction to a posted challenge.
    async fn add_reaction_marker(&self, message: &MessageRef) -> Result<()>;

    /// Reply to a challenge acknowledging the confirmation.
    async fn post_confirmation(&self, challenge: &MessageRef, user_id: UserId)
        -> Result<MessageRef>;

    /// Reply to a challenge announcing the member was removed.
    async fn post_failure_notice(
        &self,
        challenge: &MessageRef,
        user_id: UserId,
        voice_channel_name: &str,
    ) -> Result<MessageRef>;

    async fn delete_message(&self, message: &MessageRef) -> Result<()>;

    /// Force the member out of their voice session.
    async fn disconnect_from_session(&self, guild_id: GuildId, user_id: UserId) -> Result<()>;
}
