//! Discord adapter.
//!
//! [`DiscordNotifier`] implements the watchdog's [`NotificationChannel`] on top
//! of serenity's HTTP client and cache. [`Handler`] is the thin gateway side:
//! it turns voice-state, reaction and message events into watchdog inputs and
//! does nothing else.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    Cache, ChannelId as DiscordChannelId, ChannelType, Client, Context, CreateMessage,
    EventHandler, GatewayIntents, GuildId as DiscordGuildId, Http, Message,
    MessageId as DiscordMessageId, Reaction, ReactionType, Ready, UserId as DiscordUserId,
    VoiceState,
};
use tracing::{debug, info, warn};

use afkwarden_core::{
    ChannelId, GuildId, MessageId, MessageRef, NotificationChannel, SessionLocation,
    TextChannelInfo, UserId, WardenError,
};
use afkwarden_watchdog::WatchdogHandle;

/// Reaction a member adds to confirm presence.
pub const CONFIRM_MARKER: &str = "✅";

fn snowflake(raw: u64) -> Result<NonZeroU64> {
    NonZeroU64::new(raw).context("0 is not a valid Discord id")
}

fn guild(id: GuildId) -> Result<DiscordGuildId> {
    Ok(DiscordGuildId::from(snowflake(id.get())?))
}

fn channel(id: ChannelId) -> Result<DiscordChannelId> {
    Ok(DiscordChannelId::from(snowflake(id.get())?))
}

fn message(id: MessageId) -> Result<DiscordMessageId> {
    Ok(DiscordMessageId::from(snowflake(id.get())?))
}

fn user(id: UserId) -> Result<DiscordUserId> {
    Ok(DiscordUserId::from(snowflake(id.get())?))
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef::new(msg.channel_id.get(), msg.id.get())
}

/// "2 minutes", "1 minute", "30 seconds".
pub fn describe_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}

pub fn challenge_text(
    user_id: UserId,
    voice_channel_name: &str,
    confirm_token: &str,
    confirm_within: Duration,
) -> String {
    format!(
        "⚠️ <@{user_id}> Are you still here in **{voice_channel_name}**? \
         Click {CONFIRM_MARKER} or type `{confirm_token}` within {} to confirm, \
         or you will be disconnected.",
        describe_duration(confirm_within)
    )
}

pub fn confirmation_text(user_id: UserId) -> String {
    format!("{CONFIRM_MARKER} <@{user_id}> Confirmed! You can stay in the voice channel.")
}

pub fn failure_notice_text(user_id: UserId, voice_channel_name: &str) -> String {
    format!("⏱️ <@{user_id}> You were disconnected from **{voice_channel_name}** for not responding.")
}

/// Serenity-backed [`NotificationChannel`].
pub struct DiscordNotifier {
    http: Arc<Http>,
    cache: Arc<Cache>,
    confirm_token: String,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, confirm_token: impl Into<String>) -> Self {
        Self {
            http,
            cache,
            confirm_token: confirm_token.into(),
        }
    }

    async fn reply(&self, to: &MessageRef, content: String) -> Result<MessageRef> {
        let channel_id = channel(to.channel_id)?;
        let builder = CreateMessage::new()
            .content(content)
            .reference_message((channel_id, message(to.message_id)?));
        let sent = channel_id
            .send_message((&self.cache, &*self.http), builder)
            .await
            .with_context(|| format!("reply to {to}"))?;
        Ok(message_ref(&sent))
    }
}

#[async_trait]
impl NotificationChannel for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn current_voice_channel(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<ChannelId>> {
        let (id, user_id) = (guild(guild_id)?, user(user_id)?);
        // An uncached guild means presence is unknown, not absent.
        let current = self
            .cache
            .guild(id)
            .with_context(|| format!("guild {guild_id} is not cached"))?
            .voice_states
            .get(&user_id)
            .and_then(|state| state.channel_id);
        Ok(current.map(|c| ChannelId(c.get())))
    }

    async fn channel_name(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<String>> {
        let (guild_id, channel_id) = (guild(guild_id)?, channel(channel_id)?);
        Ok(self
            .cache
            .guild(guild_id)
            .and_then(|g| g.channels.get(&channel_id).map(|c| c.name.clone())))
    }

    async fn text_channels(&self, guild_id: GuildId) -> Result<Vec<TextChannelInfo>> {
        let id = guild(guild_id)?;
        let mut channels: Vec<(u16, DiscordChannelId, String)> = self
            .cache
            .guild(id)
            .with_context(|| format!("guild {guild_id} is not cached"))?
            .channels
            .values()
            .filter(|c| matches!(c.kind, ChannelType::Text | ChannelType::News))
            .map(|c| (c.position, c.id, c.name.clone()))
            .collect();
        channels.sort();
        Ok(channels
            .into_iter()
            .map(|(_, id, name)| TextChannelInfo::new(id.get(), name))
            .collect())
    }

    async fn post_challenge(
        &self,
        destination: &TextChannelInfo,
        user_id: UserId,
        voice_channel_name: &str,
        confirm_within: Duration,
    ) -> Result<MessageRef> {
        let content = challenge_text(user_id, voice_channel_name, &self.confirm_token, confirm_within);
        let sent = channel(destination.id)?
            .say(&*self.http, content)
            .await
            .with_context(|| format!("send challenge to #{}", destination.name))?;
        Ok(message_ref(&sent))
    }

    async fn add_reaction_marker(&self, msg: &MessageRef) -> Result<()> {
        channel(msg.channel_id)?
            .create_reaction(
                &*self.http,
                message(msg.message_id)?,
                ReactionType::Unicode(CONFIRM_MARKER.to_string()),
            )
            .await
            .with_context(|| format!("react to {msg}"))?;
        Ok(())
    }

    async fn post_confirmation(&self, challenge: &MessageRef, user_id: UserId) -> Result<MessageRef> {
        self.reply(challenge, confirmation_text(user_id)).await
    }

    async fn post_failure_notice(
        &self,
        challenge: &MessageRef,
        user_id: UserId,
        voice_channel_name: &str,
    ) -> Result<MessageRef> {
        self.reply(challenge, failure_notice_text(user_id, voice_channel_name))
            .await
    }

    async fn delete_message(&self, msg: &MessageRef) -> Result<()> {
        channel(msg.channel_id)?
            .delete_message(&*self.http, message(msg.message_id)?)
            .await
            .with_context(|| format!("delete {msg}"))?;
        Ok(())
    }

    async fn disconnect_from_session(&self, guild_id: GuildId, user_id: UserId) -> Result<()> {
        guild(guild_id)?
            .disconnect_member((&self.cache, &*self.http), user(user_id)?)
            .await
            .with_context(|| format!("disconnect {user_id} in guild {guild_id}"))?;
        Ok(())
    }
}

/// How a voice-state update changes a member's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    Joined(ChannelId),
    Left,
    Moved(ChannelId),
}

pub fn voice_transition(
    before: Option<ChannelId>,
    after: Option<ChannelId>,
) -> Option<VoiceTransition> {
    match (before, after) {
        (None, Some(to)) => Some(VoiceTransition::Joined(to)),
        (Some(_), None) => Some(VoiceTransition::Left),
        (Some(from), Some(to)) if from != to => Some(VoiceTransition::Moved(to)),
        // Mute, deafen, stream toggles.
        _ => None,
    }
}

/// Whether a chat message is the confirmation command.
pub fn is_confirm_text(text: &str, confirm_token: &str) -> bool {
    text.trim().eq_ignore_ascii_case(confirm_token.trim())
}

/// Gateway event handler feeding the watchdog.
pub struct Handler {
    watchdog: WatchdogHandle,
    confirm_token: String,
}

impl Handler {
    pub fn new(watchdog: WatchdogHandle, confirm_token: impl Into<String>) -> Self {
        Self {
            watchdog,
            confirm_token: confirm_token.into(),
        }
    }
}

fn forward(result: Result<(), WardenError>) {
    if let Err(e) = result {
        warn!(error = %e, "Watchdog is not accepting events");
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(bot = %ready.user.name, guilds = ready.guilds.len(), "Discord connected");
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        if new.member.as_ref().is_some_and(|m| m.user.bot) {
            return;
        }

        let user_id = UserId(new.user_id.get());
        let display_name = new
            .member
            .as_ref()
            .map(|m| m.display_name().to_string())
            .unwrap_or_else(|| user_id.to_string());
        let before = old.and_then(|s| s.channel_id).map(|c| ChannelId(c.get()));
        let after = new.channel_id.map(|c| ChannelId(c.get()));

        let Some(transition) = voice_transition(before, after) else {
            return;
        };
        debug!(user = %user_id, ?transition, "Voice state changed");

        let guild_id = GuildId(guild_id.get());
        forward(match transition {
            VoiceTransition::Joined(to) => self.watchdog.join(
                user_id,
                display_name,
                SessionLocation::new(guild_id, to),
            ),
            VoiceTransition::Left => self.watchdog.leave(user_id),
            VoiceTransition::Moved(to) => self.watchdog.moved(
                user_id,
                display_name,
                SessionLocation::new(guild_id, to),
            ),
        });
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let Some(reactor) = reaction.user_id else {
            return;
        };
        if reactor == ctx.cache.current_user().id
            || reaction.member.as_ref().is_some_and(|m| m.user.bot)
        {
            return;
        }
        if !reaction.emoji.unicode_eq(CONFIRM_MARKER) {
            return;
        }
        forward(self.watchdog.reaction_added(
            UserId(reactor.get()),
            MessageRef::new(reaction.channel_id.get(), reaction.message_id.get()),
        ));
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot || !is_confirm_text(&msg.content, &self.confirm_token) {
            return;
        }
        forward(self.watchdog.text_command(UserId(msg.author.id.get()), msg.content));
    }
}

/// Builds the serenity client around a watchdog handle.
pub struct DiscordAdapter {
    token: String,
    confirm_token: String,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>, confirm_token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            confirm_token: confirm_token.into(),
        }
    }

    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::GUILD_VOICE_STATES
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
            | GatewayIntents::MESSAGE_CONTENT
    }

    /// Build the client and the notifier the watchdog posts through.
    /// The gateway connection starts with `client.start()`.
    pub async fn connect(&self, watchdog: WatchdogHandle) -> Result<(Client, Arc<DiscordNotifier>)> {
        info!("Starting Discord adapter");
        let client = Client::builder(&self.token, Self::intents())
            .event_handler(Handler::new(watchdog, self.confirm_token.clone()))
            .await
            .context("build Discord client")?;
        let notifier = Arc::new(DiscordNotifier::new(
            Arc::clone(&client.http),
            Arc::clone(&client.cache),
            self.confirm_token.clone(),
        ));
        Ok((client, notifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(Duration::from_secs(120)), "2 minutes");
        assert_eq!(describe_duration(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_duration(Duration::from_secs(30)), "30 seconds");
        assert_eq!(describe_duration(Duration::from_secs(90)), "90 seconds");
    }

    #[test]
    fn challenge_mentions_member_and_token() {
        let text = challenge_text(UserId(42), "Lounge", "!here", Duration::from_secs(120));
        assert!(text.contains("<@42>"));
        assert!(text.contains("**Lounge**"));
        assert!(text.contains("`!here`"));
        assert!(text.contains("within 2 minutes"));
    }

    #[test]
    fn notices_mention_member() {
        assert!(confirmation_text(UserId(7)).starts_with("✅ <@7>"));
        assert!(failure_notice_text(UserId(7), "Lounge").contains("**Lounge**"));
    }

    #[test]
    fn voice_transitions() {
        let a = Some(ChannelId(1));
        let b = Some(ChannelId(2));
        assert_eq!(voice_transition(None, a), Some(VoiceTransition::Joined(ChannelId(1))));
        assert_eq!(voice_transition(a, None), Some(VoiceTransition::Left));
        assert_eq!(voice_transition(a, b), Some(VoiceTransition::Moved(ChannelId(2))));
        assert_eq!(voice_transition(a, a), None);
        assert_eq!(voice_transition(None, None), None);
    }

    #[test]
    fn only_the_confirm_command_is_forwarded() {
        assert!(is_confirm_text("!here", "!here"));
        assert!(is_confirm_text("  !HERE \n", "!here"));
        assert!(!is_confirm_text("here", "!here"));
        assert!(!is_confirm_text("!here now", "!here"));
    }

    #[tokio::test]
    async fn uncached_guild_is_a_lookup_error() {
        let notifier = DiscordNotifier::new(
            Arc::new(Http::new("test-token")),
            Arc::new(Cache::new()),
            "!here",
        );
        let err = notifier
            .current_voice_channel(GuildId(1), UserId(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("guild 1 is not cached"));
    }

    #[test]
    fn zero_ids_are_rejected() {
        assert!(guild(GuildId(0)).is_err());
        assert_eq!(user(UserId(5)).unwrap().get(), 5);
    }
}
