//! Choosing where a challenge is posted.

use afkwarden_core::TextChannelInfo;

/// Text channel names used when none matches the voice channel.
pub const FALLBACK_CHANNEL_NAMES: [&str; 2] = ["general", "chat"];

/// Pick the text channel for a challenge about `voice_channel_name`.
///
/// Preference order: a channel with the same name as the voice channel, then
/// one of [`FALLBACK_CHANNEL_NAMES`], then the first channel listed. `None`
/// means the guild has no text channel at all.
pub fn select_destination<'a>(
    channels: &'a [TextChannelInfo],
    voice_channel_name: &str,
) -> Option<&'a TextChannelInfo> {
    channels
        .iter()
        .find(|c| c.name == voice_channel_name)
        .or_else(|| {
            channels
                .iter()
                .find(|c| FALLBACK_CHANNEL_NAMES.contains(&c.name.as_str()))
        })
        .or_else(|| channels.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkwarden_core::ChannelId;

    fn text(id: u64, name: &str) -> TextChannelInfo {
        TextChannelInfo::new(ChannelId(id), name)
    }

    #[test]
    fn prefers_matching_name() {
        let channels = vec![text(1, "rules"), text(2, "general"), text(3, "gaming")];
        assert_eq!(select_destination(&channels, "gaming").unwrap().id, ChannelId(3));
    }

    #[test]
    fn falls_back_to_general_or_chat() {
        let channels = vec![text(1, "rules"), text(2, "chat")];
        assert_eq!(select_destination(&channels, "lounge").unwrap().id, ChannelId(2));
    }

    #[test]
    fn falls_back_to_first_channel() {
        let channels = vec![text(7, "rules"), text(8, "memes")];
        assert_eq!(select_destination(&channels, "lounge").unwrap().id, ChannelId(7));
    }

    #[test]
    fn none_without_text_channels() {
        assert!(select_destination(&[], "lounge").is_none());
    }
}
