use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

snowflake_id!(
    /// Stable platform identifier of a member.
    UserId
);
snowflake_id!(
    /// Realm (server) identifier.
    GuildId
);
snowflake_id!(
    /// Identifier of a voice or text channel inside a realm.
    ChannelId
);
snowflake_id!(
    /// Identifier of a posted message.
    MessageId
);

/// Handle to a message the bot posted, enough to react to, reply to, or delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(channel_id: impl Into<ChannelId>, message_id: impl Into<MessageId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// Where a member's voice session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLocation {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

impl SessionLocation {
    pub fn new(guild_id: impl Into<GuildId>, channel_id: impl Into<ChannelId>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// A text-capable channel that a challenge could be posted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

impl TextChannelInfo {
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_raw_numbers() {
        assert_eq!(UserId(42).to_string(), "42");
        assert_eq!(MessageRef::new(7, 9).to_string(), "7/9");
    }

    #[test]
    fn ids_parse_from_text() {
        let id: UserId = " 123456789012345678 ".parse().unwrap();
        assert_eq!(id, UserId(123_456_789_012_345_678));
        assert!("abc".parse::<GuildId>().is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&SessionLocation::new(1, 2)).unwrap();
        assert_eq!(json, r#"{"guildId":1,"channelId":2}"#);
    }
}
