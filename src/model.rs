// src/model.rs
//! Platform-owned entities the engine reads: ids, messages, members, and the
//! closed set of causes a reputation point can have.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

snowflake!(
    /// Guild (server) id.
    GuildId
);
snowflake!(
    /// User id; members share it across guilds.
    UserId
);
snowflake!(ChannelId);
snowflake!(MessageId);
snowflake!(RoleId);

/// Kind of a chat message as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Default,
    Reply,
    /// Joins, pins, boosts and other system messages.
    System,
}

/// Immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub kind: MessageKind,
    /// Message this one replies to.
    #[serde(default)]
    pub reference: Option<MessageId>,
    /// Users mentioned explicitly, in mention order.
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub webhook: bool,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.kind == MessageKind::Reply && self.reference.is_some()
    }

    /// Minutes between creation and `now`, floored at zero.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at)
            .num_minutes()
            .max(0)
    }
}

/// Guild member snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub bot: bool,
}

impl Member {
    /// Names a member can be addressed by in free text.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.nickname.as_deref())
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.name)
    }

    pub fn has_any_role(&self, roles: &[RoleId]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}

/// Cause of a reputation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThankType {
    NoMatch,
    /// Reply to the receiver's message.
    Answer,
    /// Explicit `<@id>` mention.
    Mention,
    /// Name resolved from free text.
    Fuzzy,
    /// Thank reaction on the receiver's message.
    Reaction,
    /// Single context candidate credited without a vote.
    Direct,
    /// Winner of a context vote.
    Embed,
}

impl ThankType {
    pub fn as_str(self) -> &'static str {
        match self {
            ThankType::NoMatch => "NO_MATCH",
            ThankType::Answer => "ANSWER",
            ThankType::Mention => "MENTION",
            ThankType::Fuzzy => "FUZZY",
            ThankType::Reaction => "REACTION",
            ThankType::Direct => "DIRECT",
            ThankType::Embed => "EMBED",
        }
    }
}

impl fmt::Display for ThankType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reaction emoji: unicode or a custom emoji id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Emoji {
    Custom(u64),
    Unicode(String),
}

impl Emoji {
    pub fn unicode(s: &str) -> Self {
        Emoji::Unicode(s.to_string())
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emoji::Custom(id) => write!(f, "<:e:{id}>"),
            Emoji::Unicode(s) => f.write_str(s),
        }
    }
}
