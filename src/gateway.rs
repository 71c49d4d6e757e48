// src/gateway.rs
//! Chat platform seam: member lookup, channel history and the few write
//! operations the engine performs (status messages, marker reactions).
//!
//! History is paged newest-first with an exclusive `before` cursor, matching
//! how the platform REST API pages channel messages.

use crate::model::{ChannelId, Emoji, GuildId, Member, Message, MessageId, UserId};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// `Ok(None)` when the user is not (or no longer) a guild member.
    async fn member(&self, guild: GuildId, user: UserId) -> Result<Option<Member>>;

    /// Full guild membership.
    async fn members(&self, guild: GuildId) -> Result<Vec<Member>>;

    async fn message(&self, channel: ChannelId, id: MessageId) -> Result<Option<Message>>;

    /// Up to `limit` messages strictly older than `before` (newest first);
    /// `before = None` starts at the newest message of the channel.
    async fn history(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<MessageId>;

    async fn edit_message(&self, channel: ChannelId, id: MessageId, content: &str) -> Result<()>;

    async fn add_reaction(&self, channel: ChannelId, id: MessageId, emoji: &Emoji) -> Result<()>;
}
