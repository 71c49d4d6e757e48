//! In-memory collaborators for the replay binary and tests.
//!
//! `InMemoryGateway` keeps channel histories ordered by message id and records
//! every outbound write (sent/edited messages, reactions) so callers can
//! assert on them. `InMemoryRoleDirectory` keeps member roles per guild.

use crate::gateway::ChatGateway;
use crate::model::{ChannelId, Emoji, GuildId, Member, Message, MessageId, MessageKind, RoleId, UserId};
use crate::roles::RoleDirectory;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

/// First id handed out for messages sent through the gateway.
const SENT_ID_BASE: u64 = 1 << 60;

/// Plain member without roles.
pub fn guild_member(guild: GuildId, id: u64, name: &str) -> Member {
    Member {
        user_id: UserId(id),
        guild_id: guild,
        name: name.to_string(),
        nickname: None,
        roles: Vec::new(),
        bot: false,
    }
}

/// Plain (non-reply) text message.
pub fn text_message(
    guild: GuildId,
    channel: ChannelId,
    id: u64,
    author: u64,
    content: &str,
    at: DateTime<Utc>,
) -> Message {
    Message {
        id: MessageId(id),
        guild_id: guild,
        channel_id: channel,
        author_id: UserId(author),
        content: content.to_string(),
        created_at: at,
        kind: MessageKind::Default,
        reference: None,
        mentions: Vec::new(),
        author_is_bot: false,
        webhook: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub id: MessageId,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    members: RwLock<HashMap<(GuildId, UserId), Member>>,
    channels: RwLock<HashMap<ChannelId, BTreeMap<MessageId, Message>>>,
    sent: RwLock<Vec<SentMessage>>,
    reactions: RwLock<Vec<(ChannelId, MessageId, Emoji)>>,
    next_id: AtomicU64,
    history_calls: AtomicUsize,
    fail_history: AtomicBool,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, member: Member) {
        let mut m = self.members.write().unwrap_or_else(|e| e.into_inner());
        m.insert((member.guild_id, member.user_id), member);
    }

    pub fn remove_member(&self, guild: GuildId, user: UserId) {
        let mut m = self.members.write().unwrap_or_else(|e| e.into_inner());
        m.remove(&(guild, user));
    }

    /// Store a message in its channel history.
    pub fn push(&self, message: Message) {
        let mut c = self.channels.write().unwrap_or_else(|e| e.into_inner());
        c.entry(message.channel_id).or_default().insert(message.id, message);
    }

    pub fn remove_message(&self, channel: ChannelId, id: MessageId) {
        let mut c = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = c.get_mut(&channel) {
            h.remove(&id);
        }
    }

    /// Make every following history read fail.
    pub fn set_history_failure(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Current content of every message sent through the gateway (edits applied).
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reactions_on(&self, id: MessageId) -> Vec<Emoji> {
        self.reactions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, m, _)| *m == id)
            .map(|(_, _, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl ChatGateway for InMemoryGateway {
    async fn member(&self, guild: GuildId, user: UserId) -> Result<Option<Member>> {
        let m = self.members.read().unwrap_or_else(|e| e.into_inner());
        Ok(m.get(&(guild, user)).cloned())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>> {
        let m = self.members.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Member> = m.values().filter(|m| m.guild_id == guild).cloned().collect();
        out.sort_by_key(|m| m.user_id);
        Ok(out)
    }

    async fn message(&self, channel: ChannelId, id: MessageId) -> Result<Option<Message>> {
        let c = self.channels.read().unwrap_or_else(|e| e.into_inner());
        Ok(c.get(&channel).and_then(|h| h.get(&id)).cloned())
    }

    async fn history(&self, channel: ChannelId, before: Option<MessageId>, limit: usize) -> Result<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(anyhow!("history unavailable for channel {channel}"));
        }
        let c = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let Some(h) = c.get(&channel) else {
            return Ok(Vec::new());
        };
        let upper = before.unwrap_or(MessageId(u64::MAX));
        Ok(h.range(..upper)
            .rev()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<MessageId> {
        let id = MessageId(SENT_ID_BASE + self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut s = self.sent.write().unwrap_or_else(|e| e.into_inner());
        s.push(SentMessage {
            channel,
            id,
            content: content.to_string(),
        });
        Ok(id)
    }

    async fn edit_message(&self, channel: ChannelId, id: MessageId, content: &str) -> Result<()> {
        let mut s = self.sent.write().unwrap_or_else(|e| e.into_inner());
        let msg = s
            .iter_mut()
            .find(|m| m.channel == channel && m.id == id)
            .ok_or_else(|| anyhow!("unknown message {id}"))?;
        msg.content = content.to_string();
        Ok(())
    }

    async fn add_reaction(&self, channel: ChannelId, id: MessageId, emoji: &Emoji) -> Result<()> {
        let mut r = self.reactions.write().unwrap_or_else(|e| e.into_inner());
        r.push((channel, id, emoji.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    roles: RwLock<HashMap<(GuildId, UserId), Vec<RoleId>>>,
    denied: RwLock<HashSet<RoleId>>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_roles(&self, guild: GuildId, user: UserId, roles: Vec<RoleId>) {
        let mut r = self.roles.write().unwrap_or_else(|e| e.into_inner());
        r.insert((guild, user), roles);
    }

    pub fn roles_of(&self, guild: GuildId, user: UserId) -> Vec<RoleId> {
        let r = self.roles.read().unwrap_or_else(|e| e.into_inner());
        r.get(&(guild, user)).cloned().unwrap_or_default()
    }

    /// Mark a role as above the bot in the hierarchy.
    pub fn deny(&self, role: RoleId) {
        let mut d = self.denied.write().unwrap_or_else(|e| e.into_inner());
        d.insert(role);
    }
}

#[async_trait]
impl RoleDirectory for InMemoryRoleDirectory {
    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Option<Vec<RoleId>>> {
        let r = self.roles.read().unwrap_or_else(|e| e.into_inner());
        Ok(r.get(&(guild, user)).cloned())
    }

    async fn can_manage(&self, _guild: GuildId, role: RoleId) -> Result<bool> {
        let d = self.denied.read().unwrap_or_else(|e| e.into_inner());
        Ok(!d.contains(&role))
    }

    async fn modify_member_roles(&self, guild: GuildId, user: UserId, add: &[RoleId], remove: &[RoleId]) -> Result<()> {
        let mut r = self.roles.write().unwrap_or_else(|e| e.into_inner());
        let roles = r.entry((guild, user)).or_default();
        roles.retain(|x| !remove.contains(x));
        for role in add {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        Ok(())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<UserId>> {
        let r = self.roles.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<UserId> = r.keys().filter(|(g, _)| *g == guild).map(|(_, u)| *u).collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn history_pages_newest_first_with_exclusive_cursor() {
        let gw = InMemoryGateway::new();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for id in 1..=5 {
            gw.push(text_message(GuildId(1), ChannelId(1), id, 1, "x", t));
        }
        let page = gw.history(ChannelId(1), None, 2).await.unwrap();
        let ids: Vec<u64> = page.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![5, 4]);
        let page = gw.history(ChannelId(1), Some(MessageId(4)), 10).await.unwrap();
        let ids: Vec<u64> = page.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(gw.history_calls(), 2);
    }

    #[tokio::test]
    async fn edits_replace_sent_content() {
        let gw = InMemoryGateway::new();
        let id = gw.send_message(ChannelId(3), "0%").await.unwrap();
        gw.edit_message(ChannelId(3), id, "100%").await.unwrap();
        assert_eq!(gw.sent_messages()[0].content, "100%");
        assert!(gw.edit_message(ChannelId(3), MessageId(1), "x").await.is_err());
    }
}
