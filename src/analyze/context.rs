//! "Recently active" members of a channel.
//!
//! A context is computed on demand from a bounded history read (never cached):
//! - every non-bot author of a channel message inside the max-message-age
//!   window before the reference time,
//! - plus members who shared a voice channel with the anchor user inside the
//!   same window.
//!
//! `latest` keeps the raw messages (newest first) so staleness checks can ask
//! whether an old message is still part of the live conversation.

use crate::gateway::ChatGateway;
use crate::model::{Member, Message, MessageId, UserId};
use crate::settings::GuildSettings;
use crate::voice::VoiceActivity;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    members: Vec<Member>,
    latest: Vec<Message>,
}

impl MessageContext {
    pub fn new(members: Vec<Member>, latest: Vec<Message>) -> Self {
        Self { members, latest }
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user)
    }

    /// Members ordered by most recent activity first.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// The `n` newest channel messages at the reference time.
    pub fn latest_messages(&self, n: usize) -> &[Message] {
        &self.latest[..n.min(self.latest.len())]
    }

    pub fn is_latest(&self, id: MessageId, n: usize) -> bool {
        self.latest_messages(n).iter().any(|m| m.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub struct ContextResolver {
    gateway: Arc<dyn ChatGateway>,
    voice: Arc<VoiceActivity>,
    history_limit: usize,
}

impl ContextResolver {
    pub fn new(gateway: Arc<dyn ChatGateway>, voice: Arc<VoiceActivity>, history_limit: usize) -> Self {
        Self {
            gateway,
            voice,
            history_limit: history_limit.max(1),
        }
    }

    /// Context of `message` as of its own creation time: the message itself
    /// plus the history right before it. Used for live and replayed messages.
    pub async fn combined_context(&self, message: &Message, settings: &GuildSettings) -> Result<MessageContext> {
        let mut latest = Vec::with_capacity(self.history_limit);
        latest.push(message.clone());
        let before = self
            .gateway
            .history(message.channel_id, Some(message.id), self.history_limit - 1)
            .await?;
        latest.extend(before);
        self.build(latest, message.author_id, message, settings, message.created_at)
            .await
    }

    /// Context for a reaction: the channel as it looks at `now`, anchored on
    /// the reacting `actor` instead of the message author.
    pub async fn combined_context_for_actor(
        &self,
        actor: UserId,
        message: &Message,
        settings: &GuildSettings,
        now: DateTime<Utc>,
    ) -> Result<MessageContext> {
        let latest = self
            .gateway
            .history(message.channel_id, None, self.history_limit)
            .await?;
        self.build(latest, actor, message, settings, now).await
    }

    async fn build(
        &self,
        latest: Vec<Message>,
        anchor: UserId,
        message: &Message,
        settings: &GuildSettings,
        now: DateTime<Utc>,
    ) -> Result<MessageContext> {
        let since = settings
            .abuse
            .max_message_age()
            .map(|age| now - age);

        let mut order: Vec<UserId> = Vec::new();
        let mut seen: HashSet<UserId> = HashSet::new();
        for m in &latest {
            if m.author_is_bot || m.webhook || m.created_at > now {
                continue;
            }
            if since.is_some_and(|s| m.created_at < s) {
                continue;
            }
            if seen.insert(m.author_id) {
                order.push(m.author_id);
            }
        }

        let voice_since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        for user in self.voice.companions(message.guild_id, anchor, voice_since, now) {
            if seen.insert(user) {
                order.push(user);
            }
        }

        let mut members = Vec::with_capacity(order.len());
        for user in order {
            match self.gateway.member(message.guild_id, user).await {
                Ok(Some(m)) if !m.bot => members.push(m),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(target: "analyzer", user = %user, error = %e, "context member lookup failed");
                }
            }
        }

        tracing::debug!(
            target: "analyzer",
            guild = %message.guild_id,
            channel = %message.channel_id,
            members = members.len(),
            scanned = latest.len(),
            "context resolved"
        );
        Ok(MessageContext::new(members, latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{guild_member, text_message, InMemoryGateway};
    use crate::model::{ChannelId, GuildId};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn authors_inside_window_before_message() {
        let gw = Arc::new(InMemoryGateway::new());
        let g = GuildId(1);
        let ch = ChannelId(1);
        for id in 1..=4 {
            gw.add_member(guild_member(g, id, &format!("user{id}")));
        }
        // 1 wrote 40 min ago (outside), 2 and 3 recently, 4 after the message
        gw.push(text_message(g, ch, 1, 1, "old", t0() - Duration::minutes(40)));
        gw.push(text_message(g, ch, 2, 2, "hi", t0() - Duration::minutes(10)));
        gw.push(text_message(g, ch, 3, 3, "hello", t0() - Duration::minutes(5)));
        let target = text_message(g, ch, 4, 2, "thanks", t0());
        gw.push(target.clone());
        gw.push(text_message(g, ch, 5, 4, "later", t0() + Duration::minutes(1)));

        let resolver = ContextResolver::new(gw.clone(), Arc::new(VoiceActivity::new()), 100);
        let settings = GuildSettings::for_guild(g);
        let ctx = resolver.combined_context(&target, &settings).await.unwrap();

        let ids: Vec<u64> = ctx.members().iter().map(|m| m.user_id.0).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(!ctx.contains(UserId(4)));
        assert_eq!(ctx.latest_messages(2).len(), 2);
        assert!(ctx.is_latest(MessageId(4), 1));
        assert!(ctx.is_latest(MessageId(1), 10));
        assert!(!ctx.is_latest(MessageId(1), 3));
    }

    #[tokio::test]
    async fn actor_context_includes_voice_companions() {
        let gw = Arc::new(InMemoryGateway::new());
        let g = GuildId(1);
        let ch = ChannelId(1);
        gw.add_member(guild_member(g, 1, "donor"));
        gw.add_member(guild_member(g, 2, "talker"));
        let old = text_message(g, ch, 1, 2, "answer", t0() - Duration::hours(2));
        gw.push(old.clone());

        let voice = Arc::new(VoiceActivity::new());
        voice.join(g, UserId(1), ChannelId(50), t0() - Duration::minutes(10));
        voice.join(g, UserId(2), ChannelId(50), t0() - Duration::minutes(8));

        let resolver = ContextResolver::new(gw, voice, 100);
        let settings = GuildSettings::for_guild(g);
        let ctx = resolver
            .combined_context_for_actor(UserId(1), &old, &settings, t0())
            .await
            .unwrap();
        assert!(ctx.contains(UserId(2)));
        assert!(!ctx.contains(UserId(1)));
    }
}
