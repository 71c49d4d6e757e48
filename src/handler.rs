// src/handler.rs
//! Platform events → handlers.
//!
//! Handlers are registered per `EventKind` in a `Dispatcher` table. Each one is
//! a small struct holding its collaborators; none of them keeps per-guild
//! locks, so events of different messages run in parallel on the pool.

use crate::analyze::{ContextResolver, MessageAnalyzer};
use crate::cache::SeenMembers;
use crate::gateway::ChatGateway;
use crate::guard::markers;
use crate::ledger::ReputationLedger;
use crate::model::{ChannelId, Emoji, GuildId, Message, MessageId, MessageKind, ThankType, UserId};
use crate::service::{Credit, ReputationService, Trigger};
use crate::settings::SettingsStore;
use crate::vote::{marker_index, VoteResolver};
use crate::voice::VoiceActivity;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    MessageCreate {
        message: Message,
    },
    MessageDelete {
        guild: GuildId,
        channel: ChannelId,
        message_id: MessageId,
    },
    BulkDelete {
        guild: GuildId,
        channel: ChannelId,
        message_ids: Vec<MessageId>,
    },
    ReactionAdd {
        guild: GuildId,
        channel: ChannelId,
        message_id: MessageId,
        user: UserId,
        #[serde(default)]
        user_is_bot: bool,
        emoji: Emoji,
        /// Event time; live events leave it empty and use the clock.
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    VoiceJoin {
        guild: GuildId,
        user: UserId,
        channel: ChannelId,
        at: DateTime<Utc>,
    },
    VoiceLeave {
        guild: GuildId,
        user: UserId,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreate,
    MessageDelete,
    ReactionAdd,
    Voice,
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::MessageCreate { .. } => EventKind::MessageCreate,
            GatewayEvent::MessageDelete { .. } | GatewayEvent::BulkDelete { .. } => EventKind::MessageDelete,
            GatewayEvent::ReactionAdd { .. } => EventKind::ReactionAdd,
            GatewayEvent::VoiceJoin { .. } | GatewayEvent::VoiceLeave { .. } => EventKind::Voice,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &GatewayEvent) -> Result<()>;
}

/// Dispatch table keyed by event kind.
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    workers: usize,
}

impl Dispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            workers: workers.max(1),
        }
    }

    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler registered for the event's kind. All handlers run
    /// even if one fails; the last error is returned.
    pub async fn dispatch(&self, event: &GatewayEvent) -> Result<()> {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            return Ok(());
        };
        let mut failure = None;
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::warn!(target: "dispatch", kind = ?event.kind(), error = %e, "handler failed");
                failure = Some(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Drain `events` onto a pool of at most `workers` concurrent dispatches.
    /// Returns once the channel is closed and in-flight events are done.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<GatewayEvent>) {
        let permits = Arc::new(Semaphore::new(self.workers));
        while let Some(event) = events.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let _ = this.dispatch(&event).await;
                drop(permit);
            });
        }
        // wait for the pool to drain
        let _ = permits.acquire_many(self.workers as u32).await;
        tracing::debug!(target: "dispatch", "event loop stopped");
    }
}

/// New messages: analyze, then credit every candidate or hand a
/// receiver-less thank over to the vote resolver.
pub struct MessageHandler {
    pub gateway: Arc<dyn ChatGateway>,
    pub settings: Arc<dyn SettingsStore>,
    pub analyzer: Arc<MessageAnalyzer>,
    pub context: Arc<ContextResolver>,
    pub service: Arc<ReputationService>,
    pub vote: Arc<VoteResolver>,
    pub seen: Arc<SeenMembers>,
}

impl MessageHandler {
    async fn on_message(&self, message: &Message) -> Result<()> {
        if message.author_is_bot || message.webhook || message.kind == MessageKind::System {
            return Ok(());
        }
        let settings = self.settings.get(message.guild_id).await?;
        if !settings.thanking.channels.is_enabled(message.channel_id) {
            return Ok(());
        }
        let now = message.created_at;
        self.seen.seen(message.guild_id, message.author_id, now);

        let Some(donor) = self.gateway.member(message.guild_id, message.author_id).await? else {
            return Ok(());
        };
        if !settings.thanking.donor_allowed(&donor.roles) {
            return Ok(());
        }

        let result = self
            .analyzer
            .analyze(
                settings.thank_pattern(),
                message,
                &settings,
                true,
                settings.abuse.max_message_reputation,
            )
            .await;
        if (result.is_match() || result.is_no_target()) && settings.general.emoji_debug {
            self.service.mark(message, &markers::thank_word_found()).await;
        }

        if result.is_no_target() {
            if settings.messages.is_active(ThankType::Embed) {
                let outcome = self.vote.resolve_no_target(&settings, &donor, message, now).await?;
                tracing::debug!(target: "vote", message = %message.id, outcome = ?outcome, "no-target thank resolved");
            }
            return Ok(());
        }
        if !result.is_match() {
            return Ok(());
        }

        let context = self.context.combined_context(message, &settings).await?;
        for candidate in &result.candidates {
            let credit = Credit {
                kind: result.kind,
                donor: &donor,
                receiver: &candidate.member,
                message,
                reference: result.reference.as_ref(),
                now,
                trigger: Trigger::Live,
            };
            let receiver = candidate.member.user_id;
            if let Err(e) = self.service.submit_with_context(&settings, credit, &context).await {
                tracing::warn!(
                    target: "reputation",
                    message = %message.id,
                    receiver = %receiver,
                    error = %e,
                    "credit failed"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    async fn handle(&self, event: &GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::MessageCreate { message } => self.on_message(message).await,
            _ => Ok(()),
        }
    }
}

/// Reactions: votes on open prompts, otherwise reaction thanks.
pub struct ReactionHandler {
    pub gateway: Arc<dyn ChatGateway>,
    pub settings: Arc<dyn SettingsStore>,
    pub service: Arc<ReputationService>,
    pub vote: Arc<VoteResolver>,
}

impl ReactionHandler {
    #[allow(clippy::too_many_arguments)]
    async fn on_reaction(
        &self,
        guild: GuildId,
        channel: ChannelId,
        message_id: MessageId,
        user: UserId,
        user_is_bot: bool,
        emoji: &Emoji,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.vote.session(message_id).is_some() {
            if marker_index(emoji).is_some() {
                self.vote.register_vote(message_id, user, user_is_bot, emoji);
            }
            return Ok(());
        }
        if user_is_bot {
            return Ok(());
        }
        let settings = self.settings.get(guild).await?;
        if !settings.thanking.reactions.is_reaction(emoji) || !settings.messages.is_active(ThankType::Reaction) {
            return Ok(());
        }
        let Some(message) = self.gateway.message(channel, message_id).await? else {
            return Ok(());
        };
        let Some(donor) = self.gateway.member(guild, user).await? else {
            return Ok(());
        };
        // reacting to a thank message credits whoever was thanked in it
        let receiver_id = match self.service.ledger().entry_for_message(guild, message_id).await? {
            Some(entry) => entry.receiver_id,
            None => message.author_id,
        };
        let Some(receiver) = self.gateway.member(guild, receiver_id).await? else {
            return Ok(());
        };
        let credit = Credit {
            kind: ThankType::Reaction,
            donor: &donor,
            receiver: &receiver,
            message: &message,
            reference: None,
            now: at,
            trigger: Trigger::Live,
        };
        self.service.submit(&settings, credit).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ReactionHandler {
    async fn handle(&self, event: &GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::ReactionAdd {
                guild,
                channel,
                message_id,
                user,
                user_is_bot,
                emoji,
                at,
            } => {
                let at = at.unwrap_or_else(Utc::now);
                self.on_reaction(*guild, *channel, *message_id, *user, *user_is_bot, emoji, at)
                    .await
            }
            _ => Ok(()),
        }
    }
}

/// Deleted messages take their reputation with them.
pub struct DeleteHandler {
    pub ledger: ReputationLedger,
}

#[async_trait]
impl EventHandler for DeleteHandler {
    async fn handle(&self, event: &GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::MessageDelete { guild, message_id, .. } => {
                self.ledger.remove_all(*guild, *message_id).await?;
            }
            GatewayEvent::BulkDelete { guild, message_ids, .. } => {
                for id in message_ids {
                    self.ledger.remove_all(*guild, *id).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

pub struct VoiceHandler {
    pub voice: Arc<VoiceActivity>,
}

#[async_trait]
impl EventHandler for VoiceHandler {
    async fn handle(&self, event: &GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::VoiceJoin { guild, user, channel, at } => self.voice.join(*guild, *user, *channel, *at),
            GatewayEvent::VoiceLeave { guild, user, at } => self.voice.leave(*guild, *user, *at),
            _ => {}
        }
        Ok(())
    }
}
