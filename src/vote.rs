//! Receiver votes for thank messages without a resolvable target.
//!
//! The recent channel context (minus the donor, pre-filtered by the guard) is
//! offered as numbered candidates. A lone candidate is credited directly
//! (DIRECT) when `skip_single_embed` is on; otherwise a prompt is posted and
//! participants vote with number reactions until the session expires. The
//! plurality winner is credited as EMBED through the regular submit path; a
//! tie or an empty ballot credits nobody. Sessions live in memory only.

use crate::analyze::context::ContextResolver;
use crate::config::VoteConfig;
use crate::gateway::ChatGateway;
use crate::guard::markers;
use crate::model::{ChannelId, Emoji, GuildId, Member, Message, MessageId, ThankType, UserId};
use crate::scheduler::TaskScheduler;
use crate::service::{Credit, ReputationService, SubmitOutcome, Trigger};
use crate::settings::{GuildSettings, SettingsStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::gauge;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hard cap on offered candidates (one marker each).
pub const MAX_VOTE_CANDIDATES: usize = 10;

const NUMBER_MARKERS: [&str; MAX_VOTE_CANDIDATES] = [
    "1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟",
];

pub fn number_marker(index: usize) -> Option<Emoji> {
    NUMBER_MARKERS.get(index).map(|s| Emoji::unicode(s))
}

pub fn marker_index(emoji: &Emoji) -> Option<usize> {
    match emoji {
        Emoji::Unicode(s) => NUMBER_MARKERS.iter().position(|m| m == s),
        Emoji::Custom(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct VoteSession {
    /// Id of the prompt message carrying the number markers.
    pub prompt: MessageId,
    pub guild: GuildId,
    pub channel: ChannelId,
    /// The thank message being resolved.
    pub message: Message,
    pub donor: Member,
    pub candidates: Vec<Member>,
    votes: HashMap<UserId, usize>,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl VoteSession {
    /// Votes per candidate, in candidate order.
    pub fn tally(&self) -> Vec<usize> {
        let mut counts = vec![0; self.candidates.len()];
        for idx in self.votes.values() {
            counts[*idx] += 1;
        }
        counts
    }

    /// Plurality winner; `None` on a tie or without votes.
    pub fn winner(&self) -> Option<&Member> {
        let tally = self.tally();
        let max = *tally.iter().max()?;
        if max == 0 || tally.iter().filter(|c| **c == max).count() > 1 {
            return None;
        }
        let idx = tally.iter().position(|c| *c == max)?;
        self.candidates.get(idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoTargetOutcome {
    /// Nobody but the donor was active.
    EmptyContext,
    /// Everybody active failed the guard.
    NoEligible,
    Direct(SubmitOutcome),
    VoteOpened(MessageId),
}

pub struct VoteResolver {
    gateway: Arc<dyn ChatGateway>,
    context: Arc<ContextResolver>,
    service: Arc<ReputationService>,
    settings: Arc<dyn SettingsStore>,
    scheduler: Arc<TaskScheduler>,
    cfg: VoteConfig,
    sessions: Mutex<HashMap<MessageId, VoteSession>>,
}

impl VoteResolver {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        context: Arc<ContextResolver>,
        service: Arc<ReputationService>,
        settings: Arc<dyn SettingsStore>,
        scheduler: Arc<TaskScheduler>,
        cfg: VoteConfig,
    ) -> Self {
        Self {
            gateway,
            context,
            service,
            settings,
            scheduler,
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle a thank message whose analyzer result had no receiver.
    pub async fn resolve_no_target(
        self: &Arc<Self>,
        settings: &GuildSettings,
        donor: &Member,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<NoTargetOutcome> {
        let ctx = self.context.combined_context(message, settings).await?;
        let recent: Vec<&Member> = ctx
            .members()
            .iter()
            .filter(|m| m.user_id != donor.user_id)
            .collect();
        if recent.is_empty() {
            if settings.general.emoji_debug {
                self.service.mark(message, &markers::empty_context()).await;
            }
            return Ok(NoTargetOutcome::EmptyContext);
        }

        let limit = self.cfg.max_candidates.clamp(1, MAX_VOTE_CANDIDATES);
        let mut candidates = Vec::new();
        for member in recent {
            if candidates.len() >= limit {
                break;
            }
            if self
                .service
                .eligible_receiver(settings, donor, member, message, &ctx, now)
                .await?
            {
                candidates.push(member.clone());
            }
        }
        if candidates.is_empty() {
            if settings.general.emoji_debug {
                if let Some(m) = crate::guard::Rejection::Cooldown.marker() {
                    self.service.mark(message, &m).await;
                }
            }
            return Ok(NoTargetOutcome::NoEligible);
        }

        if candidates.len() == 1 && settings.messages.skip_single_embed {
            let credit = Credit {
                kind: ThankType::Direct,
                donor,
                receiver: &candidates[0],
                message,
                reference: None,
                now,
                trigger: Trigger::Live,
            };
            let outcome = self.service.submit_with_context(settings, credit, &ctx).await?;
            return Ok(NoTargetOutcome::Direct(outcome));
        }

        let prompt = self.open(settings, donor, message, candidates, now).await?;
        Ok(NoTargetOutcome::VoteOpened(prompt))
    }

    async fn open(
        self: &Arc<Self>,
        settings: &GuildSettings,
        donor: &Member,
        message: &Message,
        candidates: Vec<Member>,
        now: DateTime<Utc>,
    ) -> Result<MessageId> {
        let mut text = format!(
            "{} wants to thank someone. Vote for the receiver with the numbers below:",
            donor.display_name()
        );
        for (i, c) in candidates.iter().enumerate() {
            text.push_str(&format!("\n{} {}", NUMBER_MARKERS[i], c.display_name()));
        }
        let prompt = self.gateway.send_message(message.channel_id, &text).await?;
        for i in 0..candidates.len() {
            if let Some(marker) = number_marker(i) {
                self.gateway.add_reaction(message.channel_id, prompt, &marker).await?;
            }
        }
        if settings.general.emoji_debug {
            self.service.mark(message, &markers::vote_prompted()).await;
        }

        let duration = self.cfg.duration();
        let session = VoteSession {
            prompt,
            guild: message.guild_id,
            channel: message.channel_id,
            message: message.clone(),
            donor: donor.clone(),
            candidates,
            votes: HashMap::new(),
            created: now,
            expires: now + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()),
        };
        let open = {
            let mut s = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            s.insert(prompt, session);
            s.len()
        };
        gauge!("vote_sessions_open").set(open as f64);
        tracing::info!(target: "vote", guild = %message.guild_id, prompt = %prompt, "vote opened");

        let this = Arc::clone(self);
        self.scheduler.spawn_after("vote-expiry", duration, async move {
            if let Err(e) = this.close(prompt).await {
                tracing::warn!(target: "vote", prompt = %prompt, error = %e, "closing vote failed");
            }
        });
        Ok(prompt)
    }

    /// Count a reaction on a prompt. Returns whether it became a vote:
    /// bots and candidates voting for themselves are ignored, and a second
    /// vote by the same user replaces the first.
    pub fn register_vote(&self, prompt: MessageId, voter: UserId, voter_is_bot: bool, emoji: &Emoji) -> bool {
        if voter_is_bot {
            return false;
        }
        let Some(idx) = marker_index(emoji) else {
            return false;
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.get_mut(&prompt) else {
            return false;
        };
        match session.candidates.get(idx) {
            Some(c) if c.user_id != voter => {
                session.votes.insert(voter, idx);
                tracing::debug!(target: "vote", prompt = %prompt, voter = %voter, candidate = idx, "vote counted");
                true
            }
            _ => false,
        }
    }

    pub fn session(&self, prompt: MessageId) -> Option<VoteSession> {
        let s = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        s.get(&prompt).cloned()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// End a session and credit the winner. `Ok(None)` when the session is
    /// unknown (already closed) or nobody won.
    pub async fn close(&self, prompt: MessageId) -> Result<Option<SubmitOutcome>> {
        let (session, open) = {
            let mut s = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let session = s.remove(&prompt);
            (session, s.len())
        };
        let Some(session) = session else {
            return Ok(None);
        };
        gauge!("vote_sessions_open").set(open as f64);

        let Some(winner) = session.winner().cloned() else {
            tracing::info!(target: "vote", prompt = %prompt, "vote closed without a winner");
            self.edit_prompt(&session, "Vote closed. No receiver was chosen.").await;
            return Ok(None);
        };

        let settings = self.settings.get(session.guild).await?;
        let credit = Credit {
            kind: ThankType::Embed,
            donor: &session.donor,
            receiver: &winner,
            message: &session.message,
            reference: None,
            now: session.expires,
            trigger: Trigger::Live,
        };
        let outcome = self.service.submit(&settings, credit).await?;
        tracing::info!(
            target: "vote",
            prompt = %prompt,
            receiver = %winner.user_id,
            recorded = outcome.is_recorded(),
            "vote closed"
        );
        let text = if outcome.is_recorded() {
            format!("Vote closed. {} received the reputation.", winner.display_name())
        } else {
            "Vote closed. The reputation could not be given.".to_string()
        };
        self.edit_prompt(&session, &text).await;
        Ok(Some(outcome))
    }

    async fn edit_prompt(&self, session: &VoteSession, text: &str) {
        if let Err(e) = self.gateway.edit_message(session.channel, session.prompt, text).await {
            tracing::debug!(target: "vote", prompt = %session.prompt, error = %e, "prompt edit failed");
        }
    }
}
