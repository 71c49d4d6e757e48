// src/service.rs
//! Single write path for reputation: guard → ledger → roles.
//!
//! Every credit (answer, mention, fuzzy, reaction, direct, vote) goes through
//! `ReputationService::submit`, so abuse protection applies uniformly no
//! matter which path produced the candidate.

use crate::analyze::context::{ContextResolver, MessageContext};
use crate::gateway::ChatGateway;
use crate::guard::{AbuseGuard, GuardInput, LedgerFacts, Rejection};
use crate::ledger::{ReputationLedger, ReputationLogEntry};
use crate::model::{Emoji, Member, Message, RoleId, ThankType};
use crate::roles::{RoleAssignError, RoleAssigner};
use crate::settings::GuildSettings;
use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;

/// Where a credit originates. Replayed credits never touch the channel
/// (no markers, no error messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Live,
    Replay,
}

/// One candidate credit.
#[derive(Debug, Clone, Copy)]
pub struct Credit<'a> {
    pub kind: ThankType,
    pub donor: &'a Member,
    pub receiver: &'a Member,
    pub message: &'a Message,
    pub reference: Option<&'a Message>,
    /// Evaluation time; replay uses the message's creation time.
    pub now: DateTime<Utc>,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded {
        /// Tier role the bot could not manage; the entry stays recorded.
        role_denied: Option<RoleId>,
    },
    Duplicate,
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, SubmitOutcome::Recorded { .. })
    }
}

fn recorded_marker() -> Emoji {
    Emoji::unicode("✅")
}

pub struct ReputationService {
    gateway: Arc<dyn ChatGateway>,
    context: Arc<ContextResolver>,
    ledger: ReputationLedger,
    roles: Arc<RoleAssigner>,
    guard: AbuseGuard,
}

impl ReputationService {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        context: Arc<ContextResolver>,
        ledger: ReputationLedger,
        roles: Arc<RoleAssigner>,
    ) -> Self {
        Self {
            gateway,
            context,
            ledger,
            roles,
            guard: AbuseGuard::new(),
        }
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    /// Context the guard uses for `credit`: reactions are anchored on the
    /// reacting donor at evaluation time, everything else on the message.
    pub async fn context_for(&self, settings: &GuildSettings, credit: &Credit<'_>) -> Result<MessageContext> {
        match credit.kind {
            ThankType::Reaction => {
                self.context
                    .combined_context_for_actor(credit.donor.user_id, credit.message, settings, credit.now)
                    .await
            }
            _ => self.context.combined_context(credit.message, settings).await,
        }
    }

    pub async fn submit(&self, settings: &GuildSettings, credit: Credit<'_>) -> Result<SubmitOutcome> {
        let context = self.context_for(settings, &credit).await?;
        self.submit_with_context(settings, credit, &context).await
    }

    /// Same as `submit` with a context computed once for several candidates.
    pub async fn submit_with_context(
        &self,
        settings: &GuildSettings,
        credit: Credit<'_>,
        context: &MessageContext,
    ) -> Result<SubmitOutcome> {
        let guild = settings.guild_id;
        let facts = self.facts(settings, &credit).await?;
        let input = GuardInput {
            kind: credit.kind,
            donor: credit.donor,
            receiver: credit.receiver,
            message: credit.message,
            reference: credit.reference,
            context,
            settings,
            now: credit.now,
        };
        if let Err(rejection) = self.guard.evaluate(&input, &facts) {
            counter!("reputation_rejections_total", "reason" => rejection.as_str()).increment(1);
            tracing::debug!(
                target: "guard",
                guild = %guild,
                donor = %credit.donor.user_id,
                receiver = %credit.receiver.user_id,
                message = %credit.message.id,
                reason = %rejection,
                "credit rejected"
            );
            if credit.trigger == Trigger::Live && settings.general.emoji_debug {
                if let Some(marker) = rejection.marker() {
                    self.mark(credit.message, &marker).await;
                }
            }
            return Ok(SubmitOutcome::Rejected(rejection));
        }

        let entry = ReputationLogEntry {
            guild_id: guild,
            donor_id: credit.donor.user_id,
            receiver_id: credit.receiver.user_id,
            message_id: credit.message.id,
            ref_message_id: credit.reference.map(|r| r.id),
            channel_id: credit.message.channel_id,
            cause: credit.kind,
            received: credit.now,
        };
        if !self.ledger.record(entry).await? {
            return Ok(SubmitOutcome::Duplicate);
        }
        if credit.trigger == Trigger::Live {
            self.mark(credit.message, &recorded_marker()).await;
        }

        let role_denied = match self.roles.update(settings, credit.receiver.user_id, credit.now).await {
            Ok(_) => None,
            Err(RoleAssignError::RoleAccess(role)) => {
                if credit.trigger == Trigger::Live {
                    let text = format!("I lack the permission to manage the role <@&{role}>. Move my role above it.");
                    if let Err(e) = self.gateway.send_message(credit.message.channel_id, &text).await {
                        tracing::warn!(target: "roles", channel = %credit.message.channel_id, error = %e, "role error report failed");
                    }
                }
                Some(role)
            }
            Err(RoleAssignError::Directory(e)) => {
                tracing::warn!(target: "roles", guild = %guild, error = %e, "role update failed");
                None
            }
        };
        Ok(SubmitOutcome::Recorded { role_denied })
    }

    /// Whether `receiver` would pass the guard for a context credit by
    /// `donor` on `message`. Used to pre-filter vote candidates.
    pub async fn eligible_receiver(
        &self,
        settings: &GuildSettings,
        donor: &Member,
        receiver: &Member,
        message: &Message,
        context: &MessageContext,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let credit = Credit {
            kind: ThankType::Embed,
            donor,
            receiver,
            message,
            reference: None,
            now,
            trigger: Trigger::Replay,
        };
        let facts = self.facts(settings, &credit).await?;
        let input = GuardInput {
            kind: credit.kind,
            donor,
            receiver,
            message,
            reference: None,
            context,
            settings,
            now,
        };
        Ok(self.guard.evaluate(&input, &facts).is_ok())
    }

    async fn facts(&self, settings: &GuildSettings, credit: &Credit<'_>) -> Result<LedgerFacts> {
        let guild = settings.guild_id;
        let abuse = &settings.abuse;
        let donor = credit.donor.user_id;
        let receiver = credit.receiver.user_id;
        let nearest_exchange = self
            .ledger
            .nearest_exchange(guild, donor, receiver, credit.now)
            .await?;
        let given_in_window = if abuse.max_given > 0 {
            self.ledger
                .given_since(guild, donor, credit.now - abuse.given_window(), credit.now)
                .await?
        } else {
            0
        };
        let received_in_window = if abuse.max_received > 0 {
            self.ledger
                .received_since(guild, receiver, credit.now - abuse.received_window(), credit.now)
                .await?
        } else {
            0
        };
        Ok(LedgerFacts {
            nearest_exchange,
            given_in_window,
            received_in_window,
        })
    }

    /// Best-effort reaction on `message`.
    pub async fn mark(&self, message: &Message, emoji: &Emoji) {
        if let Err(e) = self.gateway.add_reaction(message.channel_id, message.id, emoji).await {
            tracing::debug!(target: "guard", message = %message.id, error = %e, "marker reaction failed");
        }
    }
}
