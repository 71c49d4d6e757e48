// src/analyze/mod.rs
//! Message classification: does a message thank someone, and whom?
//!
//! Resolution order once a thank word fired:
//! 1) reply → the referenced author (ANSWER),
//! 2) explicit mentions, when not more than `max_candidates` (MENTION),
//! 3) fuzzy names around every thank word (FUZZY).
//!
//! Misses are results, not errors. Platform lookups that fail degrade to
//! NO_MATCH (or an empty candidate pool) and are only logged.

pub mod context;
pub mod fuzzy;
pub mod text;

use crate::gateway::ChatGateway;
use crate::model::{Member, Message, ThankType, UserId};
use crate::settings::GuildSettings;
use crate::telemetry::anon_hash;
use metrics::counter;
use std::sync::Arc;

pub use context::{ContextResolver, MessageContext};
pub use fuzzy::{rank_candidates, FuzzyResolver, WeightedCandidate};
pub use text::{extract_mentions, lookaround_window, thank_word_indices, tokenize, ThankPattern, LOOKAROUND};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerResult {
    pub kind: ThankType,
    /// Set whenever a thank word fired, even without a receiver.
    pub donor: Option<UserId>,
    /// Ordered by descending weight.
    pub candidates: Vec<WeightedCandidate>,
    pub reference: Option<Message>,
}

impl AnalyzerResult {
    pub fn no_match() -> Self {
        Self {
            kind: ThankType::NoMatch,
            donor: None,
            candidates: Vec::new(),
            reference: None,
        }
    }

    /// Thank word fired but nobody could be resolved.
    pub fn no_target(donor: UserId) -> Self {
        Self {
            donor: Some(donor),
            ..Self::no_match()
        }
    }

    pub fn answer(donor: UserId, receiver: Member, reference: Message) -> Self {
        Self {
            kind: ThankType::Answer,
            donor: Some(donor),
            candidates: vec![WeightedCandidate::exact(receiver)],
            reference: Some(reference),
        }
    }

    pub fn mention(donor: UserId, receivers: Vec<Member>) -> Self {
        Self {
            kind: ThankType::Mention,
            donor: Some(donor),
            candidates: receivers.into_iter().map(WeightedCandidate::exact).collect(),
            reference: None,
        }
    }

    pub fn fuzzy(donor: UserId, candidates: Vec<WeightedCandidate>) -> Self {
        Self {
            kind: ThankType::Fuzzy,
            donor: Some(donor),
            candidates,
            reference: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.kind != ThankType::NoMatch
    }

    /// A thank word fired without any resolvable receiver.
    pub fn is_no_target(&self) -> bool {
        self.kind == ThankType::NoMatch && self.donor.is_some()
    }
}

pub struct MessageAnalyzer {
    gateway: Arc<dyn ChatGateway>,
    context: Arc<ContextResolver>,
    fuzzy: FuzzyResolver,
}

impl MessageAnalyzer {
    pub fn new(gateway: Arc<dyn ChatGateway>, context: Arc<ContextResolver>) -> Self {
        Self {
            gateway,
            context,
            fuzzy: FuzzyResolver::new(),
        }
    }

    pub async fn analyze(
        &self,
        pattern: &ThankPattern,
        message: &Message,
        settings: &GuildSettings,
        limit_targets: bool,
        max_candidates: usize,
    ) -> AnalyzerResult {
        counter!("reputation_messages_analyzed_total").increment(1);
        let result = self
            .classify(pattern, message, settings, limit_targets, max_candidates)
            .await;
        if result.is_match() || result.is_no_target() {
            counter!("reputation_matches_total", "kind" => result.kind.as_str()).increment(1);
            tracing::debug!(
                target: "analyzer",
                guild = %message.guild_id,
                message = %message.id,
                content = %anon_hash(&message.content),
                kind = %result.kind,
                candidates = result.candidates.len(),
                "message classified"
            );
        }
        result
    }

    async fn classify(
        &self,
        pattern: &ThankPattern,
        message: &Message,
        settings: &GuildSettings,
        limit_targets: bool,
        max_candidates: usize,
    ) -> AnalyzerResult {
        if pattern.is_empty() || !pattern.is_match(&message.content) {
            return AnalyzerResult::no_match();
        }
        let donor = message.author_id;

        if message.is_reply() {
            return self.resolve_answer(message).await;
        }

        let mentions = if message.mentions.is_empty() {
            extract_mentions(&message.content)
        } else {
            message.mentions.clone()
        };
        if !mentions.is_empty() && mentions.len() <= max_candidates {
            let mut members = Vec::with_capacity(mentions.len());
            for user in mentions {
                match self.gateway.member(message.guild_id, user).await {
                    Ok(Some(m)) => members.push(m),
                    Ok(None) => {}
                    Err(e) => tracing::debug!(target: "analyzer", user = %user, error = %e, "mention lookup failed"),
                }
            }
            if members.is_empty() {
                return AnalyzerResult::no_match();
            }
            return AnalyzerResult::mention(donor, members);
        }

        let candidates = self
            .resolve_fuzzy(pattern, message, settings, limit_targets, max_candidates)
            .await;
        if candidates.is_empty() {
            AnalyzerResult::no_target(donor)
        } else {
            AnalyzerResult::fuzzy(donor, candidates)
        }
    }

    async fn resolve_answer(&self, message: &Message) -> AnalyzerResult {
        let Some(ref_id) = message.reference else {
            return AnalyzerResult::no_match();
        };
        let reference = match self.gateway.message(message.channel_id, ref_id).await {
            Ok(Some(r)) => r,
            Ok(None) => return AnalyzerResult::no_match(),
            Err(e) => {
                tracing::debug!(target: "analyzer", message = %ref_id, error = %e, "reference lookup failed");
                return AnalyzerResult::no_match();
            }
        };
        match self.gateway.member(message.guild_id, reference.author_id).await {
            Ok(Some(receiver)) => AnalyzerResult::answer(message.author_id, receiver, reference),
            Ok(None) => {
                tracing::debug!(target: "analyzer", user = %reference.author_id, "referenced author left the guild");
                AnalyzerResult::no_match()
            }
            Err(e) => {
                tracing::debug!(target: "analyzer", user = %reference.author_id, error = %e, "member lookup failed");
                AnalyzerResult::no_match()
            }
        }
    }

    async fn resolve_fuzzy(
        &self,
        pattern: &ThankPattern,
        message: &Message,
        settings: &GuildSettings,
        limit_targets: bool,
        max_candidates: usize,
    ) -> Vec<WeightedCandidate> {
        let tokens = tokenize(&message.content);
        let indices = thank_word_indices(&tokens, pattern);
        if indices.is_empty() {
            return Vec::new();
        }

        let pool = if limit_targets {
            match self.context.combined_context(message, settings).await {
                Ok(ctx) => ctx.members().to_vec(),
                Err(e) => {
                    tracing::warn!(target: "analyzer", channel = %message.channel_id, error = %e, "context unavailable");
                    Vec::new()
                }
            }
        } else {
            match self.gateway.members(message.guild_id).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(target: "analyzer", guild = %message.guild_id, error = %e, "member list unavailable");
                    Vec::new()
                }
            }
        };
        if pool.is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for index in indices {
            let window = lookaround_window(tokens.len(), index, LOOKAROUND);
            for i in window.indices() {
                found.extend(self.fuzzy.resolve(tokens[i], &pool));
            }
        }
        rank_candidates(found, settings.thanking.fuzzy_threshold, max_candidates)
    }
}
