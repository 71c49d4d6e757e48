//! Weighted name-to-member matching.
//!
//! A free-text token is compared against every name a member can be addressed
//! by (user name, nickname, and each whitespace-separated part of those).
//! Weight in [0.0, 1.0]:
//! - exact (case-insensitive) match → 1.0
//! - otherwise `strsim::normalized_levenshtein`, lifted for prefix/substring
//!   hits of at least 3 chars so "ali" still finds "alice".
//!
//! Ordering is deterministic: descending by weight, ties keep first-encountered
//! order (stable sort).

use crate::model::{Member, UserId};
use std::cmp::Ordering;
use strsim::normalized_levenshtein;

/// Shortest token worth resolving.
const MIN_TOKEN_CHARS: usize = 2;
/// Shortest token for prefix/substring lifting.
const MIN_PARTIAL_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCandidate {
    pub member: Member,
    pub weight: f64,
}

impl WeightedCandidate {
    pub fn exact(member: Member) -> Self {
        Self {
            member,
            weight: 1.0,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.member.user_id
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyResolver;

impl FuzzyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Similarity between an already-cleaned token and one name.
    pub fn score(token: &str, name: &str) -> f64 {
        let name = name.trim().to_lowercase();
        if token.is_empty() || name.is_empty() {
            return 0.0;
        }
        if token == name {
            return 1.0;
        }
        let mut best = normalized_levenshtein(token, &name);

        let tlen = token.chars().count();
        let nlen = name.chars().count().max(1);
        if tlen >= MIN_PARTIAL_CHARS && tlen < nlen {
            let ratio = tlen as f64 / nlen as f64;
            if name.starts_with(token) {
                best = best.max(0.5 + 0.5 * ratio);
            } else if name.contains(token) {
                best = best.max(0.4 + 0.5 * ratio);
            }
        }
        best.clamp(0.0, 1.0)
    }

    /// Best score of `token` over all of a member's names.
    pub fn member_score(&self, token: &str, member: &Member) -> f64 {
        let mut best = 0.0f64;
        for name in member.names() {
            best = best.max(Self::score(token, name));
            if name.split_whitespace().nth(1).is_some() {
                for part in name.split_whitespace() {
                    best = best.max(Self::score(token, part));
                }
            }
        }
        best
    }

    /// Every non-bot member of `pool` with a positive weight for `token`,
    /// sorted descending by weight (ties keep pool order).
    pub fn resolve(&self, token: &str, pool: &[Member]) -> Vec<WeightedCandidate> {
        let token = clean_token(token);
        if token.chars().count() < MIN_TOKEN_CHARS {
            return Vec::new();
        }
        let mut out: Vec<WeightedCandidate> = pool
            .iter()
            .filter(|m| !m.bot)
            .filter_map(|m| {
                let w = self.member_score(&token, m);
                (w > 0.0).then(|| WeightedCandidate {
                    member: m.clone(),
                    weight: w,
                })
            })
            .collect();
        sort_desc(&mut out);
        out
    }
}

/// Lowercase, strip a leading `@` and surrounding punctuation.
pub fn clean_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .trim_start_matches('@')
        .to_lowercase()
}

/// Filter by `threshold`, drop duplicate members (highest weight kept at the
/// position of first encounter), sort descending, truncate to `limit`.
pub fn rank_candidates(
    candidates: Vec<WeightedCandidate>,
    threshold: f64,
    limit: usize,
) -> Vec<WeightedCandidate> {
    let mut out: Vec<WeightedCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates.into_iter().filter(|c| c.weight >= threshold) {
        match out.iter_mut().find(|o| o.member.user_id == c.member.user_id) {
            Some(existing) => {
                if c.weight > existing.weight {
                    existing.weight = c.weight;
                }
            }
            None => out.push(c),
        }
    }
    sort_desc(&mut out);
    out.truncate(limit);
    out
}

fn sort_desc(v: &mut [WeightedCandidate]) {
    v.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
}
