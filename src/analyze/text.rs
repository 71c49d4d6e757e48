// src/analyze/text.rs
//! Thank-word detection primitives: pattern compilation, whitespace
//! tokenizer, thank-word positions, bounded lookaround windows and explicit
//! mention extraction.
//!
//! Notes:
//! - Patterns must be compatible with the `regex` crate (no lookarounds).
//! - Word lists are escaped and matched case-insensitively on word boundaries.

use crate::model::UserId;
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Tokens examined on each side of a thank word.
pub const LOOKAROUND: usize = 6;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(?P<id>\d{1,20})>").expect("mention regex"));

/// Compiled thank-word pattern. The empty pattern never matches.
#[derive(Debug, Clone, Default)]
pub struct ThankPattern {
    re: Option<Regex>,
}

impl ThankPattern {
    pub fn empty() -> Self {
        Self { re: None }
    }

    /// Build from plain words, e.g. `["thanks", "ty"]`.
    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let alts: Vec<String> = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        if alts.is_empty() {
            return Ok(Self::empty());
        }
        let re = Regex::new(&format!(r"(?i)\b(?:{})\b", alts.join("|")))
            .map_err(|e| anyhow!("thank words regex error: {e}"))?;
        Ok(Self { re: Some(re) })
    }

    /// Build from a raw regex. A blank pattern yields the empty pattern.
    pub fn from_regex(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Ok(Self::empty());
        }
        let re = Regex::new(pattern).map_err(|e| anyhow!("thank regex error: {e}"))?;
        Ok(Self { re: Some(re) })
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_none()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn as_str(&self) -> &str {
        self.re.as_ref().map(Regex::as_str).unwrap_or("")
    }
}

/// Split on whitespace; blank tokens never appear.
pub fn tokenize(input: &str) -> Vec<&str> {
    input.split_whitespace().collect()
}

/// Indices of every token that matches the pattern.
pub fn thank_word_indices(tokens: &[&str], pattern: &ThankPattern) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| pattern.is_match(t))
        .map(|(i, _)| i)
        .collect()
}

/// Token ranges around `index`, clamped to `[0, len)`; the index itself is
/// never part of either range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookaroundWindow {
    pub before: Range<usize>,
    pub after: Range<usize>,
}

impl LookaroundWindow {
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.before.clone().chain(self.after.clone())
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn lookaround_window(len: usize, index: usize, radius: usize) -> LookaroundWindow {
    if index >= len {
        return LookaroundWindow {
            before: 0..0,
            after: 0..0,
        };
    }
    LookaroundWindow {
        before: index.saturating_sub(radius)..index,
        after: (index + 1)..(index + 1 + radius).min(len),
    }
}

/// `<@id>` / `<@!id>` mentions in order of appearance, first occurrence wins.
pub fn extract_mentions(text: &str) -> Vec<UserId> {
    let mut out: Vec<UserId> = Vec::new();
    for caps in MENTION_RE.captures_iter(text) {
        let Some(id) = caps.name("id").and_then(|m| m.as_str().parse::<u64>().ok()) else {
            continue;
        };
        let id = UserId(id);
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
