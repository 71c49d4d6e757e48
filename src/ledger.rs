// src/ledger.rs
//! Append-only reputation log and the read models derived from it.
//!
//! The store's uniqueness key `(guild, donor, receiver, message)` is the only
//! concurrency guard for duplicate submissions: a second insert of the same
//! key is a no-op that reports `false`, never an error.

use crate::model::{ChannelId, GuildId, MessageId, ThankType, UserId};
use crate::settings::ReputationMode;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationLogEntry {
    pub guild_id: GuildId,
    pub donor_id: UserId,
    pub receiver_id: UserId,
    pub message_id: MessageId,
    pub ref_message_id: Option<MessageId>,
    pub channel_id: ChannelId,
    pub cause: ThankType,
    pub received: DateTime<Utc>,
}

impl ReputationLogEntry {
    fn key(&self) -> EntryKey {
        (self.guild_id, self.donor_id, self.receiver_id, self.message_id)
    }
}

type EntryKey = (GuildId, UserId, UserId, MessageId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRank {
    pub rank: u64,
    pub user_id: UserId,
    pub reputation: u64,
}

/// Reputation Store collaborator backing the ledger.
#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Insert unless the key already exists. `Ok(false)` on duplicates.
    async fn insert_if_absent(&self, entry: ReputationLogEntry) -> Result<bool>;

    /// Delete every entry created by `message`; returns the number removed.
    async fn delete_by_message(&self, guild: GuildId, message: MessageId) -> Result<usize>;

    async fn entry_for_message(&self, guild: GuildId, message: MessageId) -> Result<Option<ReputationLogEntry>>;

    /// Exchange between `a` and `b` (either direction) closest in time to
    /// `at`, earlier or later.
    async fn nearest_exchange(
        &self,
        guild: GuildId,
        a: UserId,
        b: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Entries given by `donor` received in `[since, until]`; open bounds when `None`.
    async fn count_given(
        &self,
        guild: GuildId,
        donor: UserId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    async fn count_received(
        &self,
        guild: GuildId,
        receiver: UserId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    /// Received points per user, unordered.
    async fn totals(&self, guild: GuildId, since: Option<DateTime<Utc>>) -> Result<Vec<(UserId, u64)>>;
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: Vec<ReputationLogEntry>,
    keys: HashSet<EntryKey>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry in insertion order.
    pub fn entries(&self) -> Vec<ReputationLogEntry> {
        self.lock().entries.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn after(entry: &ReputationLogEntry, since: Option<DateTime<Utc>>) -> bool {
    since.map_or(true, |s| entry.received >= s)
}

fn within(entry: &ReputationLogEntry, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    after(entry, since) && until.map_or(true, |u| entry.received <= u)
}

#[async_trait]
impl ReputationStore for InMemoryStore {
    async fn insert_if_absent(&self, entry: ReputationLogEntry) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.keys.insert(entry.key()) {
            return Ok(false);
        }
        inner.entries.push(entry);
        Ok(true)
    }

    async fn delete_by_message(&self, guild: GuildId, message: MessageId) -> Result<usize> {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| !(e.guild_id == guild && e.message_id == message));
        inner
            .keys
            .retain(|(g, _, _, m)| !(*g == guild && *m == message));
        Ok(before - inner.entries.len())
    }

    async fn entry_for_message(&self, guild: GuildId, message: MessageId) -> Result<Option<ReputationLogEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .find(|e| e.guild_id == guild && e.message_id == message)
            .cloned())
    }

    async fn nearest_exchange(
        &self,
        guild: GuildId,
        a: UserId,
        b: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.guild_id == guild)
            .filter(|e| {
                (e.donor_id == a && e.receiver_id == b) || (e.donor_id == b && e.receiver_id == a)
            })
            .map(|e| e.received)
            .min_by_key(|t| at.signed_duration_since(*t).abs()))
    }

    async fn count_given(
        &self,
        guild: GuildId,
        donor: UserId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.guild_id == guild && e.donor_id == donor && within(e, since, until))
            .count() as u64)
    }

    async fn count_received(
        &self,
        guild: GuildId,
        receiver: UserId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.guild_id == guild && e.receiver_id == receiver && within(e, since, until))
            .count() as u64)
    }

    async fn totals(&self, guild: GuildId, since: Option<DateTime<Utc>>) -> Result<Vec<(UserId, u64)>> {
        let mut map: HashMap<UserId, u64> = HashMap::new();
        for e in self
            .lock()
            .entries
            .iter()
            .filter(|e| e.guild_id == guild && after(e, since))
        {
            *map.entry(e.receiver_id).or_default() += 1;
        }
        Ok(map.into_iter().collect())
    }
}

/// Ledger facade: idempotent writes, counters, and mode-aware aggregates.
#[derive(Clone)]
pub struct ReputationLedger {
    store: Arc<dyn ReputationStore>,
}

impl ReputationLedger {
    pub fn new(store: Arc<dyn ReputationStore>) -> Self {
        Self { store }
    }

    /// `Ok(true)` only for the first insert of a key.
    pub async fn record(&self, entry: ReputationLogEntry) -> Result<bool> {
        let cause = entry.cause;
        let (guild, donor, receiver, message) = entry.key();
        let inserted = self.store.insert_if_absent(entry).await?;
        if inserted {
            counter!("reputation_recorded_total", "kind" => cause.as_str()).increment(1);
            tracing::info!(
                target: "ledger",
                guild = %guild,
                donor = %donor,
                receiver = %receiver,
                message = %message,
                cause = %cause,
                "reputation recorded"
            );
        } else {
            counter!("reputation_duplicates_total").increment(1);
            tracing::debug!(target: "ledger", guild = %guild, message = %message, "duplicate entry ignored");
        }
        Ok(inserted)
    }

    pub async fn remove_all(&self, guild: GuildId, message: MessageId) -> Result<usize> {
        let removed = self.store.delete_by_message(guild, message).await?;
        if removed > 0 {
            tracing::info!(target: "ledger", guild = %guild, message = %message, removed, "entries removed");
        }
        Ok(removed)
    }

    pub async fn entry_for_message(&self, guild: GuildId, message: MessageId) -> Result<Option<ReputationLogEntry>> {
        self.store.entry_for_message(guild, message).await
    }

    /// Most recent exchange between the pair, in either direction.
    pub async fn last_exchange(&self, guild: GuildId, a: UserId, b: UserId) -> Result<Option<DateTime<Utc>>> {
        self.store.nearest_exchange(guild, a, b, DateTime::<Utc>::MAX_UTC).await
    }

    /// Exchange closest to `at`. History replays see later rows too.
    pub async fn nearest_exchange(
        &self,
        guild: GuildId,
        a: UserId,
        b: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.store.nearest_exchange(guild, a, b, at).await
    }

    /// Points given in the trailing window `[since, until]`.
    pub async fn given_since(
        &self,
        guild: GuildId,
        donor: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        self.store.count_given(guild, donor, Some(since), Some(until)).await
    }

    pub async fn received_since(
        &self,
        guild: GuildId,
        receiver: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        self.store.count_received(guild, receiver, Some(since), Some(until)).await
    }

    /// Reputation of `user` under `mode` evaluated at `now`.
    pub async fn total(&self, guild: GuildId, user: UserId, mode: ReputationMode, now: DateTime<Utc>) -> Result<u64> {
        self.store.count_received(guild, user, mode.since(now), None).await
    }

    /// Descending by reputation, ties by ascending user id. Ranks start at 1.
    pub async fn ranking(&self, guild: GuildId, mode: ReputationMode, now: DateTime<Utc>) -> Result<Vec<ReputationRank>> {
        let mut totals = self.store.totals(guild, mode.since(now)).await?;
        totals.retain(|(_, n)| *n > 0);
        totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(totals
            .into_iter()
            .enumerate()
            .map(|(i, (user_id, reputation))| ReputationRank {
                rank: i as u64 + 1,
                user_id,
                reputation,
            })
            .collect())
    }

    /// `None` when the user has no reputation under `mode`.
    pub async fn rank(
        &self,
        guild: GuildId,
        user: UserId,
        mode: ReputationMode,
        now: DateTime<Utc>,
    ) -> Result<Option<ReputationRank>> {
        Ok(self
            .ranking(guild, mode, now)
            .await?
            .into_iter()
            .find(|r| r.user_id == user))
    }
}
