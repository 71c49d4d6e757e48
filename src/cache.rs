use crate::model::{GuildId, Member, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
pub struct SeenMembers {
    ttl: Duration,
    last_seen: Mutex<HashMap<(GuildId, UserId), DateTime<Utc>>>,
}

impl SeenMembers {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn seen(&self, guild: GuildId, user: UserId, at: DateTime<Utc>) {
        let mut m = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let slot = m.entry((guild, user)).or_insert(at);
        if *slot < at {
            *slot = at;
        }
    }

    /// Never seen, or last seen at least one TTL ago.
    pub fn is_stale(&self, guild: GuildId, user: UserId, now: DateTime<Utc>) -> bool {
        let m = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        match m.get(&(guild, user)) {
            None => true,
            Some(at) => now.signed_duration_since(*at) >= self.ttl,
        }
    }

    /// Drop stale entries; returns how many were removed.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut m = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let before = m.len();
        let ttl = self.ttl;
        m.retain(|_, at| now.signed_duration_since(*at) < ttl);
        before - m.len()
    }

    /// Keep a member cached while a scan runs in their guild (the scan
    /// resolves authors constantly) or while they are recently seen.
    pub fn should_cache(&self, member: &Member, scan_running: bool, now: DateTime<Utc>) -> bool {
        scan_running || !self.is_stale(member.guild_id, member.user_id, now)
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
