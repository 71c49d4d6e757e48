//! Voice channel co-presence, fed by join/leave events.
//!
//! A member who shared a voice channel with the donor inside the context
//! window counts as "recently active" just like a chat author.

use crate::model::{ChannelId, GuildId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Presence {
    user: UserId,
    channel: ChannelId,
    joined: DateTime<Utc>,
    left: Option<DateTime<Utc>>,
}

impl Presence {
    fn end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.left.unwrap_or(now)
    }

    fn overlaps(&self, other: &Presence, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let start = self.joined.max(other.joined).max(since);
        let end = self.end(now).min(other.end(now));
        start <= end
    }
}

#[derive(Debug, Default)]
pub struct VoiceActivity {
    guilds: RwLock<HashMap<GuildId, Vec<Presence>>>,
}

impl VoiceActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join; an open presence in another channel is closed first
    /// (a move).
    pub fn join(&self, guild: GuildId, user: UserId, channel: ChannelId, at: DateTime<Utc>) {
        let mut g = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        let list = g.entry(guild).or_default();
        close_open(list, user, at);
        list.push(Presence {
            user,
            channel,
            joined: at,
            left: None,
        });
    }

    pub fn leave(&self, guild: GuildId, user: UserId, at: DateTime<Utc>) {
        let mut g = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = g.get_mut(&guild) {
            close_open(list, user, at);
        }
    }

    /// Users who were in a voice channel together with `user` at some point
    /// in `[since, now]`. `user` is not part of the result.
    pub fn companions(
        &self,
        guild: GuildId,
        user: UserId,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<UserId> {
        let g = self.guilds.read().unwrap_or_else(|e| e.into_inner());
        let Some(list) = g.get(&guild) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for mine in list.iter().filter(|p| p.user == user) {
            for other in list
                .iter()
                .filter(|p| p.user != user && p.channel == mine.channel)
            {
                if mine.overlaps(other, since, now) && !out.contains(&other.user) {
                    out.push(other.user);
                }
            }
        }
        out
    }

    /// Drop closed presences that ended before `cutoff`.
    pub fn prune(&self, cutoff: DateTime<Utc>) {
        let mut g = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        for list in g.values_mut() {
            list.retain(|p| p.left.map_or(true, |l| l >= cutoff));
        }
        g.retain(|_, list| !list.is_empty());
    }
}

fn close_open(list: &mut [Presence], user: UserId, at: DateTime<Utc>) {
    for p in list.iter_mut().filter(|p| p.user == user && p.left.is_none()) {
        p.left = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn overlapping_presences_are_companions() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 20, 0, 0).unwrap();
        let v = VoiceActivity::new();
        let g = GuildId(1);
        v.join(g, UserId(1), ChannelId(9), t0);
        v.join(g, UserId(2), ChannelId(9), t0 + Duration::minutes(5));
        v.join(g, UserId(3), ChannelId(8), t0 + Duration::minutes(5));
        v.leave(g, UserId(2), t0 + Duration::minutes(10));

        let now = t0 + Duration::minutes(20);
        assert_eq!(v.companions(g, UserId(1), t0, now), vec![UserId(2)]);
        // window starts after user 2 left
        assert!(v
            .companions(g, UserId(1), t0 + Duration::minutes(11), now)
            .is_empty());
    }

    #[test]
    fn moving_channels_closes_previous_presence() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 20, 0, 0).unwrap();
        let v = VoiceActivity::new();
        let g = GuildId(1);
        v.join(g, UserId(1), ChannelId(1), t0);
        v.join(g, UserId(1), ChannelId(2), t0 + Duration::minutes(1));
        v.join(g, UserId(2), ChannelId(1), t0 + Duration::minutes(2));
        let now = t0 + Duration::minutes(3);
        assert!(v.companions(g, UserId(2), t0, now).is_empty());

        v.prune(now);
        v.join(g, UserId(3), ChannelId(2), now);
        assert_eq!(v.companions(g, UserId(1), now, now), vec![UserId(3)]);
    }
}
