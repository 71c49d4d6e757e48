//! Reputation tiers → member roles.
//!
//! `target_roles` is the pure mapping; `RoleAssigner` diffs it against the
//! member's current roles and applies the result through the Role Directory.
//! Recomputation is idempotent, so a bulk refresh and live updates for the
//! same member converge without extra coordination.

use crate::ledger::ReputationLedger;
use crate::model::{GuildId, RoleId, UserId};
use crate::settings::{GuildSettings, RoleTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleAssignError {
    /// The bot may not add or remove this role (hierarchy or permission).
    #[error("missing access to role {0}")]
    RoleAccess(RoleId),
    #[error(transparent)]
    Directory(#[from] anyhow::Error),
}

/// Role Directory collaborator.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// `Ok(None)` when the user is not a guild member.
    async fn member_roles(&self, guild: GuildId, user: UserId) -> anyhow::Result<Option<Vec<RoleId>>>;

    async fn can_manage(&self, guild: GuildId, role: RoleId) -> anyhow::Result<bool>;

    async fn modify_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        add: &[RoleId],
        remove: &[RoleId],
    ) -> anyhow::Result<()>;

    async fn members(&self, guild: GuildId) -> anyhow::Result<Vec<UserId>>;
}

/// Tier roles a member with `total` reputation should hold.
///
/// Stacking: every tier whose threshold is met. Otherwise only the highest
/// qualifying tier. `tiers` may be in any order.
pub fn target_roles(tiers: &[RoleTier], total: u64, stacking: bool) -> Vec<RoleId> {
    let mut reached: Vec<&RoleTier> = tiers.iter().filter(|t| t.threshold <= total).collect();
    reached.sort_by_key(|t| (t.threshold, t.role_id));
    if stacking {
        reached.into_iter().map(|t| t.role_id).collect()
    } else {
        reached.last().map(|t| vec![t.role_id]).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDiff {
    pub add: Vec<RoleId>,
    pub remove: Vec<RoleId>,
}

impl RoleDiff {
    /// Only tier roles are ever touched; other roles of the member stay.
    pub fn compute(current: &[RoleId], tiers: &[RoleTier], target: &[RoleId]) -> Self {
        let add = target
            .iter()
            .copied()
            .filter(|r| !current.contains(r))
            .collect();
        let remove = current
            .iter()
            .copied()
            .filter(|r| tiers.iter().any(|t| t.role_id == *r) && !target.contains(r))
            .collect();
        Self { add, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    fn roles(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.add.iter().chain(self.remove.iter()).copied()
    }
}

/// Outcome of a guild-wide refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub checked: usize,
    pub changed: usize,
    /// Roles the bot could not manage, deduplicated.
    pub denied: Vec<RoleId>,
}

pub struct RoleAssigner {
    directory: Arc<dyn RoleDirectory>,
    ledger: ReputationLedger,
}

impl RoleAssigner {
    pub fn new(directory: Arc<dyn RoleDirectory>, ledger: ReputationLedger) -> Self {
        Self { directory, ledger }
    }

    /// Bring `user`'s tier roles in line with their reputation. Returns the
    /// applied diff (empty when nothing changed or the user left the guild).
    /// Permission is checked for every role before anything is applied.
    pub async fn update(
        &self,
        settings: &GuildSettings,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<RoleDiff, RoleAssignError> {
        let guild = settings.guild_id;
        if settings.tiers.is_empty() {
            return Ok(RoleDiff::default());
        }
        let Some(current) = self.directory.member_roles(guild, user).await? else {
            return Ok(RoleDiff::default());
        };
        let total = self
            .ledger
            .total(guild, user, settings.general.reputation_mode, now)
            .await?;
        let target = target_roles(&settings.tiers, total, settings.general.stack_roles);
        let diff = RoleDiff::compute(&current, &settings.tiers, &target);
        if diff.is_empty() {
            return Ok(diff);
        }

        for role in diff.roles() {
            if !self.directory.can_manage(guild, role).await? {
                counter!("reputation_role_errors_total").increment(1);
                tracing::warn!(target: "roles", guild = %guild, user = %user, role = %role, "cannot manage role");
                return Err(RoleAssignError::RoleAccess(role));
            }
        }

        self.directory
            .modify_member_roles(guild, user, &diff.add, &diff.remove)
            .await?;
        tracing::info!(
            target: "roles",
            guild = %guild,
            user = %user,
            total,
            added = diff.add.len(),
            removed = diff.remove.len(),
            "tier roles updated"
        );
        Ok(diff)
    }

    /// Recompute every member. Access failures are collected and the refresh
    /// goes on; directory failures abort.
    pub async fn refresh_all(
        &self,
        settings: &GuildSettings,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RoleAssignError> {
        let mut summary = RefreshSummary::default();
        for user in self.directory.members(settings.guild_id).await? {
            summary.checked += 1;
            match self.update(settings, user, now).await {
                Ok(diff) if !diff.is_empty() => summary.changed += 1,
                Ok(_) => {}
                Err(RoleAssignError::RoleAccess(role)) => {
                    if !summary.denied.contains(&role) {
                        summary.denied.push(role);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            target: "roles",
            guild = %settings.guild_id,
            checked = summary.checked,
            changed = summary.changed,
            denied = summary.denied.len(),
            "role refresh finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryStore, ReputationLogEntry};
    use crate::memory::InMemoryRoleDirectory;
    use crate::model::{ChannelId, MessageId, ThankType};
    use chrono::TimeZone;

    fn tiers() -> Vec<RoleTier> {
        vec![
            RoleTier { role_id: RoleId(30), threshold: 10 },
            RoleTier { role_id: RoleId(10), threshold: 1 },
            RoleTier { role_id: RoleId(20), threshold: 5 },
        ]
    }

    #[test]
    fn stacking_vs_single() {
        assert_eq!(target_roles(&tiers(), 0, true), Vec::<RoleId>::new());
        assert_eq!(target_roles(&tiers(), 5, true), vec![RoleId(10), RoleId(20)]);
        assert_eq!(target_roles(&tiers(), 5, false), vec![RoleId(20)]);
        assert_eq!(target_roles(&tiers(), 99, false), vec![RoleId(30)]);
    }

    #[test]
    fn diff_leaves_foreign_roles_alone() {
        let current = vec![RoleId(10), RoleId(77)];
        let diff = RoleDiff::compute(&current, &tiers(), &[RoleId(20)]);
        assert_eq!(diff.add, vec![RoleId(20)]);
        assert_eq!(diff.remove, vec![RoleId(10)]);
    }

    async fn ledger_with(points: u64, user: UserId) -> ReputationLedger {
        let ledger = ReputationLedger::new(Arc::new(InMemoryStore::new()));
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for i in 0..points {
            ledger
                .record(ReputationLogEntry {
                    guild_id: GuildId(1),
                    donor_id: UserId(100 + i),
                    receiver_id: user,
                    message_id: MessageId(i),
                    ref_message_id: None,
                    channel_id: ChannelId(1),
                    cause: ThankType::Mention,
                    received: t,
                })
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn update_applies_diff() {
        let user = UserId(7);
        let ledger = ledger_with(6, user).await;
        let dir = Arc::new(InMemoryRoleDirectory::new());
        dir.set_roles(GuildId(1), user, vec![RoleId(10)]);
        let assigner = RoleAssigner::new(dir.clone(), ledger);
        let mut settings = GuildSettings::for_guild(GuildId(1));
        settings.tiers = tiers();

        let diff = assigner.update(&settings, user, Utc::now()).await.unwrap();
        assert_eq!(diff.add, vec![RoleId(20)]);
        assert_eq!(dir.roles_of(GuildId(1), user), vec![RoleId(20)]);
        // second run is a no-op
        assert!(assigner.update(&settings, user, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_access_fails_before_applying() {
        let user = UserId(7);
        let ledger = ledger_with(6, user).await;
        let dir = Arc::new(InMemoryRoleDirectory::new());
        dir.set_roles(GuildId(1), user, vec![RoleId(10)]);
        dir.deny(RoleId(10));
        let assigner = RoleAssigner::new(dir.clone(), ledger);
        let mut settings = GuildSettings::for_guild(GuildId(1));
        settings.tiers = tiers();

        let err = assigner.update(&settings, user, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RoleAssignError::RoleAccess(RoleId(10))));
        assert_eq!(dir.roles_of(GuildId(1), user), vec![RoleId(10)]);

        let summary = assigner.refresh_all(&settings, Utc::now()).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.denied, vec![RoleId(10)]);
    }
}
