// src/settings.rs
//! Per-guild settings read by the engine, plus the Settings Store seam.
//!
//! Settings are owned by the guild and only mutated by administrative commands
//! outside this crate; the engine reads an `Arc<GuildSettings>` snapshot per
//! event. Every field has a default so partially filled TOML/JSON loads.
//!
//! TOML shape accepted by `load_guild_settings_from`:
//! ```toml
//! [[guild]]
//! guild_id = 1
//! [guild.thanking]
//! thank_words = ["thanks", "ty"]
//! [guild.abuse]
//! cooldown_minutes = 30
//! [[guild.tiers]]
//! role_id = 10
//! threshold = 5
//! ```

use crate::analyze::text::ThankPattern;
use crate::model::{ChannelId, Emoji, GuildId, Message, RoleId, ThankType};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: GuildId,
    #[serde(default)]
    pub thanking: Thanking,
    #[serde(default)]
    pub abuse: AbuseProtection,
    #[serde(default)]
    pub messages: MessageToggles,
    #[serde(default)]
    pub general: General,
    /// Reputation tiers; order in the file does not matter.
    #[serde(default)]
    pub tiers: Vec<RoleTier>,
    #[serde(skip)]
    pattern: OnceCell<ThankPattern>,
}

impl GuildSettings {
    pub fn for_guild(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Compiled thank-word pattern, built on first use. An invalid custom
    /// regex degrades to the empty pattern (which never matches).
    pub fn thank_pattern(&self) -> &ThankPattern {
        self.pattern.get_or_init(|| match self.thanking.compile_pattern() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(target: "settings", guild = %self.guild_id, error = %e, "invalid thank pattern");
                ThankPattern::empty()
            }
        })
    }

    /// Tiers sorted ascending by threshold.
    pub fn sorted_tiers(&self) -> Vec<RoleTier> {
        let mut tiers = self.tiers.clone();
        tiers.sort_by_key(|t| (t.threshold, t.role_id));
        tiers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thanking {
    #[serde(default = "default_thank_words")]
    pub thank_words: Vec<String>,
    /// Raw regex used instead of `thank_words` when set.
    #[serde(default)]
    pub thank_regex: Option<String>,
    #[serde(default)]
    pub channels: ChannelFilter,
    /// Donor must hold one of these roles (empty = anyone).
    #[serde(default)]
    pub donor_roles: Vec<RoleId>,
    #[serde(default)]
    pub receiver_roles: Vec<RoleId>,
    #[serde(default)]
    pub reactions: ReactionSettings,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
}

impl Default for Thanking {
    fn default() -> Self {
        Self {
            thank_words: default_thank_words(),
            thank_regex: None,
            channels: ChannelFilter::default(),
            donor_roles: Vec::new(),
            receiver_roles: Vec::new(),
            reactions: ReactionSettings::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
        }
    }
}

impl Thanking {
    pub fn compile_pattern(&self) -> Result<ThankPattern> {
        match &self.thank_regex {
            Some(re) => ThankPattern::from_regex(re),
            None => ThankPattern::from_words(&self.thank_words),
        }
    }

    pub fn donor_allowed(&self, roles: &[RoleId]) -> bool {
        self.donor_roles.is_empty() || self.donor_roles.iter().any(|r| roles.contains(r))
    }

    pub fn receiver_allowed(&self, roles: &[RoleId]) -> bool {
        self.receiver_roles.is_empty() || self.receiver_roles.iter().any(|r| roles.contains(r))
    }
}

fn default_thank_words() -> Vec<String> {
    ["thanks", "thank", "thx", "ty", "danke"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fuzzy_threshold() -> f64 {
    0.75
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Only listed channels are reputation channels.
    #[default]
    Whitelist,
    /// Every channel except the listed ones.
    Blacklist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelFilter {
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default)]
    pub channels: Vec<ChannelId>,
}

impl ChannelFilter {
    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        let listed = self.channels.contains(&channel);
        match self.mode {
            ChannelMode::Whitelist => listed,
            ChannelMode::Blacklist => !listed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSettings {
    #[serde(default = "default_main_reaction")]
    pub main: Emoji,
    #[serde(default)]
    pub additional: Vec<Emoji>,
}

impl Default for ReactionSettings {
    fn default() -> Self {
        Self {
            main: default_main_reaction(),
            additional: Vec::new(),
        }
    }
}

impl ReactionSettings {
    pub fn is_reaction(&self, emoji: &Emoji) -> bool {
        &self.main == emoji || self.additional.contains(emoji)
    }
}

fn default_main_reaction() -> Emoji {
    Emoji::unicode("🏅")
}

/// Abuse protection limits. Zero disables `max_message_age_minutes`,
/// `max_given` and `max_received`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseProtection {
    pub cooldown_minutes: i64,
    pub max_message_age_minutes: i64,
    pub min_messages: usize,
    pub donor_context: bool,
    pub receiver_context: bool,
    pub max_given: u64,
    pub max_given_hours: i64,
    pub max_received: u64,
    pub max_received_hours: i64,
    /// Upper bound of receivers credited for one message.
    pub max_message_reputation: usize,
}

impl Default for AbuseProtection {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            max_message_age_minutes: 30,
            min_messages: 10,
            donor_context: true,
            receiver_context: true,
            max_given: 0,
            max_given_hours: 1,
            max_received: 0,
            max_received_hours: 1,
            max_message_reputation: 3,
        }
    }
}

impl AbuseProtection {
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes.max(0))
    }

    pub fn max_message_age(&self) -> Option<Duration> {
        (self.max_message_age_minutes > 0).then(|| Duration::minutes(self.max_message_age_minutes))
    }

    pub fn is_old_message(&self, message: &Message, now: DateTime<Utc>) -> bool {
        match self.max_message_age() {
            None => false,
            Some(max) => now.signed_duration_since(message.created_at) >= max,
        }
    }

    pub fn given_window(&self) -> Duration {
        Duration::hours(self.max_given_hours.max(1))
    }

    pub fn received_window(&self) -> Duration {
        Duration::hours(self.max_received_hours.max(1))
    }
}

/// Per-cause toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageToggles {
    pub reaction_active: bool,
    pub answer_active: bool,
    pub mention_active: bool,
    pub fuzzy_active: bool,
    pub embed_active: bool,
    /// Credit a lone context candidate directly instead of opening a vote.
    pub skip_single_embed: bool,
}

impl Default for MessageToggles {
    fn default() -> Self {
        Self {
            reaction_active: true,
            answer_active: true,
            mention_active: true,
            fuzzy_active: true,
            embed_active: true,
            skip_single_embed: true,
        }
    }
}

impl MessageToggles {
    pub fn is_active(&self, kind: ThankType) -> bool {
        match kind {
            ThankType::NoMatch => false,
            ThankType::Answer => self.answer_active,
            ThankType::Mention => self.mention_active,
            ThankType::Fuzzy => self.fuzzy_active,
            ThankType::Reaction => self.reaction_active,
            ThankType::Direct | ThankType::Embed => self.embed_active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReputationMode {
    #[default]
    Total,
    RollingWeek,
    RollingMonth,
}

impl ReputationMode {
    /// Lower bound of counted entries, `None` for all-time.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ReputationMode::Total => None,
            ReputationMode::RollingWeek => Some(now - Duration::days(7)),
            ReputationMode::RollingMonth => Some(now - Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    pub emoji_debug: bool,
    pub stack_roles: bool,
    pub reputation_mode: ReputationMode,
}

impl Default for General {
    fn default() -> Self {
        Self {
            emoji_debug: true,
            stack_roles: false,
            reputation_mode: ReputationMode::Total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTier {
    pub role_id: RoleId,
    pub threshold: u64,
}

/// Settings Store collaborator.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, guild: GuildId) -> Result<Arc<GuildSettings>>;
}

/// In-memory store; unknown guilds get default settings.
#[derive(Debug, Default)]
pub struct StaticSettingsStore {
    guilds: RwLock<HashMap<GuildId, Arc<GuildSettings>>>,
}

impl StaticSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: impl IntoIterator<Item = GuildSettings>) -> Self {
        let store = Self::new();
        for s in settings {
            store.insert(s);
        }
        store
    }

    pub fn insert(&self, settings: GuildSettings) {
        let mut guard = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(settings.guild_id, Arc::new(settings));
    }
}

#[async_trait::async_trait]
impl SettingsStore for StaticSettingsStore {
    async fn get(&self, guild: GuildId) -> Result<Arc<GuildSettings>> {
        let guard = self.guilds.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .get(&guild)
            .cloned()
            .unwrap_or_else(|| Arc::new(GuildSettings::for_guild(guild))))
    }
}

/// Load guild settings from a TOML (`[[guild]]`) or JSON (array) file.
pub fn load_guild_settings_from(path: &Path) -> Result<Vec<GuildSettings>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading guild settings from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_guild_settings(&content, &ext)
}

fn parse_guild_settings(s: &str, hint_ext: &str) -> Result<Vec<GuildSettings>> {
    #[derive(Deserialize)]
    struct TomlGuilds {
        #[serde(default)]
        guild: Vec<GuildSettings>,
    }

    if hint_ext == "json" || s.trim_start().starts_with('[') && !s.contains("[[guild") {
        let v: Vec<GuildSettings> = serde_json::from_str(s).context("parsing guild settings JSON")?;
        return Ok(v);
    }
    let v: TomlGuilds = toml::from_str(s).map_err(|e| anyhow!("parsing guild settings TOML: {e}"))?;
    Ok(v.guild)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageId, MessageKind, UserId};
    use chrono::TimeZone;

    #[test]
    fn whitelist_and_blacklist_modes() {
        let mut f = ChannelFilter {
            mode: ChannelMode::Whitelist,
            channels: vec![ChannelId(1)],
        };
        assert!(f.is_enabled(ChannelId(1)));
        assert!(!f.is_enabled(ChannelId(2)));
        f.mode = ChannelMode::Blacklist;
        assert!(!f.is_enabled(ChannelId(1)));
        assert!(f.is_enabled(ChannelId(2)));
    }

    #[test]
    fn toggles_cover_every_cause() {
        let mut t = MessageToggles::default();
        assert!(!t.is_active(ThankType::NoMatch));
        t.embed_active = false;
        assert!(!t.is_active(ThankType::Direct));
        assert!(!t.is_active(ThankType::Embed));
        assert!(t.is_active(ThankType::Fuzzy));
    }

    #[test]
    fn zero_message_age_never_old() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let msg = Message {
            id: MessageId(1),
            guild_id: GuildId(1),
            channel_id: ChannelId(1),
            author_id: UserId(1),
            content: String::new(),
            created_at: t0,
            kind: MessageKind::Default,
            reference: None,
            mentions: vec![],
            author_is_bot: false,
            webhook: false,
        };
        let mut abuse = AbuseProtection::default();
        assert!(abuse.is_old_message(&msg, t0 + Duration::minutes(30)));
        assert!(!abuse.is_old_message(&msg, t0 + Duration::minutes(29)));
        abuse.max_message_age_minutes = 0;
        assert!(!abuse.is_old_message(&msg, t0 + Duration::days(9)));
    }

    #[test]
    fn parses_toml_guild_list_with_defaults() {
        let toml = r#"
[[guild]]
guild_id = 5
[guild.thanking]
thank_words = ["merci"]
[guild.abuse]
cooldown_minutes = 5
[[guild.tiers]]
role_id = 20
threshold = 10
[[guild.tiers]]
role_id = 10
threshold = 1
"#;
        let guilds = parse_guild_settings(toml, "toml").unwrap();
        assert_eq!(guilds.len(), 1);
        let g = &guilds[0];
        assert_eq!(g.guild_id, GuildId(5));
        assert_eq!(g.abuse.cooldown_minutes, 5);
        assert_eq!(g.abuse.max_message_age_minutes, 30);
        assert!(g.thank_pattern().is_match("merci beaucoup"));
        let tiers = g.sorted_tiers();
        assert_eq!(tiers[0].role_id, RoleId(10));
    }

    #[test]
    fn invalid_regex_yields_empty_pattern() {
        let mut g = GuildSettings::for_guild(GuildId(1));
        g.thanking.thank_regex = Some("(unclosed".into());
        assert!(g.thank_pattern().is_empty());
    }

    #[tokio::test]
    async fn static_store_defaults_unknown_guilds() {
        let store = StaticSettingsStore::new();
        let s = store.get(GuildId(9)).await.unwrap();
        assert_eq!(s.guild_id, GuildId(9));
        assert_eq!(s.abuse.max_message_reputation, 3);
    }
}
