// tests/settings_loading.rs
use reputation_engine::settings::{load_guild_settings_from, ChannelMode, ReputationMode, SettingsStore, StaticSettingsStore};
use reputation_engine::{ChannelId, Emoji, GuildId, RoleId};
use std::fs;

const GUILDS_TOML: &str = r#"
[[guild]]
guild_id = 1

[guild.thanking]
thank_words = ["thanks", "merci"]
fuzzy_threshold = 0.8

[guild.thanking.channels]
mode = "blacklist"
channels = [13]

[guild.abuse]
cooldown_minutes = 5
max_received = 4

[guild.general]
stack_roles = true
reputation_mode = "ROLLING_WEEK"

[[guild.tiers]]
role_id = 900
threshold = 10

[[guild]]
guild_id = 2
"#;

#[tokio::test]
async fn toml_guilds_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guilds.toml");
    fs::write(&path, GUILDS_TOML).unwrap();

    let guilds = load_guild_settings_from(&path).unwrap();
    assert_eq!(guilds.len(), 2);
    let g1 = &guilds[0];
    assert_eq!(g1.guild_id, GuildId(1));
    assert_eq!(g1.thanking.channels.mode, ChannelMode::Blacklist);
    assert!(g1.thanking.channels.is_enabled(ChannelId(12)));
    assert!(!g1.thanking.channels.is_enabled(ChannelId(13)));
    assert_eq!(g1.abuse.cooldown_minutes, 5);
    assert_eq!(g1.abuse.max_received, 4);
    // untouched fields keep their defaults
    assert_eq!(g1.abuse.min_messages, 10);
    assert_eq!(g1.abuse.max_message_reputation, 3);
    assert_eq!(g1.general.reputation_mode, ReputationMode::RollingWeek);
    assert_eq!(g1.tiers[0].role_id, RoleId(900));
    assert!(g1.thank_pattern().is_match("Merci beaucoup"));
    assert!(!g1.thank_pattern().is_match("thx"));

    let g2 = &guilds[1];
    assert_eq!(g2.thanking.fuzzy_threshold, 0.75);
    assert!(g2.thank_pattern().is_match("thx mate"));
    assert!(g2.thanking.reactions.is_reaction(&Emoji::unicode("🏅")));

    let store = StaticSettingsStore::with(guilds);
    assert_eq!(store.get(GuildId(1)).await.unwrap().abuse.cooldown_minutes, 5);
    // unknown guilds fall back to defaults
    assert_eq!(store.get(GuildId(77)).await.unwrap().abuse.cooldown_minutes, 30);
}

#[test]
fn json_array_and_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    let json = dir.path().join("guilds.json");
    fs::write(&json, r#"[{"guild_id": 5, "general": {"emoji_debug": false}}]"#).unwrap();
    let guilds = load_guild_settings_from(&json).unwrap();
    assert_eq!(guilds[0].guild_id, GuildId(5));
    assert!(!guilds[0].general.emoji_debug);

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[[guild]]\nguild_id = \"x\"").unwrap();
    assert!(load_guild_settings_from(&bad).is_err());
    assert!(load_guild_settings_from(&dir.path().join("missing.toml")).is_err());
}
