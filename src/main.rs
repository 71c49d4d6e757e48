//! Replay binary: feeds a recorded event file through an in-memory engine
//! and prints the resulting per-guild ranking as JSON.
//!
//! Usage: `reputation-replay <events.json>`
//!
//! The file holds `guilds` (guild settings), `members` and `events`
//! (gateway events in order). Messages of `message_create` events are also
//! stored in the in-memory history so context lookups can see them.

use anyhow::{Context, Result};
use reputation_engine::config::load_config_default;
use reputation_engine::ledger::InMemoryStore;
use reputation_engine::memory::{InMemoryGateway, InMemoryRoleDirectory};
use reputation_engine::settings::StaticSettingsStore;
use reputation_engine::telemetry::init_tracing;
use reputation_engine::{Engine, GatewayEvent, GuildId, GuildSettings, Member, ReputationRank, SettingsStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ReplayFile {
    #[serde(default)]
    guilds: Vec<GuildSettings>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    events: Vec<GatewayEvent>,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    events: usize,
    failed: usize,
    rankings: BTreeMap<GuildId, Vec<ReputationRank>>,
}

fn read_replay(path: &PathBuf) -> Result<ReplayFile> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: reputation-replay <events.json>")?;
    let replay = read_replay(&path)?;
    let config = load_config_default()?;

    let gateway = Arc::new(InMemoryGateway::new());
    let directory = Arc::new(InMemoryRoleDirectory::new());
    for member in &replay.members {
        directory.set_roles(member.guild_id, member.user_id, member.roles.clone());
        gateway.add_member(member.clone());
    }
    let guild_ids: Vec<GuildId> = replay.guilds.iter().map(|g| g.guild_id).collect();
    let settings = Arc::new(StaticSettingsStore::with(replay.guilds));

    let engine = Engine::new(
        config,
        gateway.clone(),
        settings.clone(),
        Arc::new(InMemoryStore::new()),
        directory,
    );

    let mut failed = 0;
    let total = replay.events.len();
    for event in &replay.events {
        if let GatewayEvent::MessageCreate { message } = event {
            gateway.push(message.clone());
        }
        if let Err(e) = engine.dispatcher().dispatch(event).await {
            failed += 1;
            tracing::warn!(target: "dispatch", error = %e, "event failed");
        }
    }

    let mut rankings = BTreeMap::new();
    let now = chrono::Utc::now();
    for guild in guild_ids {
        let guild_settings = settings.get(guild).await?;
        let ranking = engine
            .ledger()
            .ranking(guild, guild_settings.general.reputation_mode, now)
            .await?;
        rankings.insert(guild, ranking);
    }
    engine.shutdown().await;

    let report = ReplayReport {
        events: total,
        failed,
        rankings,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
