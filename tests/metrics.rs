// tests/metrics.rs
use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use reputation_engine::config::EngineConfig;
use reputation_engine::ledger::InMemoryStore;
use reputation_engine::memory::{guild_member, text_message, InMemoryGateway, InMemoryRoleDirectory};
use reputation_engine::settings::StaticSettingsStore;
use reputation_engine::{ChannelId, Engine, GatewayEvent, GuildId, GuildSettings};
use std::sync::Arc;

#[tokio::test]
async fn engine_series_are_rendered() {
    // Install a recorder for this test binary
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let g = GuildId(1);
    let ch = ChannelId(1);
    let now = Utc::now();
    let gw = Arc::new(InMemoryGateway::new());
    gw.add_member(guild_member(g, 1, "alice"));
    gw.add_member(guild_member(g, 2, "bob"));
    gw.push(text_message(g, ch, 1, 2, "restart it", now - Duration::minutes(2)));
    let mut settings = GuildSettings::for_guild(g);
    settings.thanking.channels.channels.push(ch);
    let engine = Engine::new(
        EngineConfig::default(),
        gw.clone(),
        Arc::new(StaticSettingsStore::with([settings])),
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryRoleDirectory::new()),
    );

    // one recorded credit, then the same pair again inside the cooldown
    for (id, at) in [(2, now), (3, now + Duration::minutes(1))] {
        let msg = text_message(g, ch, id, 1, "thanks <@2>", at);
        gw.push(msg.clone());
        engine
            .dispatcher()
            .dispatch(&GatewayEvent::MessageCreate { message: msg })
            .await
            .unwrap();
    }

    let out = handle.render();
    for needle in [
        "reputation_messages_analyzed_total",
        "reputation_matches_total",
        "reputation_recorded_total",
        "reputation_rejections_total",
    ] {
        assert!(out.contains(needle), "missing series {needle} in:\n{out}");
    }
    assert!(out.contains(r#"reason="cooldown""#), "{out}");
    engine.shutdown().await;
}
