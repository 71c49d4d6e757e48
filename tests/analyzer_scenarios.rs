// tests/analyzer_scenarios.rs
use chrono::{DateTime, Duration, TimeZone, Utc};
use reputation_engine::analyze::{
    lookaround_window, rank_candidates, tokenize, ContextResolver, FuzzyResolver, MessageAnalyzer,
    WeightedCandidate, LOOKAROUND,
};
use reputation_engine::memory::{guild_member, text_message, InMemoryGateway};
use reputation_engine::model::MessageKind;
use reputation_engine::voice::VoiceActivity;
use reputation_engine::{ChannelId, GuildId, GuildSettings, MessageId, ThankType, UserId};
use std::sync::Arc;

const G: GuildId = GuildId(7);
const CH: ChannelId = ChannelId(70);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()
}

fn analyzer(gw: &Arc<InMemoryGateway>) -> MessageAnalyzer {
    let ctx = Arc::new(ContextResolver::new(gw.clone(), Arc::new(VoiceActivity::new()), 100));
    MessageAnalyzer::new(gw.clone(), ctx)
}

#[tokio::test]
async fn single_mention_yields_mention_result() {
    let gw = Arc::new(InMemoryGateway::new());
    gw.add_member(guild_member(G, 1, "donor"));
    let receiver = guild_member(G, 2, "receiver");
    gw.add_member(receiver.clone());
    let settings = GuildSettings::for_guild(G);

    let mut msg = text_message(G, CH, 100, 1, "thanks <@2>", t0());
    msg.mentions = vec![UserId(2)];
    let r = analyzer(&gw)
        .analyze(settings.thank_pattern(), &msg, &settings, true, 3)
        .await;

    assert_eq!(r.kind, ThankType::Mention);
    assert_eq!(r.donor, Some(UserId(1)));
    assert_eq!(r.candidates, vec![WeightedCandidate::exact(receiver)]);
    assert_eq!(r.candidates[0].weight, 1.0);
}

#[tokio::test]
async fn mention_parsed_from_content_when_platform_list_empty() {
    let gw = Arc::new(InMemoryGateway::new());
    gw.add_member(guild_member(G, 1, "donor"));
    gw.add_member(guild_member(G, 2, "receiver"));
    let settings = GuildSettings::for_guild(G);

    let msg = text_message(G, CH, 100, 1, "ty <@!2> for the fix", t0());
    let r = analyzer(&gw)
        .analyze(settings.thank_pattern(), &msg, &settings, true, 3)
        .await;
    assert_eq!(r.kind, ThankType::Mention);
    assert_eq!(r.candidates[0].user_id(), UserId(2));
}

#[tokio::test]
async fn reply_to_departed_member_is_no_match() {
    let gw = Arc::new(InMemoryGateway::new());
    gw.add_member(guild_member(G, 1, "donor"));
    // author 5 left the guild; the message is still there
    gw.push(text_message(G, CH, 50, 5, "try restarting", t0() - Duration::minutes(3)));
    let settings = GuildSettings::for_guild(G);

    let mut msg = text_message(G, CH, 100, 1, "thanks, that worked", t0());
    msg.kind = MessageKind::Reply;
    msg.reference = Some(MessageId(50));
    let r = analyzer(&gw)
        .analyze(settings.thank_pattern(), &msg, &settings, true, 3)
        .await;

    assert_eq!(r.kind, ThankType::NoMatch);
    assert!(r.candidates.is_empty());
    assert!(!r.is_no_target());
}

#[tokio::test]
async fn reply_to_deleted_message_is_no_match() {
    let gw = Arc::new(InMemoryGateway::new());
    gw.add_member(guild_member(G, 1, "donor"));
    let settings = GuildSettings::for_guild(G);
    let mut msg = text_message(G, CH, 100, 1, "thanks", t0());
    msg.kind = MessageKind::Reply;
    msg.reference = Some(MessageId(49));
    let r = analyzer(&gw)
        .analyze(settings.thank_pattern(), &msg, &settings, true, 3)
        .await;
    assert_eq!(r.kind, ThankType::NoMatch);
}

#[test]
fn fuzzy_ordering_is_deterministic() {
    let pool = vec![
        guild_member(G, 1, "anna"),
        guild_member(G, 2, "annabel"),
        guild_member(G, 3, "Anna"),
        guild_member(G, 4, "annika"),
    ];
    let resolver = FuzzyResolver::new();
    let first = resolver.resolve("anna", &pool);
    for _ in 0..20 {
        assert_eq!(resolver.resolve("anna", &pool), first);
    }
    // strictly non-increasing weights
    assert!(first.windows(2).all(|w| w[0].weight >= w[1].weight));
    // equal weights keep pool order: both exact hits, 1 before 3
    assert_eq!(first[0].user_id(), UserId(1));
    assert_eq!(first[1].user_id(), UserId(3));

    let ranked = rank_candidates(first.clone(), 0.0, 10);
    assert_eq!(ranked, first);
}

#[test]
fn lookaround_respects_token_bounds() {
    let tokens = tokenize("thanks a lot for the help yesterday alice");
    let n = tokens.len();

    let w = lookaround_window(n, 0, LOOKAROUND);
    assert!(w.before.is_empty());
    assert_eq!(w.after, 1..(1 + LOOKAROUND).min(n));

    let w = lookaround_window(n, n - 1, LOOKAROUND);
    assert!(w.after.is_empty());
    assert_eq!(w.before, (n - 1).saturating_sub(LOOKAROUND)..n - 1);

    for i in 0..n {
        assert!(lookaround_window(n, i, LOOKAROUND).indices().all(|j| j < n && j != i));
    }
}
