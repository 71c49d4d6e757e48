// tests/guard_policies.rs
//! Abuse protection through the single submit path: symmetric cooldown,
//! independent donor/receiver caps, idempotent ledger writes.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use reputation_engine::analyze::ContextResolver;
use reputation_engine::ledger::{InMemoryStore, ReputationLedger, ReputationLogEntry};
use reputation_engine::memory::{guild_member, text_message, InMemoryGateway, InMemoryRoleDirectory};
use reputation_engine::roles::RoleAssigner;
use reputation_engine::voice::VoiceActivity;
use reputation_engine::{
    ChannelId, Credit, GuildId, GuildSettings, MessageId, Rejection, ReputationService, SubmitOutcome, ThankType,
    Trigger, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;

const G: GuildId = GuildId(9);
const CH: ChannelId = ChannelId(90);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 10, 15, 0, 0).unwrap()
}

struct Fixture {
    gw: Arc<InMemoryGateway>,
    store: Arc<InMemoryStore>,
    service: ReputationService,
}

impl Fixture {
    /// Users 1..=4 are members and all wrote shortly before `t0`.
    fn new() -> Self {
        let gw = Arc::new(InMemoryGateway::new());
        for user in 1..=4 {
            gw.add_member(guild_member(G, user, &format!("user{user}")));
            gw.push(text_message(G, CH, user, user, "hi", t0() - Duration::minutes(5)));
        }
        let store = Arc::new(InMemoryStore::new());
        let ledger = ReputationLedger::new(store.clone());
        let context = Arc::new(ContextResolver::new(gw.clone(), Arc::new(VoiceActivity::new()), 100));
        let roles = Arc::new(RoleAssigner::new(Arc::new(InMemoryRoleDirectory::new()), ledger.clone()));
        let service = ReputationService::new(gw.clone(), context, ledger, roles);
        Self { gw, store, service }
    }

    async fn give(
        &self,
        settings: &GuildSettings,
        donor: u64,
        receiver: u64,
        message: u64,
        at: DateTime<Utc>,
    ) -> SubmitOutcome {
        let msg = text_message(G, CH, message, donor, "thanks", at);
        self.gw.push(msg.clone());
        let donor = guild_member(G, donor, "donor");
        let receiver = guild_member(G, receiver, "receiver");
        let credit = Credit {
            kind: ThankType::Mention,
            donor: &donor,
            receiver: &receiver,
            message: &msg,
            reference: None,
            now: at,
            trigger: Trigger::Replay,
        };
        self.service.submit(settings, credit).await.unwrap()
    }
}

fn settings() -> GuildSettings {
    let mut s = GuildSettings::for_guild(G);
    s.thanking.channels.channels.push(CH);
    s
}

const RECORDED: SubmitOutcome = SubmitOutcome::Recorded { role_denied: None };

#[tokio::test]
async fn cooldown_is_symmetric_and_ends_on_the_boundary() {
    let fx = Fixture::new();
    let s = settings();
    assert_eq!(fx.give(&s, 1, 2, 100, t0()).await, RECORDED);

    // reverse direction inside the cooldown
    assert_eq!(
        fx.give(&s, 2, 1, 101, t0() + Duration::minutes(10)).await,
        SubmitOutcome::Rejected(Rejection::Cooldown)
    );
    // other pairs are unaffected
    assert_eq!(fx.give(&s, 3, 1, 102, t0() + Duration::minutes(10)).await, RECORDED);
    // exactly one cooldown later
    assert_eq!(fx.give(&s, 2, 1, 103, t0() + Duration::minutes(30)).await, RECORDED);
    assert_eq!(fx.store.len(), 3);
}

#[tokio::test]
async fn donor_cap_does_not_limit_receivers() {
    let fx = Fixture::new();
    let mut s = settings();
    s.abuse.max_given = 1;
    s.abuse.max_received = 0;

    assert_eq!(fx.give(&s, 1, 2, 100, t0()).await, RECORDED);
    assert_eq!(
        fx.give(&s, 1, 3, 101, t0()).await,
        SubmitOutcome::Rejected(Rejection::DonorLimit)
    );
    // user 2 already received one, which must not count against max_given
    assert_eq!(fx.give(&s, 4, 2, 102, t0()).await, RECORDED);
    assert_eq!(fx.give(&s, 3, 2, 103, t0()).await, RECORDED);
}

#[tokio::test]
async fn receiver_cap_does_not_limit_donors() {
    let fx = Fixture::new();
    let mut s = settings();
    s.abuse.max_given = 0;
    s.abuse.max_received = 1;

    assert_eq!(fx.give(&s, 1, 2, 100, t0()).await, RECORDED);
    assert_eq!(
        fx.give(&s, 3, 2, 101, t0()).await,
        SubmitOutcome::Rejected(Rejection::ReceiverLimit)
    );
    // user 1 already gave one, which must not count against max_received
    assert_eq!(fx.give(&s, 1, 3, 102, t0()).await, RECORDED);
    assert_eq!(fx.give(&s, 1, 4, 103, t0()).await, RECORDED);
}

#[tokio::test]
async fn caps_slide_with_their_windows() {
    let fx = Fixture::new();
    let mut s = settings();
    s.abuse.max_given = 1;
    s.abuse.max_given_hours = 1;
    s.abuse.max_message_age_minutes = 0;
    s.abuse.receiver_context = false;

    assert_eq!(fx.give(&s, 1, 2, 100, t0()).await, RECORDED);
    assert_eq!(
        fx.give(&s, 1, 3, 101, t0() + Duration::minutes(59)).await,
        SubmitOutcome::Rejected(Rejection::DonorLimit)
    );
    assert_eq!(fx.give(&s, 1, 3, 102, t0() + Duration::minutes(61)).await, RECORDED);
}

#[tokio::test]
async fn only_first_record_of_a_key_counts() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = ReputationLedger::new(store.clone());
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut keys = HashSet::new();

    for _ in 0..300 {
        let donor = rng.random_range(1..5u64);
        let receiver = rng.random_range(1..5u64);
        let message = rng.random_range(1..20u64);
        let entry = ReputationLogEntry {
            guild_id: G,
            donor_id: UserId(donor),
            receiver_id: UserId(receiver),
            message_id: MessageId(message),
            ref_message_id: None,
            channel_id: CH,
            cause: ThankType::Fuzzy,
            received: t0(),
        };
        let first = keys.insert((donor, receiver, message));
        assert_eq!(ledger.record(entry).await.unwrap(), first);
    }
    assert_eq!(store.len(), keys.len());
}
