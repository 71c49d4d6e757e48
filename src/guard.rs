//! Abuse protection gate evaluated before every ledger write.
//!
//! Each rule is a small pure predicate so it can be tested on its own;
//! `AbuseGuard::evaluate` runs them in a fixed order and reports the first
//! failing rule as a `Rejection`. Rejections are values, not errors: callers
//! only use them for counters and optional debug markers.
//!
//! Ledger-derived inputs (last exchange, window counts) are read by the
//! caller beforehand and passed in as `LedgerFacts`; they are not
//! transactionally tied to the later insert.

use crate::analyze::context::MessageContext;
use crate::model::{ChannelId, Emoji, Member, Message, RoleId, ThankType};
use crate::settings::{AbuseProtection, GuildSettings, MessageToggles, Thanking};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    BotReceiver,
    SelfVote,
    TypeDisabled,
    ChannelDisabled,
    DonorRole,
    ReceiverRole,
    ReceiverNotInContext,
    DonorNotInContext,
    Cooldown,
    ReferenceTooOld,
    MessageTooOld,
    DonorLimit,
    ReceiverLimit,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::BotReceiver => "bot_receiver",
            Rejection::SelfVote => "self_vote",
            Rejection::TypeDisabled => "type_disabled",
            Rejection::ChannelDisabled => "channel_disabled",
            Rejection::DonorRole => "donor_role",
            Rejection::ReceiverRole => "receiver_role",
            Rejection::ReceiverNotInContext => "receiver_not_in_context",
            Rejection::DonorNotInContext => "donor_not_in_context",
            Rejection::Cooldown => "cooldown",
            Rejection::ReferenceTooOld => "reference_too_old",
            Rejection::MessageTooOld => "message_too_old",
            Rejection::DonorLimit => "donor_limit",
            Rejection::ReceiverLimit => "receiver_limit",
        }
    }

    /// Debug reaction put on the triggering message. Silent rules (bots,
    /// self votes, disabled features) have none.
    pub fn marker(self) -> Option<Emoji> {
        let e = match self {
            Rejection::BotReceiver
            | Rejection::SelfVote
            | Rejection::TypeDisabled
            | Rejection::ChannelDisabled
            | Rejection::DonorRole
            | Rejection::ReceiverRole => return None,
            Rejection::ReceiverNotInContext => "❓",
            Rejection::DonorNotInContext => "❔",
            Rejection::Cooldown => "💤",
            Rejection::ReferenceTooOld | Rejection::MessageTooOld => "🕛",
            Rejection::DonorLimit => "✋",
            Rejection::ReceiverLimit => "🛑",
        };
        Some(Emoji::unicode(e))
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Markers for pipeline events that are not rejections.
pub mod markers {
    use crate::model::Emoji;

    pub fn thank_word_found() -> Emoji {
        Emoji::unicode("👀")
    }

    pub fn empty_context() -> Emoji {
        Emoji::unicode("🔍")
    }

    pub fn vote_prompted() -> Emoji {
        Emoji::unicode("🗳️")
    }
}

/// Ledger-derived facts for one (donor, receiver) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerFacts {
    /// Exchange between the pair closest to `now`, in either direction and
    /// on either side of it.
    pub nearest_exchange: Option<DateTime<Utc>>,
    /// Points the donor gave inside the trailing donor window ending at `now`.
    pub given_in_window: u64,
    /// Points the receiver got inside the trailing receiver window.
    pub received_in_window: u64,
}

/// One candidate credit to check.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub kind: ThankType,
    pub donor: &'a Member,
    pub receiver: &'a Member,
    /// Message that triggered the credit (for reactions: the reacted message).
    pub message: &'a Message,
    pub reference: Option<&'a Message>,
    pub context: &'a MessageContext,
    pub settings: &'a GuildSettings,
    pub now: DateTime<Utc>,
}

pub fn receiver_is_human(receiver: &Member) -> bool {
    !receiver.bot
}

pub fn is_self_vote(donor: &Member, receiver: &Member) -> bool {
    donor.user_id == receiver.user_id
}

pub fn type_enabled(toggles: &MessageToggles, kind: ThankType) -> bool {
    toggles.is_active(kind)
}

pub fn channel_enabled(thanking: &Thanking, channel: ChannelId) -> bool {
    thanking.channels.is_enabled(channel)
}

pub fn donor_role_ok(thanking: &Thanking, roles: &[RoleId]) -> bool {
    thanking.donor_allowed(roles)
}

pub fn receiver_role_ok(thanking: &Thanking, roles: &[RoleId]) -> bool {
    thanking.receiver_allowed(roles)
}

/// Context membership, only enforced when `required`.
pub fn context_ok(required: bool, context: &MessageContext, member: &Member) -> bool {
    !required || context.contains(member.user_id)
}

/// True when the nearest exchange is at least `cooldown` away from `now`,
/// before or after it.
pub fn cooldown_elapsed(nearest: Option<DateTime<Utc>>, cooldown: Duration, now: DateTime<Utc>) -> bool {
    match nearest {
        None => true,
        Some(at) => now.signed_duration_since(at).abs() >= cooldown,
    }
}

/// Old and no longer among the `min_messages` newest channel messages.
pub fn is_stale(
    message: &Message,
    abuse: &AbuseProtection,
    context: &MessageContext,
    now: DateTime<Utc>,
) -> bool {
    abuse.is_old_message(message, now) && !context.is_latest(message.id, abuse.min_messages)
}

/// `max == 0` disables the cap.
pub fn under_limit(count: u64, max: u64) -> bool {
    max == 0 || count < max
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbuseGuard;

impl AbuseGuard {
    pub fn new() -> Self {
        Self
    }

    /// Checks every rule in order; the first failure wins.
    pub fn evaluate(&self, input: &GuardInput<'_>, facts: &LedgerFacts) -> Result<(), Rejection> {
        let s = input.settings;
        let abuse = &s.abuse;

        if !receiver_is_human(input.receiver) {
            return Err(Rejection::BotReceiver);
        }
        if is_self_vote(input.donor, input.receiver) {
            return Err(Rejection::SelfVote);
        }
        if !type_enabled(&s.messages, input.kind) {
            return Err(Rejection::TypeDisabled);
        }
        if !channel_enabled(&s.thanking, input.message.channel_id) {
            return Err(Rejection::ChannelDisabled);
        }
        if !donor_role_ok(&s.thanking, &input.donor.roles) {
            return Err(Rejection::DonorRole);
        }
        if !receiver_role_ok(&s.thanking, &input.receiver.roles) {
            return Err(Rejection::ReceiverRole);
        }
        if !context_ok(abuse.receiver_context, input.context, input.receiver) {
            return Err(Rejection::ReceiverNotInContext);
        }
        if !context_ok(abuse.donor_context, input.context, input.donor) {
            return Err(Rejection::DonorNotInContext);
        }
        if !cooldown_elapsed(facts.nearest_exchange, abuse.cooldown(), input.now) {
            return Err(Rejection::Cooldown);
        }
        if let Some(reference) = input.reference {
            if is_stale(reference, abuse, input.context, input.now) {
                return Err(Rejection::ReferenceTooOld);
            }
        }
        if is_stale(input.message, abuse, input.context, input.now) {
            return Err(Rejection::MessageTooOld);
        }
        if !under_limit(facts.given_in_window, abuse.max_given) {
            return Err(Rejection::DonorLimit);
        }
        if !under_limit(facts.received_in_window, abuse.max_received) {
            return Err(Rejection::ReceiverLimit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{guild_member, text_message};
    use crate::model::{GuildId, MessageId};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
    }

    struct Fixture {
        donor: Member,
        receiver: Member,
        message: Message,
        context: MessageContext,
        settings: GuildSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let g = GuildId(1);
            let donor = guild_member(g, 1, "donor");
            let receiver = guild_member(g, 2, "receiver");
            let message = text_message(g, ChannelId(1), 10, 1, "thanks receiver", t0());
            let context = MessageContext::new(vec![donor.clone(), receiver.clone()], vec![message.clone()]);
            let mut settings = GuildSettings::for_guild(g);
            settings.thanking.channels.channels.push(ChannelId(1));
            Self {
                donor,
                receiver,
                message,
                context,
                settings,
            }
        }

        fn input(&self) -> GuardInput<'_> {
            GuardInput {
                kind: ThankType::Fuzzy,
                donor: &self.donor,
                receiver: &self.receiver,
                message: &self.message,
                reference: None,
                context: &self.context,
                settings: &self.settings,
                now: t0(),
            }
        }
    }

    #[test]
    fn clean_input_passes() {
        let f = Fixture::new();
        assert_eq!(AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()), Ok(()));
    }

    #[test]
    fn self_and_bot_receivers_are_blocked() {
        let mut f = Fixture::new();
        f.receiver.bot = true;
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::BotReceiver)
        );
        let f = Fixture::new();
        let mut input = f.input();
        input.receiver = &f.donor;
        assert_eq!(
            AbuseGuard::new().evaluate(&input, &LedgerFacts::default()),
            Err(Rejection::SelfVote)
        );
    }

    #[test]
    fn disabled_channel_and_type() {
        let mut f = Fixture::new();
        f.settings.messages.fuzzy_active = false;
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::TypeDisabled)
        );
        let mut f = Fixture::new();
        f.settings.thanking.channels.channels.clear();
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::ChannelDisabled)
        );
    }

    #[test]
    fn role_filters() {
        let mut f = Fixture::new();
        f.settings.thanking.receiver_roles = vec![RoleId(5)];
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::ReceiverRole)
        );
        f.receiver.roles.push(RoleId(5));
        f.settings.thanking.donor_roles = vec![RoleId(6)];
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::DonorRole)
        );
    }

    #[test]
    fn context_requirements_follow_toggles() {
        let mut f = Fixture::new();
        f.context = MessageContext::new(vec![f.donor.clone()], vec![f.message.clone()]);
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::ReceiverNotInContext)
        );
        f.settings.abuse.receiver_context = false;
        assert_eq!(AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()), Ok(()));

        f.context = MessageContext::default();
        assert_eq!(
            AbuseGuard::new().evaluate(&f.input(), &LedgerFacts::default()),
            Err(Rejection::DonorNotInContext)
        );
    }

    #[test]
    fn cooldown_boundary() {
        let cd = Duration::minutes(30);
        assert!(cooldown_elapsed(None, cd, t0()));
        assert!(!cooldown_elapsed(Some(t0() - Duration::minutes(29)), cd, t0()));
        assert!(cooldown_elapsed(Some(t0() - Duration::minutes(30)), cd, t0()));
        // later exchanges count the same way
        assert!(!cooldown_elapsed(Some(t0() + Duration::minutes(29)), cd, t0()));
        assert!(cooldown_elapsed(Some(t0() + Duration::days(10)), cd, t0()));

        let f = Fixture::new();
        let facts = LedgerFacts {
            nearest_exchange: Some(t0() - Duration::minutes(5)),
            ..Default::default()
        };
        assert_eq!(AbuseGuard::new().evaluate(&f.input(), &facts), Err(Rejection::Cooldown));
    }

    #[test]
    fn stale_reference_gets_grace_while_in_latest_window() {
        let f = Fixture::new();
        let old = text_message(GuildId(1), ChannelId(1), 3, 2, "answer", t0() - Duration::hours(3));
        let mut input = f.input();
        input.kind = ThankType::Answer;
        input.reference = Some(&old);
        assert_eq!(
            AbuseGuard::new().evaluate(&input, &LedgerFacts::default()),
            Err(Rejection::ReferenceTooOld)
        );

        let ctx = MessageContext::new(
            vec![f.donor.clone(), f.receiver.clone()],
            vec![f.message.clone(), old.clone()],
        );
        input.context = &ctx;
        assert_eq!(AbuseGuard::new().evaluate(&input, &LedgerFacts::default()), Ok(()));

        let mut abuse = f.settings.abuse.clone();
        abuse.min_messages = 1;
        assert!(is_stale(&old, &abuse, &ctx, t0()));
        assert!(!ctx.is_latest(MessageId(99), 10));
    }

    #[test]
    fn stale_message_rejected() {
        let f = Fixture::new();
        let mut input = f.input();
        input.now = t0() + Duration::minutes(45);
        let empty = MessageContext::new(vec![f.donor.clone(), f.receiver.clone()], vec![]);
        input.context = &empty;
        assert_eq!(
            AbuseGuard::new().evaluate(&input, &LedgerFacts::default()),
            Err(Rejection::MessageTooOld)
        );
    }

    #[test]
    fn zero_caps_disable_limits() {
        assert!(under_limit(1_000, 0));
        assert!(under_limit(2, 3));
        assert!(!under_limit(3, 3));
    }

    #[test]
    fn markers_only_for_operator_visible_rules() {
        assert!(Rejection::SelfVote.marker().is_none());
        assert_eq!(Rejection::Cooldown.marker(), Some(Emoji::unicode("💤")));
        assert_eq!(Rejection::ReceiverLimit.to_string(), "receiver_limit");
    }
}
