use super::escrow::{
    CardSummary, EntryKind, EscrowTransaction, LedgerAccount, LedgerEntry, PaymentReceipt,
};
use super::ids::{Actor, BookingId, Role, ServiceId, UserId};
use super::money::{Amount, FeeRate};
use super::otp::{OtpChallenge, OtpCode, OtpPolicy, VerificationResult};
use super::slot::TimeSlot;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Created,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a booking in this state occupies its provider's slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Confirm,
    Start,
    Complete,
    Cancel,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }
}

/// When the client's payment is captured into escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    #[default]
    AtCreation,
    AtConfirmation,
}

impl FromStr for CapturePolicy {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "at_creation" => Ok(Self::AtCreation),
            "at_confirmation" => Ok(Self::AtConfirmation),
            other => Err(BookingError::Validation(format!(
                "Unknown capture policy '{other}'"
            ))),
        }
    }
}

/// Side effects a transition asks the aggregate to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CaptureEscrow,
    ReleaseEscrow,
    ReverseEscrow,
    InvalidateOtp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied {
        to: BookingState,
        effects: Vec<Effect>,
    },
    /// The booking is already in the state this event leads to.
    AlreadyApplied,
}

/// The booking transition table.
pub fn transition(
    state: BookingState,
    event: BookingEvent,
    policy: CapturePolicy,
) -> Result<Transition> {
    use BookingEvent as E;
    use BookingState as S;

    let applied =
        |to: BookingState, effects: Vec<Effect>| -> Result<Transition> { Ok(Transition::Applied { to, effects }) };

    match (state, event) {
        (S::Created, E::Confirm) => match policy {
            CapturePolicy::AtCreation => applied(S::Confirmed, vec![]),
            CapturePolicy::AtConfirmation => applied(S::Confirmed, vec![Effect::CaptureEscrow]),
        },
        (S::Confirmed, E::Start) => applied(S::InProgress, vec![]),
        (S::InProgress, E::Complete) => applied(S::Completed, vec![Effect::ReleaseEscrow]),
        (S::Created, E::Cancel) => match policy {
            CapturePolicy::AtCreation => applied(
                S::Cancelled,
                vec![Effect::ReverseEscrow, Effect::InvalidateOtp],
            ),
            CapturePolicy::AtConfirmation => applied(S::Cancelled, vec![Effect::InvalidateOtp]),
        },
        (S::Confirmed, E::Cancel) => applied(S::Cancelled, vec![Effect::ReverseEscrow]),
        (S::Confirmed, E::Confirm)
        | (S::InProgress, E::Start)
        | (S::Completed, E::Complete)
        | (S::Cancelled, E::Cancel) => Ok(Transition::AlreadyApplied),
        (from, event) => Err(BookingError::InvalidTransition {
            from,
            action: event.as_str(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: UserId,
    pub provider_id: UserId,
    pub service_id: ServiceId,
    pub slot: TimeSlot,
    pub location: String,
    /// Price quoted by the catalog when the booking was made.
    pub price: Amount,
    pub card: CardSummary,
    pub state: BookingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn is_participant(&self, actor: &Actor) -> bool {
        actor.is(self.client_id, Role::Client) || actor.is(self.provider_id, Role::Provider)
    }

    fn authorize(&self, actor: &Actor, event: BookingEvent) -> Result<()> {
        let allowed = match event {
            BookingEvent::Confirm | BookingEvent::Start | BookingEvent::Complete => {
                actor.is(self.provider_id, Role::Provider)
            }
            BookingEvent::Cancel => self.is_participant(actor),
        };
        if allowed {
            Ok(())
        } else {
            Err(BookingError::Unauthorized(actor.user_id))
        }
    }
}

/// What callers get to see of a booking. The verification code is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingSummary {
    pub booking: Booking,
    pub escrow: Option<EscrowTransaction>,
}

pub struct CommitContext {
    pub now: DateTime<Utc>,
    pub fee_rate: FeeRate,
    pub receipt: Option<PaymentReceipt>,
}

/// The booking aggregate: a booking with the challenge and escrow it owns.
///
/// Everything in here is persisted as one unit under one version number, so a
/// booking's state, its challenge and its escrow always change together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking: Booking,
    pub otp: OtpChallenge,
    pub escrow: Option<EscrowTransaction>,
    pub ledger: Vec<LedgerEntry>,
    pub version: u64,
}

impl BookingRecord {
    pub fn open(booking: Booking, otp: OtpChallenge) -> Self {
        Self {
            booking,
            otp,
            escrow: None,
            ledger: Vec::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> BookingId {
        self.booking.id
    }

    pub fn summary(&self) -> BookingSummary {
        BookingSummary {
            booking: self.booking.clone(),
            escrow: self.escrow.clone(),
        }
    }

    /// Records a captured payment as held in escrow.
    pub fn hold_escrow(&mut self, receipt: PaymentReceipt, rate: FeeRate, now: DateTime<Utc>) {
        let escrow = EscrowTransaction::hold(self.booking.id, self.booking.price, rate, receipt, now);
        self.ledger.push(LedgerEntry {
            kind: EntryKind::PaymentHeld,
            account: LedgerAccount::Client(self.booking.client_id),
            amount: escrow.captured_amount.into(),
            reference: escrow.payment_reference.clone(),
            recorded_at: now,
        });
        self.escrow = Some(escrow);
    }

    /// Validates `event` for `actor` against the current state.
    pub fn plan(&self, actor: &Actor, event: BookingEvent, policy: CapturePolicy) -> Result<Transition> {
        self.booking.authorize(actor, event)?;
        let planned = transition(self.booking.state, event, policy)?;

        // A booking only leaves CREATED through a matching code.
        if let Transition::Applied {
            to: BookingState::Confirmed,
            ..
        } = planned
            && !self.otp.is_verified()
        {
            return Err(BookingError::InvalidTransition {
                from: self.booking.state,
                action: event.as_str(),
            });
        }

        Ok(planned)
    }

    /// Moves the booking to `to`, performing `effects` first.
    ///
    /// On error the record is left partially modified and must be discarded.
    pub fn commit(&mut self, to: BookingState, effects: &[Effect], ctx: CommitContext) -> Result<()> {
        let id = self.booking.id;

        for effect in effects {
            match effect {
                Effect::CaptureEscrow => {
                    let receipt = ctx.receipt.clone().ok_or_else(|| {
                        BookingError::PaymentDeclined("no capture receipt".to_string())
                    })?;
                    self.hold_escrow(receipt, ctx.fee_rate, ctx.now);
                }
                Effect::ReleaseEscrow => {
                    let escrow = self
                        .escrow
                        .as_mut()
                        .ok_or_else(|| BookingError::not_found("escrow", id))?;
                    let split = escrow.release(ctx.now)?;
                    let reference = format!("TRANSFER-{id}");
                    self.ledger.push(LedgerEntry {
                        kind: EntryKind::ProviderPayout,
                        account: LedgerAccount::Provider(self.booking.provider_id),
                        amount: split.provider_credit,
                        reference: reference.clone(),
                        recorded_at: ctx.now,
                    });
                    self.ledger.push(LedgerEntry {
                        kind: EntryKind::PlatformFee,
                        account: LedgerAccount::Platform,
                        amount: split.platform_fee,
                        reference,
                        recorded_at: ctx.now,
                    });
                }
                Effect::ReverseEscrow => {
                    let escrow = self
                        .escrow
                        .as_mut()
                        .ok_or_else(|| BookingError::not_found("escrow", id))?;
                    let reversal = escrow.reverse(ctx.now)?;
                    self.ledger.push(LedgerEntry {
                        kind: EntryKind::ClientRefund,
                        account: LedgerAccount::Client(self.booking.client_id),
                        amount: reversal.client_refund,
                        reference: format!("REFUND-{id}"),
                        recorded_at: ctx.now,
                    });
                }
                Effect::InvalidateOtp => self.otp.invalidate(ctx.now),
            }
        }

        self.booking.state = to;
        self.booking.updated_at = ctx.now;
        if to == BookingState::Completed {
            self.booking.completed_at = Some(ctx.now);
        }
        Ok(())
    }

    /// Checks a code submitted by the provider. A mismatch still mutates the
    /// record (one attempt is consumed) and must be persisted.
    ///
    /// A match marks the challenge verified and returns the effects of the
    /// confirmation it unlocks. The caller commits them to `CONFIRMED` in the
    /// same save.
    pub fn verify_otp(
        &mut self,
        actor: &Actor,
        code: &str,
        now: DateTime<Utc>,
        policy: CapturePolicy,
    ) -> Result<(VerificationResult, Vec<Effect>)> {
        if !actor.is(self.booking.provider_id, Role::Provider) {
            return Err(BookingError::Unauthorized(actor.user_id));
        }
        if self.otp.is_verified() {
            return Err(BookingError::AlreadyVerified);
        }
        if self.booking.state != BookingState::Created {
            return Err(BookingError::InvalidTransition {
                from: self.booking.state,
                action: "verify",
            });
        }
        let effects = match transition(self.booking.state, BookingEvent::Confirm, policy)? {
            Transition::Applied { effects, .. } => effects,
            Transition::AlreadyApplied => Vec::new(),
        };

        let result = self.otp.verify(code, now)?;
        self.booking.updated_at = now;
        Ok((result, effects))
    }

    /// Replaces a challenge that can no longer be answered.
    pub fn reissue_otp(
        &mut self,
        actor: &Actor,
        code: OtpCode,
        now: DateTime<Utc>,
        policy: OtpPolicy,
    ) -> Result<OtpCode> {
        if !actor.is(self.booking.client_id, Role::Client) {
            return Err(BookingError::Unauthorized(actor.user_id));
        }
        if self.booking.state != BookingState::Created {
            return Err(BookingError::InvalidTransition {
                from: self.booking.state,
                action: "reissue a code for",
            });
        }
        if self.otp.is_verified() {
            return Err(BookingError::AlreadyVerified);
        }
        if self.otp.is_usable(now) {
            return Err(BookingError::DuplicateChallenge(self.booking.id));
        }

        self.otp = OtpChallenge::issue(self.booking.id, code.clone(), now, policy)?;
        self.booking.updated_at = now;
        Ok(code)
    }

    pub fn credits(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.ledger.iter().filter(|entry| entry.kind.is_credit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::escrow::{CardBrand, EscrowStatus};
    use crate::domain::money::Balance;
    use chrono::{Duration, TimeZone};

    const ALL_STATES: [BookingState; 5] = [
        BookingState::Created,
        BookingState::Confirmed,
        BookingState::InProgress,
        BookingState::Completed,
        BookingState::Cancelled,
    ];
    const ALL_EVENTS: [BookingEvent; 4] = [
        BookingEvent::Confirm,
        BookingEvent::Start,
        BookingEvent::Complete,
        BookingEvent::Cancel,
    ];

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn record() -> BookingRecord {
        let id = BookingId::new();
        let booking = Booking {
            id,
            client_id: UserId(1),
            provider_id: UserId(7),
            service_id: ServiceId(3),
            slot: TimeSlot::new(now() + Duration::hours(1), now() + Duration::hours(2)).unwrap(),
            location: "12 Elm Street".to_string(),
            price: Amount::new(10_000).unwrap(),
            card: CardSummary {
                last4: "4242".to_string(),
                brand: CardBrand::Visa,
                holder: "Ada".to_string(),
            },
            state: BookingState::Created,
            created_at: now(),
            updated_at: now(),
            completed_at: None,
        };
        let otp = OtpChallenge::issue(
            id,
            OtpCode::parse("123456").unwrap(),
            now(),
            OtpPolicy::default(),
        )
        .unwrap();
        let mut record = BookingRecord::open(booking, otp);
        record.hold_escrow(
            PaymentReceipt {
                reference: "PAY-1".to_string(),
            },
            FeeRate::default(),
            now(),
        );
        record
    }

    fn ctx() -> CommitContext {
        CommitContext {
            now: now(),
            fee_rate: FeeRate::default(),
            receipt: None,
        }
    }

    fn drive(record: &mut BookingRecord, actor: Actor, event: BookingEvent) -> Result<()> {
        match record.plan(&actor, event, CapturePolicy::AtCreation)? {
            Transition::Applied { to, effects } => record.commit(to, &effects, ctx()),
            Transition::AlreadyApplied => Ok(()),
        }
    }

    fn verify_and_confirm(record: &mut BookingRecord, provider: Actor) {
        let (_, effects) = record
            .verify_otp(&provider, "123456", now(), CapturePolicy::AtCreation)
            .unwrap();
        record.commit(BookingState::Confirmed, &effects, ctx()).unwrap();
    }

    #[test]
    fn test_terminal_states() {
        assert!(BookingState::Completed.is_terminal());
        assert!(BookingState::Cancelled.is_terminal());
        assert!(BookingState::InProgress.is_active());
    }

    #[test]
    fn test_transition_table_is_total() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let result = transition(state, event, CapturePolicy::AtCreation);
                if let Err(err) = result {
                    assert!(
                        matches!(err, BookingError::InvalidTransition { from, .. } if from == state),
                        "{state} {event:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_only_accept_their_own_event() {
        assert_eq!(
            transition(BookingState::Completed, BookingEvent::Complete, CapturePolicy::AtCreation).unwrap(),
            Transition::AlreadyApplied
        );
        assert!(matches!(
            transition(BookingState::Completed, BookingEvent::Cancel, CapturePolicy::AtCreation),
            Err(BookingError::InvalidTransition {
                from: BookingState::Completed,
                action: "cancel"
            })
        ));
        assert!(transition(BookingState::Cancelled, BookingEvent::Confirm, CapturePolicy::AtCreation).is_err());
    }

    #[test]
    fn test_effects_follow_capture_policy() {
        assert_eq!(
            transition(BookingState::Created, BookingEvent::Confirm, CapturePolicy::AtConfirmation).unwrap(),
            Transition::Applied {
                to: BookingState::Confirmed,
                effects: vec![Effect::CaptureEscrow]
            }
        );
        assert_eq!(
            transition(BookingState::Created, BookingEvent::Cancel, CapturePolicy::AtConfirmation).unwrap(),
            Transition::Applied {
                to: BookingState::Cancelled,
                effects: vec![Effect::InvalidateOtp]
            }
        );
        assert_eq!(
            transition(BookingState::Created, BookingEvent::Cancel, CapturePolicy::AtCreation).unwrap(),
            Transition::Applied {
                to: BookingState::Cancelled,
                effects: vec![Effect::ReverseEscrow, Effect::InvalidateOtp]
            }
        );
    }

    #[test]
    fn test_confirm_requires_verified_code() {
        let record = record();
        assert!(matches!(
            record.plan(&Actor::provider(7), BookingEvent::Confirm, CapturePolicy::AtCreation),
            Err(BookingError::InvalidTransition {
                from: BookingState::Created,
                action: "confirm"
            })
        ));
    }

    #[test]
    fn test_matching_code_yields_confirmation_effects() {
        let provider = Actor::provider(7);

        let mut captured = record();
        let (result, effects) = captured
            .verify_otp(&provider, "123456", now(), CapturePolicy::AtCreation)
            .unwrap();
        assert_eq!(result.verified_at, now());
        assert!(effects.is_empty());
        captured.commit(BookingState::Confirmed, &effects, ctx()).unwrap();
        assert_eq!(captured.booking.state, BookingState::Confirmed);

        let mut deferred = record();
        let (_, effects) = deferred
            .verify_otp(&provider, "123456", now(), CapturePolicy::AtConfirmation)
            .unwrap();
        assert_eq!(effects, vec![Effect::CaptureEscrow]);
    }

    #[test]
    fn test_mismatch_yields_no_effects() {
        let mut record = record();
        assert!(matches!(
            record.verify_otp(&Actor::provider(7), "000000", now(), CapturePolicy::AtConfirmation),
            Err(BookingError::CodeMismatch { attempts_remaining: 4 })
        ));
        assert_eq!(record.booking.state, BookingState::Created);
        assert_eq!(record.otp.attempts_remaining, 4);
    }

    #[test]
    fn test_only_assigned_provider_drives_service() {
        let mut record = record();
        assert!(matches!(
            record.verify_otp(&Actor::provider(8), "123456", now(), CapturePolicy::AtCreation),
            Err(BookingError::Unauthorized(UserId(8)))
        ));
        // The client owns the booking but cannot confirm it.
        assert!(matches!(
            record.plan(&Actor::client(1), BookingEvent::Confirm, CapturePolicy::AtCreation),
            Err(BookingError::Unauthorized(UserId(1)))
        ));
        assert!(matches!(
            record.plan(&Actor::client(7), BookingEvent::Start, CapturePolicy::AtCreation),
            Err(BookingError::Unauthorized(UserId(7)))
        ));
    }

    #[test]
    fn test_happy_path_releases_escrow() {
        let mut record = record();
        let provider = Actor::provider(7);

        verify_and_confirm(&mut record, provider);
        drive(&mut record, provider, BookingEvent::Start).unwrap();
        drive(&mut record, provider, BookingEvent::Complete).unwrap();

        assert_eq!(record.booking.state, BookingState::Completed);
        assert_eq!(record.booking.completed_at, Some(now()));
        assert_eq!(record.escrow.as_ref().unwrap().status, EscrowStatus::Released);

        let credits: Vec<_> = record.credits().map(|e| (e.account, e.amount)).collect();
        assert_eq!(
            credits,
            vec![
                (LedgerAccount::Provider(UserId(7)), Balance(9_500)),
                (LedgerAccount::Platform, Balance(500)),
            ]
        );

        // Completing again is a no-op.
        drive(&mut record, provider, BookingEvent::Complete).unwrap();
        assert_eq!(record.credits().count(), 2);
    }

    #[test]
    fn test_cancel_from_created_refunds_and_invalidates_code() {
        let mut record = record();
        drive(&mut record, Actor::client(1), BookingEvent::Cancel).unwrap();

        assert_eq!(record.booking.state, BookingState::Cancelled);
        assert_eq!(record.escrow.as_ref().unwrap().status, EscrowStatus::Reversed);
        assert!(record.otp.invalidated_at.is_some());

        let refund = record.credits().next().unwrap();
        assert_eq!(refund.kind, EntryKind::ClientRefund);
        assert_eq!(refund.amount, Balance(10_000));

        assert!(matches!(
            record.verify_otp(&Actor::provider(7), "123456", now(), CapturePolicy::AtCreation),
            Err(BookingError::InvalidTransition {
                from: BookingState::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_verify_replay_reports_already_verified() {
        let mut record = record();
        let provider = Actor::provider(7);
        verify_and_confirm(&mut record, provider);

        assert!(matches!(
            record.verify_otp(&provider, "123456", now(), CapturePolicy::AtCreation),
            Err(BookingError::AlreadyVerified)
        ));
    }

    #[test]
    fn test_reissue_only_replaces_unusable_challenge() {
        let mut record = record();
        let client = Actor::client(1);
        let fresh = OtpCode::parse("654321").unwrap();

        assert!(matches!(
            record.reissue_otp(&client, fresh.clone(), now(), OtpPolicy::default()),
            Err(BookingError::DuplicateChallenge(_))
        ));
        assert!(matches!(
            record.reissue_otp(&Actor::provider(7), fresh.clone(), now(), OtpPolicy::default()),
            Err(BookingError::Unauthorized(_))
        ));

        let later = now() + Duration::minutes(31);
        let code = record
            .reissue_otp(&client, fresh, later, OtpPolicy::default())
            .unwrap();
        assert_eq!(code.as_str(), "654321");
        assert_eq!(record.otp.attempts_remaining, 5);
        assert!(
            record
                .verify_otp(&Actor::provider(7), "654321", later, CapturePolicy::AtCreation)
                .is_ok()
        );
    }

    #[test]
    fn test_release_without_escrow_is_rejected() {
        let mut record = record();
        record.escrow = None;
        let result = record.commit(BookingState::Completed, &[Effect::ReleaseEscrow], ctx());
        assert!(matches!(result, Err(BookingError::NotFound { entity: "escrow", .. })));
    }
}
