use super::slot_guard::SlotConflictGuard;
use crate::config::BookingConfig;
use crate::domain::booking::{
    Booking, BookingEvent, BookingRecord, BookingState, BookingSummary, CapturePolicy,
    CommitContext, Effect, Transition,
};
use crate::domain::escrow::{CardDetails, CardSummary, EscrowStatus, LedgerAccount, PaymentReceipt};
use crate::domain::ids::{Actor, BookingId, Role, ServiceId};
use crate::domain::money::Balance;
use crate::domain::otp::{OtpChallenge, OtpCode, VerificationResult};
use crate::domain::ports::{BookingStoreBox, Clock, CodeGenerator, PaymentGateway, ServiceCatalog};
use crate::domain::slot::TimeSlot;
use crate::error::{BookingError, Result};
use crate::infrastructure::gateway::SimulatedGateway;
use crate::infrastructure::system::{SecureCodeGenerator, SystemClock};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

/// A client's request for a new booking.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: ServiceId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
    pub card: CardDetails,
}

/// Result of a successful booking request.
///
/// `otp_code` is meant for the client only; the provider has to obtain it from
/// the client on site.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking: Booking,
    pub otp_code: OtpCode,
    pub payment_reference: Option<String>,
}

/// The only entry point into the booking core.
///
/// Every public operation is one logical transaction over a single booking
/// aggregate: load, validate, apply, then save under the version that was
/// loaded. Losing a concurrent save means reloading and re-validating, so the
/// loser observes the winner's state instead of overwriting it.
pub struct BookingService {
    store: BookingStoreBox,
    catalog: Box<dyn ServiceCatalog>,
    gateway: Box<dyn PaymentGateway>,
    codes: Box<dyn CodeGenerator>,
    clock: Box<dyn Clock>,
    slots: SlotConflictGuard,
    config: BookingConfig,
}

impl BookingService {
    /// Creates a service with the simulated gateway, OS-backed code generator
    /// and system clock. Use the `with_*` methods to swap them.
    pub fn new(store: BookingStoreBox, catalog: Box<dyn ServiceCatalog>, config: BookingConfig) -> Self {
        Self {
            store,
            catalog,
            gateway: Box::new(SimulatedGateway::approving()),
            codes: Box::new(SecureCodeGenerator),
            clock: Box::new(SystemClock),
            slots: SlotConflictGuard::new(),
            config,
        }
    }

    pub fn with_gateway(mut self, gateway: impl PaymentGateway + 'static) -> Self {
        self.gateway = Box::new(gateway);
        self
    }

    pub fn with_code_generator(mut self, codes: impl CodeGenerator + 'static) -> Self {
        self.codes = Box::new(codes);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[instrument(skip_all, fields(client = %actor.user_id, service = %request.service_id))]
    pub async fn create_booking(&self, actor: &Actor, request: BookingRequest) -> Result<NewBooking> {
        if actor.role != Role::Client {
            return Err(BookingError::Unauthorized(actor.user_id));
        }
        let slot = TimeSlot::new(request.start, request.end)?;
        let location = request.location.trim();
        if location.is_empty() {
            return Err(BookingError::Validation("Location is required".to_string()));
        }
        let card = CardSummary::try_from(&request.card)?;
        let listing = self
            .catalog
            .lookup(request.service_id)
            .await?
            .ok_or_else(|| BookingError::not_found("service", request.service_id))?;

        let reservation = self
            .slots
            .reserve(self.store.as_ref(), listing.provider_id, slot)
            .await?;

        let now = self.clock.now();
        let id = BookingId::new();
        let code = self.codes.generate()?;
        let booking = Booking {
            id,
            client_id: actor.user_id,
            provider_id: listing.provider_id,
            service_id: listing.service_id,
            slot,
            location: location.to_string(),
            price: listing.price,
            card,
            state: BookingState::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let otp = OtpChallenge::issue(id, code.clone(), now, self.config.otp_policy()?)?;
        let mut record = BookingRecord::open(booking, otp);

        let receipt = match self.config.capture_policy {
            CapturePolicy::AtCreation => Some(self.capture(&record.booking).await?),
            CapturePolicy::AtConfirmation => None,
        };
        if let Some(receipt) = &receipt {
            record.hold_escrow(receipt.clone(), self.config.platform_fee_rate, now);
        }

        let booking = record.booking.clone();
        if let Err(err) = self.store.insert(record).await {
            self.void(receipt.as_ref()).await;
            return Err(err);
        }
        drop(reservation);

        info!(
            booking_id = %id,
            provider = %booking.provider_id,
            start = %slot.start,
            end = %slot.end,
            amount = booking.price.value(),
            "booking created"
        );
        Ok(NewBooking {
            booking,
            otp_code: code,
            payment_reference: receipt.map(|r| r.reference),
        })
    }

    /// Checks the provider's code. A match confirms the booking in the same
    /// save, capturing the payment first under `AtConfirmation`.
    #[instrument(skip_all, fields(booking_id = %id, actor = %actor.user_id))]
    pub async fn verify_otp(&self, id: BookingId, code: &str, actor: &Actor) -> Result<VerificationResult> {
        let mut retries = 0;
        loop {
            let mut record = self.load(id).await?;
            let before = record.clone();
            let now = self.clock.now();

            let mut receipt = None;
            let outcome = match record.verify_otp(actor, code, now, self.config.capture_policy) {
                Ok((result, effects)) => {
                    if effects.contains(&Effect::CaptureEscrow) {
                        receipt = Some(self.capture(&record.booking).await?);
                    }
                    let ctx = CommitContext {
                        now,
                        fee_rate: self.config.platform_fee_rate,
                        receipt: receipt.clone(),
                    };
                    if let Err(err) = record.commit(BookingState::Confirmed, &effects, ctx) {
                        self.void(receipt.as_ref()).await;
                        return Err(err);
                    }
                    Ok(result)
                }
                Err(err) => Err(err),
            };

            if record == before {
                return outcome;
            }
            match self.store.save(record, before.version).await {
                Ok(_) => {
                    match &outcome {
                        Ok(_) => info!("verification code accepted, booking confirmed"),
                        Err(BookingError::CodeMismatch { attempts_remaining }) => {
                            warn!(attempts_remaining, "verification code rejected")
                        }
                        Err(BookingError::AttemptsExhausted) => warn!("verification attempts exhausted"),
                        Err(_) => {}
                    }
                    return outcome;
                }
                Err(BookingError::StaleVersion { .. }) if retries < self.config.max_save_retries => {
                    self.void(receipt.as_ref()).await;
                    retries += 1;
                    debug!(retries, "lost a concurrent update, retrying");
                }
                Err(err) => {
                    self.void(receipt.as_ref()).await;
                    return Err(err);
                }
            }
        }
    }

    /// Issues a fresh code once the current one has expired or run out of attempts.
    #[instrument(skip_all, fields(booking_id = %id, actor = %actor.user_id))]
    pub async fn reissue_otp(&self, id: BookingId, actor: &Actor) -> Result<OtpCode> {
        let code = self.codes.generate()?;
        let policy = self.config.otp_policy()?;
        let code = self
            .mutate(id, |record, now| record.reissue_otp(actor, code.clone(), now, policy))
            .await?;
        info!("verification code reissued");
        Ok(code)
    }

    pub async fn confirm_booking(&self, id: BookingId, actor: &Actor) -> Result<Booking> {
        self.apply(id, actor, BookingEvent::Confirm).await
    }

    pub async fn start_service(&self, id: BookingId, actor: &Actor) -> Result<Booking> {
        self.apply(id, actor, BookingEvent::Start).await
    }

    pub async fn complete_service(&self, id: BookingId, actor: &Actor) -> Result<Booking> {
        self.apply(id, actor, BookingEvent::Complete).await
    }

    pub async fn cancel_booking(&self, id: BookingId, actor: &Actor) -> Result<Booking> {
        self.apply(id, actor, BookingEvent::Cancel).await
    }

    pub async fn get_booking(&self, id: BookingId, actor: &Actor) -> Result<BookingSummary> {
        let record = self.load(id).await?;
        if !record.booking.is_participant(actor) {
            return Err(BookingError::Unauthorized(actor.user_id));
        }
        Ok(record.summary())
    }

    /// Bookings the actor takes part in, newest first.
    pub async fn list_bookings(&self, actor: &Actor) -> Result<Vec<BookingSummary>> {
        let mut summaries: Vec<BookingSummary> = self
            .store
            .all()
            .await?
            .iter()
            .filter(|record| record.booking.is_participant(actor))
            .map(BookingRecord::summary)
            .collect();
        summaries.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        Ok(summaries)
    }

    /// Total credited to each ledger account across all bookings.
    pub async fn balances(&self) -> Result<BTreeMap<LedgerAccount, Balance>> {
        let mut balances = BTreeMap::new();
        for record in self.store.all().await? {
            for entry in record.credits() {
                let balance = balances.entry(entry.account).or_insert(Balance::ZERO);
                *balance = balance.checked_add(entry.amount)?;
            }
        }
        Ok(balances)
    }

    pub async fn balance_of(&self, account: LedgerAccount) -> Result<Balance> {
        Ok(self
            .balances()
            .await?
            .get(&account)
            .copied()
            .unwrap_or(Balance::ZERO))
    }

    /// Funds currently captured but not yet settled.
    pub async fn held_in_escrow(&self) -> Result<Balance> {
        self.store
            .all()
            .await?
            .iter()
            .filter_map(|record| record.escrow.as_ref())
            .filter(|escrow| escrow.status == EscrowStatus::Held)
            .try_fold(Balance::ZERO, |total, escrow| {
                total.checked_add(Balance::from(escrow.captured_amount))
            })
    }

    #[instrument(skip_all, fields(booking_id = %id, actor = %actor.user_id, action = event.as_str()))]
    async fn apply(&self, id: BookingId, actor: &Actor, event: BookingEvent) -> Result<Booking> {
        let mut retries = 0;
        loop {
            let mut record = self.load(id).await?;
            let from = record.booking.state;
            let (to, effects) = match record.plan(actor, event, self.config.capture_policy)? {
                Transition::AlreadyApplied => return Ok(record.booking),
                Transition::Applied { to, effects } => (to, effects),
            };

            let receipt = if effects.contains(&Effect::CaptureEscrow) {
                Some(self.capture(&record.booking).await?)
            } else {
                None
            };

            let expected = record.version;
            let ctx = CommitContext {
                now: self.clock.now(),
                fee_rate: self.config.platform_fee_rate,
                receipt: receipt.clone(),
            };
            if let Err(err) = record.commit(to, &effects, ctx) {
                self.void(receipt.as_ref()).await;
                return Err(err);
            }

            let booking = record.booking.clone();
            match self.store.save(record, expected).await {
                Ok(_) => {
                    info!(%from, %to, "booking transitioned");
                    return Ok(booking);
                }
                Err(BookingError::StaleVersion { .. }) if retries < self.config.max_save_retries => {
                    self.void(receipt.as_ref()).await;
                    retries += 1;
                    debug!(retries, "lost a concurrent update, retrying");
                }
                Err(err) => {
                    self.void(receipt.as_ref()).await;
                    return Err(err);
                }
            }
        }
    }

    /// Runs `op` against the latest record and saves whatever it changed, even
    /// when it fails.
    async fn mutate<T, F>(&self, id: BookingId, mut op: F) -> Result<T>
    where
        F: FnMut(&mut BookingRecord, DateTime<Utc>) -> Result<T> + Send,
        T: Send,
    {
        let mut retries = 0;
        loop {
            let mut record = self.load(id).await?;
            let before = record.clone();
            let outcome = op(&mut record, self.clock.now());
            if record == before {
                return outcome;
            }

            match self.store.save(record, before.version).await {
                Ok(_) => return outcome,
                Err(BookingError::StaleVersion { .. }) if retries < self.config.max_save_retries => {
                    retries += 1;
                    debug!(retries, "lost a concurrent update, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn load(&self, id: BookingId) -> Result<BookingRecord> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    async fn capture(&self, booking: &Booking) -> Result<PaymentReceipt> {
        self.gateway
            .capture(booking.id, booking.price, &booking.card)
            .await
            .inspect_err(|err| warn!(booking_id = %booking.id, error = %err, "payment capture failed"))
    }

    async fn void(&self, receipt: Option<&PaymentReceipt>) {
        if let Some(receipt) = receipt
            && let Err(err) = self.gateway.void(receipt).await
        {
            error!(reference = %receipt.reference, error = %err, "failed to void capture");
        }
    }
}
