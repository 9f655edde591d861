use super::booking::{Booking, BookingRecord};
use super::escrow::{CardSummary, PaymentReceipt};
use super::ids::{BookingId, ServiceId, UserId};
use super::money::Amount;
use super::otp::OtpCode;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence for booking aggregates with optimistic versioning.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Stores a new record. Fails if the id is already taken.
    async fn insert(&self, record: BookingRecord) -> Result<()>;
    async fn load(&self, id: BookingId) -> Result<Option<BookingRecord>>;
    /// Replaces the record if its stored version is still `expected_version`,
    /// returning the new version. Fails with `StaleVersion` otherwise.
    async fn save(&self, record: BookingRecord, expected_version: u64) -> Result<u64>;
    /// Bookings of `provider` that still occupy a slot.
    async fn active_for_provider(&self, provider: UserId) -> Result<Vec<Booking>>;
    async fn all(&self) -> Result<Vec<BookingRecord>>;
}

pub type BookingStoreBox = Box<dyn BookingStore>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceListing {
    pub service_id: ServiceId,
    pub provider_id: UserId,
    pub price: Amount,
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn lookup(&self, service_id: ServiceId) -> Result<Option<ServiceListing>>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Takes `amount` from the client's card. Fails with `PaymentDeclined`.
    async fn capture(&self, booking_id: BookingId, amount: Amount, card: &CardSummary) -> Result<PaymentReceipt>;
    /// Cancels a capture whose booking was never persisted.
    async fn void(&self, receipt: &PaymentReceipt) -> Result<()>;
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> Result<OtpCode>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
