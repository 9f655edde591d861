#![allow(dead_code)]

use booking_escrow::application::booking_service::{BookingRequest, BookingService};
use booking_escrow::config::BookingConfig;
use booking_escrow::domain::escrow::CardDetails;
use booking_escrow::domain::ids::{ServiceId, UserId};
use booking_escrow::domain::money::Amount;
use booking_escrow::domain::otp::OtpCode;
use booking_escrow::domain::ports::{Clock, CodeGenerator, ServiceListing};
use booking_escrow::error::Result;
use booking_escrow::infrastructure::gateway::SimulatedGateway;
use booking_escrow::infrastructure::in_memory::{InMemoryBookingStore, InMemoryCatalog};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const CLIENT: u64 = 1;
pub const OTHER_CLIENT: u64 = 2;
pub const PROVIDER: u64 = 7;
pub const SERVICE: ServiceId = ServiceId(10);
pub const PRICE: u64 = 10_000;
pub const CODE: &str = "482913";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

/// A clock tests can move forward by hand. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Hands out queued codes, then `CODE` forever.
#[derive(Clone, Default)]
pub struct ScriptedCodes(Arc<Mutex<VecDeque<&'static str>>>);

impl ScriptedCodes {
    pub fn new(codes: &[&'static str]) -> Self {
        Self(Arc::new(Mutex::new(codes.iter().copied().collect())))
    }
}

impl CodeGenerator for ScriptedCodes {
    fn generate(&self) -> Result<OtpCode> {
        let next = self.0.lock().unwrap().pop_front().unwrap_or(CODE);
        OtpCode::parse(next)
    }
}

pub struct Harness {
    pub service: BookingService,
    pub store: InMemoryBookingStore,
    pub gateway: SimulatedGateway,
    pub clock: ManualClock,
}

pub fn harness(config: BookingConfig) -> Harness {
    harness_with(config, SimulatedGateway::approving(), ScriptedCodes::default())
}

pub fn harness_with(config: BookingConfig, gateway: SimulatedGateway, codes: ScriptedCodes) -> Harness {
    let store = InMemoryBookingStore::new();
    let clock = ManualClock::new(epoch());
    let catalog = InMemoryCatalog::from_listings([ServiceListing {
        service_id: SERVICE,
        provider_id: UserId(PROVIDER),
        price: Amount::new(PRICE).unwrap(),
    }]);
    let service = BookingService::new(Box::new(store.clone()), Box::new(catalog), config)
        .with_gateway(gateway.clone())
        .with_clock(clock.clone())
        .with_code_generator(codes);

    Harness {
        service,
        store,
        gateway,
        clock,
    }
}

pub fn card() -> CardDetails {
    CardDetails {
        number: "4242424242424242".to_string(),
        holder: "Ada Lovelace".to_string(),
    }
}

/// A request for the test service, `from_hour` to `to_hour` hours after `epoch()`.
pub fn request(from_hour: i64, to_hour: i64) -> BookingRequest {
    BookingRequest {
        service_id: SERVICE,
        start: epoch() + Duration::hours(from_hour),
        end: epoch() + Duration::hours(to_hour),
        location: "12 Elm Street".to_string(),
        card: card(),
    }
}
