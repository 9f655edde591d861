use crate::domain::booking::{Booking, BookingRecord};
use crate::domain::ids::{BookingId, ServiceId, UserId};
use crate::domain::ports::{BookingStore, ServiceCatalog, ServiceListing};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for booking aggregates.
///
/// Uses `Arc<RwLock<HashMap<BookingId, BookingRecord>>>`; the version check in
/// `save` runs under the write lock, so compare-and-swap is atomic.
#[derive(Default, Clone)]
pub struct InMemoryBookingStore {
    records: Arc<RwLock<HashMap<BookingId, BookingRecord>>>,
}

impl InMemoryBookingStore {
    /// Creates a new, empty in-memory booking store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, record: BookingRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.entry(record.id()) {
            Entry::Occupied(_) => Err(BookingError::Validation(format!(
                "Booking {} already exists",
                record.id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn load(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn save(&self, mut record: BookingRecord, expected_version: u64) -> Result<u64> {
        let mut records = self.records.write().await;
        let id = record.id();
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| BookingError::not_found("booking", id))?;

        if stored.version != expected_version {
            return Err(BookingError::StaleVersion {
                id,
                expected: expected_version,
            });
        }

        record.version = expected_version + 1;
        *stored = record;
        Ok(expected_version + 1)
    }

    async fn active_for_provider(&self, provider: UserId) -> Result<Vec<Booking>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .map(|record| &record.booking)
            .filter(|booking| booking.provider_id == provider && booking.state.is_active())
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<BookingRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}

/// Catalog lookups backed by a fixed set of listings.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    listings: Arc<RwLock<HashMap<ServiceId, ServiceListing>>>,
}

impl InMemoryCatalog {
    pub fn from_listings<I>(listings: I) -> Self
    where
        I: IntoIterator<Item = ServiceListing>,
    {
        let listings = listings
            .into_iter()
            .map(|listing| (listing.service_id, listing))
            .collect();
        Self {
            listings: Arc::new(RwLock::new(listings)),
        }
    }

    pub async fn register(&self, listing: ServiceListing) {
        let mut listings = self.listings.write().await;
        listings.insert(listing.service_id, listing);
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn lookup(&self, service_id: ServiceId) -> Result<Option<ServiceListing>> {
        let listings = self.listings.read().await;
        Ok(listings.get(&service_id).cloned())
    }
}
