use crate::domain::ids::UserId;
use crate::domain::ports::BookingStore;
use crate::domain::slot::TimeSlot;
use crate::error::{BookingError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Serializes slot reservations per provider.
///
/// The persisted bookings are the source of truth: a slot is taken while an
/// active booking covers it, so cancelling a booking frees its slot as soon as
/// the cancellation is saved.
#[derive(Default)]
pub struct SlotConflictGuard {
    providers: RwLock<HashMap<UserId, Arc<Mutex<()>>>>,
}

/// Proof that a slot was free. The provider stays locked until this is
/// dropped, which must happen after the new booking has been stored.
#[derive(Debug)]
pub struct SlotReservation {
    pub provider: UserId,
    pub slot: TimeSlot,
    _permit: OwnedMutexGuard<()>,
}

impl SlotConflictGuard {
    pub fn new() -> Self {
        Self::default()
    }

    async fn provider_lock(&self, provider: UserId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.providers.read().await.get(&provider) {
            return lock.clone();
        }
        let mut providers = self.providers.write().await;
        providers.entry(provider).or_default().clone()
    }

    pub async fn reserve(
        &self,
        store: &dyn BookingStore,
        provider: UserId,
        slot: TimeSlot,
    ) -> Result<SlotReservation> {
        let permit = self.provider_lock(provider).await.lock_owned().await;

        let active = store.active_for_provider(provider).await?;
        if let Some(existing) = active.iter().find(|booking| booking.slot.overlaps(&slot)) {
            tracing::debug!(
                %provider,
                existing = %existing.id,
                "slot conflicts with an active booking"
            );
            return Err(BookingError::Conflict {
                provider,
                start: slot.start,
                end: slot.end,
            });
        }

        Ok(SlotReservation {
            provider,
            slot,
            _permit: permit,
        })
    }
}
