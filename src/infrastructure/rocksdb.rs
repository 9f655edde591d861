use crate::domain::booking::{Booking, BookingRecord};
use crate::domain::ids::{BookingId, UserId};
use crate::domain::ports::BookingStore;
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing booking aggregates.
pub const CF_BOOKINGS: &str = "bookings";

/// A persistent store implementation using RocksDB.
///
/// Each booking aggregate is kept as one JSON value keyed by the booking id,
/// so state, challenge and escrow are written in a single put. Writers take
/// `write_lock` so the version comparison and the put are atomic.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "bookings" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_bookings = ColumnFamilyDescriptor::new(CF_BOOKINGS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_bookings])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_BOOKINGS).ok_or_else(|| {
            BookingError::infrastructure(std::io::Error::other("Bookings column family not found"))
        })
    }

    fn read(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        let cf = self.cf()?;
        match self.db.get_pinned_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &BookingRecord) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(record)?;
        self.db.put_cf(cf, record.id().as_bytes(), value)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<BookingRecord>> {
        let cf = self.cf()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl BookingStore for RocksDBStore {
    async fn insert(&self, record: BookingRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read(record.id())?.is_some() {
            return Err(BookingError::Validation(format!(
                "Booking {} already exists",
                record.id()
            )));
        }
        self.write(&record)
    }

    async fn load(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        self.read(id)
    }

    async fn save(&self, mut record: BookingRecord, expected_version: u64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let id = record.id();
        let stored = self
            .read(id)?
            .ok_or_else(|| BookingError::not_found("booking", id))?;

        if stored.version != expected_version {
            return Err(BookingError::StaleVersion {
                id,
                expected: expected_version,
            });
        }

        record.version = expected_version + 1;
        self.write(&record)?;
        Ok(record.version)
    }

    async fn active_for_provider(&self, provider: UserId) -> Result<Vec<Booking>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|record| record.booking)
            .filter(|booking| booking.provider_id == provider && booking.state.is_active())
            .collect())
    }

    async fn all(&self) -> Result<Vec<BookingRecord>> {
        self.scan()
    }
}
