use crate::domain::ids::{ServiceId, UserId};
use crate::domain::money::Amount;
use crate::domain::ports::ServiceListing;
use crate::error::{BookingError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    service: u64,
    provider: u64,
    /// Minor currency units.
    price: Amount,
}

impl From<CatalogRow> for ServiceListing {
    fn from(row: CatalogRow) -> Self {
        Self {
            service_id: ServiceId(row.service),
            provider_id: UserId(row.provider),
            price: row.price,
        }
    }
}

/// Reads `service,provider,price` rows into catalog listings.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Reads every listing, failing on the first malformed row.
    pub fn listings(self) -> Result<Vec<ServiceListing>> {
        self.reader
            .into_deserialize::<CatalogRow>()
            .map(|row| {
                row.map(ServiceListing::from)
                    .map_err(|e| BookingError::Validation(format!("Malformed catalog entry: {e}")))
            })
            .collect()
    }
}
