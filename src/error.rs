use crate::domain::booking::BookingState;
use crate::domain::escrow::EscrowStatus;
use crate::domain::ids::{BookingId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BookingError>;

/// Every failure the booking core can report.
///
/// All variants except `Infrastructure` are business-rule outcomes the caller
/// is expected to translate into a response. `Infrastructure` wraps storage and
/// I/O failures; its message carries no detail and the source is only meant
/// for logs.
#[derive(Error, Debug)]
pub enum BookingError {
    #[error("cannot {action} a booking in state {from}")]
    InvalidTransition {
        from: BookingState,
        action: &'static str,
    },
    #[error("user {0} is not allowed to perform this action")]
    Unauthorized(UserId),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("verification code has expired")]
    Expired,
    #[error("no verification attempts remaining")]
    AttemptsExhausted,
    #[error("verification code does not match, {attempts_remaining} attempts remaining")]
    CodeMismatch { attempts_remaining: u8 },
    #[error("verification code has already been used")]
    AlreadyVerified,
    #[error("booking {0} already has an active verification code")]
    DuplicateChallenge(BookingId),
    #[error("provider {provider} already has a booking overlapping {start} - {end}")]
    Conflict {
        provider: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("escrow is not held (status: {0})")]
    NotHeld(EscrowStatus),
    #[error("escrow has already been released")]
    AlreadyReleased,
    #[error("payment declined: {0}")]
    PaymentDeclined(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("booking {id} was modified concurrently (expected version {expected})")]
    StaleVersion { id: BookingId, expected: u64 },
    #[error("infrastructure failure")]
    Infrastructure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn infrastructure<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Infrastructure(Box::new(err))
    }

    /// True for failures the caller caused and can act on.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, Self::Infrastructure(_))
    }
}

impl From<std::io::Error> for BookingError {
    fn from(err: std::io::Error) -> Self {
        Self::infrastructure(err)
    }
}

impl From<csv::Error> for BookingError {
    fn from(err: csv::Error) -> Self {
        Self::infrastructure(err)
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(err: serde_json::Error) -> Self {
        Self::infrastructure(err)
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for BookingError {
    fn from(err: rocksdb::Error) -> Self {
        Self::infrastructure(err)
    }
}
