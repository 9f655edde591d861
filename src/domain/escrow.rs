use super::ids::{BookingId, UserId};
use super::money::{Amount, Balance, FeeRate, FeeSplit};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Held,
    Released,
    Reversed,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Held => "HELD",
            Self::Released => "RELEASED",
            Self::Reversed => "REVERSED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardBrand {
    Visa,
    Mastercard,
    AmericanExpress,
    Unknown,
}

impl CardBrand {
    pub fn from_number(number: &str) -> Self {
        match number.chars().next() {
            Some('4') => Self::Visa,
            Some('5') => Self::Mastercard,
            Some('3') => Self::AmericanExpress,
            _ => Self::Unknown,
        }
    }
}

/// Card data as submitted by the client. Never persisted.
#[derive(Clone)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &"****")
            .field("holder", &self.holder)
            .finish()
    }
}

/// The part of a card that is safe to keep: brand and last four digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub last4: String,
    pub brand: CardBrand,
    pub holder: String,
}

impl TryFrom<&CardDetails> for CardSummary {
    type Error = BookingError;

    fn try_from(card: &CardDetails) -> Result<Self> {
        let number: String = card.number.chars().filter(|c| !c.is_whitespace()).collect();
        if number.len() < 12 || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BookingError::Validation(
                "Card number must contain at least 12 digits".to_string(),
            ));
        }
        if card.holder.trim().is_empty() {
            return Err(BookingError::Validation(
                "Card holder name is required".to_string(),
            ));
        }

        Ok(Self {
            last4: number[number.len() - 4..].to_string(),
            brand: CardBrand::from_number(&number),
            holder: card.holder.trim().to_string(),
        })
    }
}

/// Proof of a successful capture returned by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub reference: String,
}

/// Funds captured from a client and held until the booking settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub booking_id: BookingId,
    pub captured_amount: Amount,
    pub platform_fee_rate: FeeRate,
    pub status: EscrowStatus,
    pub payment_reference: String,
    pub captured_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reversal {
    pub client_refund: Balance,
}

impl EscrowTransaction {
    pub fn hold(
        booking_id: BookingId,
        amount: Amount,
        rate: FeeRate,
        receipt: PaymentReceipt,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id,
            captured_amount: amount,
            platform_fee_rate: rate,
            status: EscrowStatus::Held,
            payment_reference: receipt.reference,
            captured_at: now,
            settled_at: None,
        }
    }

    /// Pays the held funds out to the provider, minus the platform fee.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<FeeSplit> {
        match self.status {
            EscrowStatus::Held => {
                self.status = EscrowStatus::Released;
                self.settled_at = Some(now);
                Ok(self.platform_fee_rate.split(self.captured_amount))
            }
            EscrowStatus::Released => Err(BookingError::AlreadyReleased),
            EscrowStatus::Reversed => Err(BookingError::NotHeld(self.status)),
        }
    }

    /// Returns the full captured amount to the client.
    pub fn reverse(&mut self, now: DateTime<Utc>) -> Result<Reversal> {
        match self.status {
            EscrowStatus::Held => {
                self.status = EscrowStatus::Reversed;
                self.settled_at = Some(now);
                Ok(Reversal {
                    client_refund: self.captured_amount.into(),
                })
            }
            status => Err(BookingError::NotHeld(status)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user", rename_all = "lowercase")]
pub enum LedgerAccount {
    Client(UserId),
    Provider(UserId),
    Platform,
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Provider(id) => write!(f, "provider:{id}"),
            Self::Platform => f.write_str("platform"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    PaymentHeld,
    ProviderPayout,
    PlatformFee,
    ClientRefund,
}

impl EntryKind {
    /// Whether the entry credits its account. Held payments are audit only.
    pub fn is_credit(&self) -> bool {
        !matches!(self, Self::PaymentHeld)
    }
}

/// One money movement in a booking's payment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: EntryKind,
    pub account: LedgerAccount,
    pub amount: Balance,
    pub reference: String,
    pub recorded_at: DateTime<Utc>,
}
