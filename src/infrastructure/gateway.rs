use crate::domain::escrow::{CardSummary, PaymentReceipt};
use crate::domain::ids::BookingId;
use crate::domain::money::Amount;
use crate::domain::ports::PaymentGateway;
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stand-in for a card processor. Approves every capture unless built with
/// [`SimulatedGateway::declining`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    decline_reason: Option<String>,
    captures: Arc<AtomicUsize>,
    voids: Arc<AtomicUsize>,
}

impl SimulatedGateway {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Number of approved captures so far, shared between clones.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn voids(&self) -> usize {
        self.voids.load(Ordering::SeqCst)
    }
}

/// `PAY-<UTC timestamp>-<8 hex digits>`
pub fn payment_reference() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("PAY-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn capture(&self, booking_id: BookingId, amount: Amount, card: &CardSummary) -> Result<PaymentReceipt> {
        if let Some(reason) = &self.decline_reason {
            return Err(BookingError::PaymentDeclined(reason.clone()));
        }

        let reference = payment_reference();
        self.captures.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            %booking_id,
            amount = amount.value(),
            card = %card.last4,
            %reference,
            "payment captured"
        );
        Ok(PaymentReceipt { reference })
    }

    async fn void(&self, receipt: &PaymentReceipt) -> Result<()> {
        self.voids.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(reference = %receipt.reference, "payment voided");
        Ok(())
    }
}
