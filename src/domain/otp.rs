use super::ids::BookingId;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

pub const CODE_LENGTH: usize = 6;
const CODE_SPACE: u32 = 1_000_000;

/// A six digit one-time code. Leading zeros are significant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OtpCode(String);

impl OtpCode {
    pub fn from_number(value: u32) -> Result<Self> {
        if value < CODE_SPACE {
            Ok(Self(format!("{value:06}")))
        } else {
            Err(BookingError::Validation(format!(
                "Verification code {value} has more than {CODE_LENGTH} digits"
            )))
        }
    }

    pub fn parse(code: &str) -> Result<Self> {
        if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(code.to_string()))
        } else {
            Err(BookingError::Validation(format!(
                "Verification code must be {CODE_LENGTH} ASCII digits"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, submitted: &str) -> bool {
        // Lengths are public, only the contents must not leak through timing.
        self.0.as_bytes().ct_eq(submitted.as_bytes()).into()
    }
}

impl TryFrom<String> for OtpCode {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<OtpCode> for String {
    fn from(code: OtpCode) -> Self {
        code.0
    }
}

impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpCode(******)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub max_attempts: u8,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(30),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub booking_id: BookingId,
    pub verified_at: DateTime<Utc>,
}

/// The verification challenge bound to a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub booking_id: BookingId,
    code: OtpCode,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: u8,
    pub verified_at: Option<DateTime<Utc>>,
    /// Set when the booking leaves the state that required the challenge.
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl OtpChallenge {
    pub fn issue(
        booking_id: BookingId,
        code: OtpCode,
        now: DateTime<Utc>,
        policy: OtpPolicy,
    ) -> Result<Self> {
        let expires_at = now.checked_add_signed(policy.ttl).ok_or_else(|| {
            BookingError::Validation(format!("Code lifetime {} is out of range", policy.ttl))
        })?;
        Ok(Self {
            booking_id,
            code,
            issued_at: now,
            expires_at,
            attempts_remaining: policy.max_attempts,
            verified_at: None,
            invalidated_at: None,
        })
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the challenge could still be answered correctly.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_verified()
            && self.invalidated_at.is_none()
            && !self.is_expired(now)
            && self.attempts_remaining > 0
    }

    pub fn verify(&mut self, submitted: &str, now: DateTime<Utc>) -> Result<VerificationResult> {
        if self.is_verified() {
            return Err(BookingError::AlreadyVerified);
        }
        if self.invalidated_at.is_some() || self.is_expired(now) {
            return Err(BookingError::Expired);
        }
        if self.attempts_remaining == 0 {
            return Err(BookingError::AttemptsExhausted);
        }

        if self.code.matches(submitted) {
            self.verified_at = Some(now);
            return Ok(VerificationResult {
                booking_id: self.booking_id,
                verified_at: now,
            });
        }

        self.attempts_remaining -= 1;
        if self.attempts_remaining == 0 {
            Err(BookingError::AttemptsExhausted)
        } else {
            Err(BookingError::CodeMismatch {
                attempts_remaining: self.attempts_remaining,
            })
        }
    }

    pub fn invalidate(&mut self, now: DateTime<Utc>) {
        if !self.is_verified() && self.invalidated_at.is_none() {
            self.invalidated_at = Some(now);
        }
    }
}
