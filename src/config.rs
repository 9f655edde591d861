use crate::domain::booking::CapturePolicy;
use crate::domain::money::FeeRate;
use crate::domain::otp::OtpPolicy;
use crate::error::{BookingError, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Longest lifetime a verification code may be configured with.
pub const MAX_OTP_TTL_SECS: u64 = 24 * 60 * 60;

/// Deployment-level knobs of the booking core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookingConfig {
    /// How long an issued verification code stays valid, in seconds.
    pub otp_ttl_secs: u64,
    /// Wrong codes tolerated before a challenge is exhausted.
    pub otp_max_attempts: u8,
    pub platform_fee_rate: FeeRate,
    pub capture_policy: CapturePolicy,
    /// Reload-and-retry rounds after losing an optimistic write.
    pub max_save_retries: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            otp_ttl_secs: 30 * 60,
            otp_max_attempts: 5,
            platform_fee_rate: FeeRate::default(),
            capture_policy: CapturePolicy::AtCreation,
            max_save_retries: 3,
        }
    }
}

impl BookingConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| BookingError::Validation(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `BOOKING_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BOOKING_OTP_TTL_SECS") {
            self.otp_ttl_secs = parse("BOOKING_OTP_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("BOOKING_OTP_MAX_ATTEMPTS") {
            self.otp_max_attempts = parse("BOOKING_OTP_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("BOOKING_PLATFORM_FEE_RATE") {
            let rate: Decimal = parse("BOOKING_PLATFORM_FEE_RATE", &value)?;
            self.platform_fee_rate = FeeRate::new(rate)?;
        }
        if let Some(value) = lookup("BOOKING_CAPTURE_POLICY") {
            self.capture_policy = value.parse()?;
        }
        if let Some(value) = lookup("BOOKING_MAX_SAVE_RETRIES") {
            self.max_save_retries = parse("BOOKING_MAX_SAVE_RETRIES", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.otp_ttl_secs == 0 {
            return Err(BookingError::Validation(
                "otp_ttl_secs must be positive".to_string(),
            ));
        }
        if self.otp_max_attempts == 0 {
            return Err(BookingError::Validation(
                "otp_max_attempts must be positive".to_string(),
            ));
        }
        if self.otp_ttl_secs > MAX_OTP_TTL_SECS {
            return Err(BookingError::Validation(format!(
                "otp_ttl_secs must not exceed {MAX_OTP_TTL_SECS}"
            )));
        }
        Ok(())
    }

    pub fn otp_policy(&self) -> Result<OtpPolicy> {
        let ttl = i64::try_from(self.otp_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| BookingError::Validation("otp_ttl_secs is out of range".to_string()))?;
        Ok(OtpPolicy {
            ttl,
            max_attempts: self.otp_max_attempts,
        })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BookingError::Validation(format!("{key} has an invalid value '{value}'")))
}
