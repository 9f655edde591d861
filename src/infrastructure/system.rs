use crate::domain::otp::OtpCode;
use crate::domain::ports::{Clock, CodeGenerator};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Draws codes uniformly from `000000..=999999` using the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureCodeGenerator;

impl CodeGenerator for SecureCodeGenerator {
    fn generate(&self) -> Result<OtpCode> {
        OtpCode::from_number(OsRng.gen_range(0..1_000_000))
    }
}
