//! Domain layer: the booking aggregate, its value objects and the ports the
//! application layer depends on. Nothing in here performs I/O.

pub mod booking;
pub mod escrow;
pub mod ids;
pub mod money;
pub mod otp;
pub mod ports;
pub mod slot;
