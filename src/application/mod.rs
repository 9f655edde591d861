//! Application layer containing the booking lifecycle orchestration.
//!
//! `BookingService` is the facade callers use. It sequences the slot guard,
//! the aggregate's transition table and the payment and code collaborators
//! into one transaction per call.

pub mod booking_service;
pub mod slot_guard;
