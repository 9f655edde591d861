//! Outer adapters: the CSV replay front end used by the binary.

pub mod csv;
pub mod replay;
