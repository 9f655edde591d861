use crate::domain::ids::Role;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Create,
    Verify,
    Reissue,
    Confirm,
    Start,
    Complete,
    Cancel,
}

/// One row of a booking command file.
///
/// `booking` is a caller-chosen label; the replay maps it to the id assigned
/// on `create`. Columns a command does not use may be left empty.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CommandRow {
    pub command: CommandKind,
    pub booking: String,
    pub actor: u64,
    pub role: Role,
    pub service: Option<u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub code: Option<String>,
    pub card: Option<String>,
}

/// Reads booking commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<CommandRow>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes commands.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRow>> {
        self.reader
            .into_deserialize()
            .map(|result| {
                result.map_err(|e| BookingError::Validation(format!("Malformed command: {e}")))
            })
    }
}
