use crate::domain::booking::BookingSummary;
use crate::domain::escrow::LedgerAccount;
use crate::domain::money::Balance;
use crate::error::Result;
use std::collections::BTreeMap;
use std::io::Write;

/// Writes the end-of-run report as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// `account,balance`, one row per credited ledger account.
    pub fn write_balances(&mut self, balances: &BTreeMap<LedgerAccount, Balance>) -> Result<()> {
        self.writer.write_record(["account", "balance"])?;
        for (account, balance) in balances {
            self.writer
                .write_record([account.to_string(), balance.to_string()])?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// `booking,state,escrow`, one row per labelled booking.
    pub fn write_bookings(&mut self, bookings: &[(String, BookingSummary)]) -> Result<()> {
        self.writer.write_record(["booking", "state", "escrow"])?;
        for (label, summary) in bookings {
            let escrow = summary
                .escrow
                .as_ref()
                .map_or_else(|| "NONE".to_string(), |escrow| escrow.status.to_string());
            self.writer
                .write_record([label.clone(), summary.booking.state.to_string(), escrow])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
