//! Date range of the schedule to fetch.

use chrono::{Local, NaiveDate};

use crate::error::{SyncError, SyncResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive range of days sent to the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SyncRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SyncResult<Self> {
        if end < start {
            return Err(SyncError::InvalidDateRange(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(SyncRange { start, end })
    }

    /// Parse command line dates (YYYY-MM-DD). The start defaults to today.
    pub fn from_args(start: Option<&str>, end: &str) -> SyncResult<Self> {
        let start = match start {
            Some(s) => parse_date(s)?,
            None => Local::now().date_naive(),
        };
        Self::new(start, parse_date(end)?)
    }
}

fn parse_date(s: &str) -> SyncResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| {
        SyncError::InvalidDateRange(format!("Invalid date format '{s}'. Expected YYYY-MM-DD"))
    })
}
