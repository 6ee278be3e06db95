use chrono::NaiveDate;

use crate::error::{Error, Result};

/// Parse a YYYY-MM-DD date string.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| Error::InvalidDate(s.to_string()))
}

/// Number of days in the inclusive range [since, until], minimum 1.
pub fn days_in_range(since: NaiveDate, until: NaiveDate) -> i64 {
    ((until - since).num_days() + 1).max(1)
}
