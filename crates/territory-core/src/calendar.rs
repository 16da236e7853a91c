//! Calendar-month arithmetic for the lifecycle windows.
//!
//! Assignment windows, extensions, and cooldowns are counted in calendar
//! months, not fixed day counts. When the target month is shorter than the
//! source day, the result clamps to the last day of that month
//! (2024-01-31 + 1 month = 2024-02-29).

use chrono::{Months, NaiveDate};

/// Errors from calendar arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    /// The result falls outside the representable date range.
    #[error("adding {months} month(s) to {date} leaves the supported date range")]
    OutOfRange {
        /// The starting date.
        date: NaiveDate,
        /// Months that were being added.
        months: u32,
    },
}

/// Add `months` calendar months to `date`, clamping to month end.
///
/// # Errors
///
/// Returns [`CalendarError::OutOfRange`] if the result is not representable.
pub fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate, CalendarError> {
    date.checked_add_months(Months::new(months))
        .ok_or(CalendarError::OutOfRange { date, months })
}

/// Format a date the way the territory cards and reports show it.
pub fn format_dmy(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}
