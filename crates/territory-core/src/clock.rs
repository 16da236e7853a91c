//! Date source for the lifecycle rules.
//!
//! Every rule that compares against "today" reads it from an injected
//! [`Clock`] so that sweeps and validations are deterministic under test.
//! [`SystemClock`] reads the host's local calendar date; [`FixedClock`] is
//! a settable date shared between the test and the engine.

use std::sync::atomic::{AtomicI32, Ordering};

use chrono::{Datelike, Days, Local, NaiveDate};

/// Errors that can occur when moving a [`FixedClock`].
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The requested date is outside the supported range.
    #[error("clock cannot move {days} day(s) from {from}")]
    OutOfRange {
        /// Date before the move.
        from: NaiveDate,
        /// Requested offset.
        days: u64,
    },
}

/// A source of the current calendar date.
pub trait Clock: Send + Sync {
    /// The current date.
    fn today(&self) -> NaiveDate;
}

/// Reads the local date from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock frozen at a settable date.
///
/// Stored as days since the common era in an atomic, so a test can move
/// the date while the engine holds a shared reference.
#[derive(Debug)]
pub struct FixedClock {
    days_from_ce: AtomicI32,
}

impl FixedClock {
    /// Create a clock frozen at `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            days_from_ce: AtomicI32::new(date.num_days_from_ce()),
        }
    }

    /// Move the clock to `date`.
    pub fn set(&self, date: NaiveDate) {
        self.days_from_ce
            .store(date.num_days_from_ce(), Ordering::SeqCst);
    }

    /// Move the clock forward by `days`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::OutOfRange`] if the new date is unrepresentable.
    pub fn advance_days(&self, days: u64) -> Result<NaiveDate, ClockError> {
        let from = self.today();
        let next = from
            .checked_add_days(Days::new(days))
            .ok_or(ClockError::OutOfRange { from, days })?;
        self.set(next);
        Ok(next)
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        let days = self.days_from_ce.load(Ordering::SeqCst);
        // Only dates that came from a NaiveDate are ever stored.
        NaiveDate::from_num_days_from_ce_opt(days).unwrap_or(NaiveDate::MIN)
    }
}
