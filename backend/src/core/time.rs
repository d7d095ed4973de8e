//! Time management for the simulation
//!
//! Simulation time is a non-negative-going `f64` measured in days from the
//! base date. Time only moves forward, and only when the engine pops the next
//! plan from the queue.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Calendar date used when no base date is configured
pub fn default_base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Tracks the start time, current time and calendar alignment of one run
///
/// # Example
/// ```
/// use nucleus_core_rs::SimulationClock;
/// use chrono::NaiveDate;
///
/// let base = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
/// let mut clock = SimulationClock::new(0.0, base);
/// assert_eq!(clock.current_time(), 0.0);
///
/// clock.advance_to(2.5);
/// assert_eq!(clock.current_date(), NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Time at which this run started (non-zero when resumed)
    start_time: f64,
    /// Time of the plan currently executing
    current_time: f64,
    /// Calendar date corresponding to time zero
    base_date: NaiveDate,
}

impl SimulationClock {
    /// Create a clock positioned at `start_time`
    pub fn new(start_time: f64, base_date: NaiveDate) -> Self {
        Self {
            start_time,
            current_time: start_time,
            base_date,
        }
    }

    /// Move the clock forward
    ///
    /// Times earlier than the current time are ignored; the plan queue never
    /// hands out such plans, so this only guards against float noise.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    /// Calendar date of the current time (whole elapsed days past the base date)
    pub fn current_date(&self) -> NaiveDate {
        let whole_days = self.current_time.max(0.0).floor() as u64;
        self.base_date
            .checked_add_days(Days::new(whole_days))
            .unwrap_or(NaiveDate::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_never_moves_backward() {
        let mut clock = SimulationClock::new(5.0, default_base_date());
        clock.advance_to(7.0);
        clock.advance_to(6.0);
        assert_eq!(clock.current_time(), 7.0);
        assert_eq!(clock.start_time(), 5.0);
    }

    #[test]
    fn test_current_date_counts_whole_days() {
        let mut clock = SimulationClock::new(0.0, default_base_date());
        clock.advance_to(0.99);
        assert_eq!(clock.current_date(), default_base_date());
        clock.advance_to(31.0);
        assert_eq!(
            clock.current_date(),
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap()
        );
    }
}
