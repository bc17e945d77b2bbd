//! Adaptive page sizing
//!
//! Tracks records-per-second over the last [`WINDOW`] pages of one entity
//! and nudges the page size by [`STEP`] when a page runs well above or below
//! the rolling average. Size stays within `[min, max]`.

use std::collections::VecDeque;
use std::time::Duration;

/// Pages in the rolling throughput window
pub const WINDOW: usize = 10;

/// Fractional change applied per adjustment
const STEP: f64 = 0.10;

const GROW_ABOVE: f64 = 1.2;
const SHRINK_BELOW: f64 = 0.8;

/// Page size controller for one entity's extraction
#[derive(Debug, Clone)]
pub struct PageSizer {
    current: u32,
    min: u32,
    max: u32,
    window: VecDeque<f64>,
}

impl PageSizer {
    pub fn new(initial: u32, min: u32, max: u32) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            current: initial.clamp(min, max),
            min,
            max,
            window: VecDeque::with_capacity(WINDOW),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Rolling average throughput, if any page has been observed
    pub fn average(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
        }
    }

    /// Feed one page's outcome; returns the size for the next page
    ///
    /// Empty pages and pages with no measurable duration are ignored.
    pub fn observe(&mut self, records: usize, elapsed: Duration) -> u32 {
        let secs = elapsed.as_secs_f64();
        if records == 0 || secs <= 0.0 {
            return self.current;
        }
        let throughput = records as f64 / secs;

        if let Some(average) = self.average() {
            if throughput > average * GROW_ABOVE {
                self.current = self.grown();
            } else if throughput < average * SHRINK_BELOW {
                self.current = self.shrunk();
            }
        }

        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(throughput);
        self.current
    }

    fn grown(&self) -> u32 {
        let step = ((f64::from(self.current) * STEP).round() as u32).max(1);
        self.current.saturating_add(step).min(self.max)
    }

    fn shrunk(&self) -> u32 {
        let step = ((f64::from(self.current) * STEP).round() as u32).max(1);
        self.current.saturating_sub(step).max(self.min)
    }
}
