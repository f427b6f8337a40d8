//! Arbiter configuration.
//!
//! # Sizing Guidelines
//!
//! - `capacity`: simultaneous holders the bus tolerates. The accelerator this
//!   models has three slots, hence [`DEFAULT_CAPACITY`].
//! - `max_direction_streak`: how many consecutive grants one direction may
//!   receive while the other direction has queued waiters. Lower values flip
//!   sooner (fairer, fewer same-direction batches); higher values favor
//!   throughput. Defaults to `2 * capacity`.
//! - `max_priority_streak`: how many consecutive HIGH grants a direction may
//!   make from its queues while a NORMAL waiter of that direction is queued.
//!   Defaults to `2 * capacity`.
//!
//! Both thresholds may be disabled (`None`), which restores strict
//! direction-then-priority precedence with no starvation bound.

use serde::Serialize;

/// Capacity of the reference bus.
pub const DEFAULT_CAPACITY: usize = 3;

/// Configuration for [`BusArbiter`](super::BusArbiter).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArbiterConfig {
    /// Maximum simultaneous holders.
    pub capacity: usize,

    /// Consecutive same-direction grants after which a pending opposite
    /// direction forces the bus to drain. `None` disables the bound.
    pub max_direction_streak: Option<usize>,

    /// Consecutive HIGH grants within a direction after which a queued
    /// NORMAL waiter of that direction goes first. `None` disables aging.
    pub max_priority_streak: Option<usize>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ArbiterConfig {
    /// Configuration for a bus of `capacity` slots with derived thresholds.
    pub fn with_capacity(capacity: usize) -> Self {
        let streak = capacity.saturating_mul(2);
        Self {
            capacity,
            max_direction_streak: Some(streak),
            max_priority_streak: Some(streak),
        }
    }

    /// Strict precedence, no starvation bounds.
    pub fn unbounded(capacity: usize) -> Self {
        Self {
            capacity,
            max_direction_streak: None,
            max_priority_streak: None,
        }
    }

    pub fn direction_streak(mut self, max: Option<usize>) -> Self {
        self.max_direction_streak = max;
        self
    }

    pub fn priority_streak(mut self, max: Option<usize>) -> Self {
        self.max_priority_streak = max;
        self
    }

    /// Validate configuration.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or a configured threshold is 0.
    pub fn validate(&self) {
        assert!(self.capacity > 0, "bus capacity must be > 0");
        if let Some(max) = self.max_direction_streak {
            assert!(max > 0, "max_direction_streak must be > 0 if specified");
        }
        if let Some(max) = self.max_priority_streak {
            assert!(max > 0, "max_priority_streak must be > 0 if specified");
        }
    }
}
