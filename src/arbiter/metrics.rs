//! # Arbiter Metrics
//!
//! Cheap counters describing how the bus was shared.
//!
//! ## Design
//!
//! - All updates happen under the arbiter lock that is already held for the
//!   admission decision, so counters are plain integers (no atomics).
//! - Wait times go into a log2 histogram: O(1) record, O(64) percentile.
//! - [`BusArbiter::stats`](super::BusArbiter::stats) returns a clone; reading
//!   never blocks grants for longer than the copy.
//!
//! ## Log2 Histogram Precision
//!
//! Bucket k covers `[2^k, 2^(k+1))`, so a percentile is only known to within
//! a factor of two. Enough to tell "waited microseconds" from "waited
//! seconds", which is the question starvation tuning asks.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use super::state::Admission;

/// Log2 histogram of nanosecond observations.
///
/// - Bucket 0: [0, 2)
/// - Bucket k: [2^k, 2^(k+1))
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log2Hist {
    pub buckets: [u64; 64],
    pub count: u64,
    /// Wrapping sum, for the mean.
    pub sum: u64,
    pub max: u64,
}

impl Default for Log2Hist {
    fn default() -> Self {
        Self::new()
    }
}

impl Log2Hist {
    pub const fn new() -> Self {
        Self {
            buckets: [0; 64],
            count: 0,
            sum: 0,
            max: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, v: u64) {
        let slot = &mut self.buckets[bucket_index(v)];
        *slot = slot.wrapping_add(1);
        self.count = self.count.wrapping_add(1);
        self.sum = self.sum.wrapping_add(v);
        self.max = self.max.max(v);
    }

    /// Lower bound of the bucket holding percentile `p` (a fraction in
    /// `[0.0, 1.0]`), or `None` if nothing was recorded.
    pub fn percentile_lower_bound(&self, p: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        debug_assert!((0.0..=1.0).contains(&p), "percentile must be in [0.0, 1.0]");

        let target = ((self.count as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0u64;
        for (i, &c) in self.buckets.iter().enumerate() {
            seen = seen.wrapping_add(c);
            if seen >= target {
                return Some(bucket_lower_bound(i));
            }
        }
        Some(1u64 << 63)
    }

    #[inline]
    pub fn p50(&self) -> Option<u64> {
        self.percentile_lower_bound(0.50)
    }

    #[inline]
    pub fn p99(&self) -> Option<u64> {
        self.percentile_lower_bound(0.99)
    }

    /// Mean value (0 if empty).
    #[inline]
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum.wrapping_div(self.count)
        }
    }

    pub fn merge(&mut self, other: &Log2Hist) {
        for (a, b) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *a = a.wrapping_add(*b);
        }
        self.count = self.count.wrapping_add(other.count);
        self.sum = self.sum.wrapping_add(other.sum);
        self.max = self.max.max(other.max);
    }
}

/// Serialized as a summary; the raw buckets are an in-process detail.
impl Serialize for Log2Hist {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Log2Hist", 5)?;
        s.serialize_field("count", &self.count)?;
        s.serialize_field("mean", &self.mean())?;
        s.serialize_field("p50", &self.p50())?;
        s.serialize_field("p99", &self.p99())?;
        s.serialize_field("max", &self.max)?;
        s.end()
    }
}

#[inline]
fn bucket_index(v: u64) -> usize {
    if v == 0 {
        return 0;
    }
    (63 - v.leading_zeros()) as usize
}

#[inline]
fn bucket_lower_bound(bucket: usize) -> u64 {
    if bucket == 0 {
        0
    } else {
        1u64 << bucket
    }
}

/// Counters for one arbiter since construction or the last reset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    /// Arrivals admitted without waiting.
    pub grants_immediate: u64,
    /// Waiters granted by a release or a refill.
    pub grants_queued: u64,
    /// Grants that switched the bus direction.
    pub flips: u64,
    /// Arrivals queued because every slot was taken.
    pub queued_full: u64,
    /// Arrivals queued because the bus ran the other way.
    pub queued_wrong_direction: u64,
    /// Arrivals queued only because a flip was owed to the other direction.
    pub queued_drain: u64,
    /// Timed acquisitions that gave up and left their queue.
    pub timeouts: u64,
    /// Waiters withdrawn by a cancel, plus acquisitions refused up front
    /// because their token was already cancelled.
    pub cancellations: u64,
    pub peak_occupancy: usize,
    pub peak_waiting: usize,
    /// Time from enqueue to grant for queued waiters.
    pub wait_ns: Log2Hist,
}

impl ArbiterStats {
    #[inline]
    pub fn total_grants(&self) -> u64 {
        self.grants_immediate + self.grants_queued
    }

    /// Count an arrival that could not be admitted.
    #[inline]
    pub(crate) fn record_denied(&mut self, admission: Admission) {
        match admission {
            Admission::Full => self.queued_full += 1,
            Admission::WrongDirection => self.queued_wrong_direction += 1,
            Admission::DrainPending => self.queued_drain += 1,
            Admission::Grant => debug_assert!(false, "grant recorded as denial"),
        }
    }

    #[inline]
    pub(crate) fn observe(&mut self, occupancy: usize, waiting: usize) {
        self.peak_occupancy = self.peak_occupancy.max(occupancy);
        self.peak_waiting = self.peak_waiting.max(waiting);
    }
}

impl fmt::Display for ArbiterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "grants={} immediate={} queued={} flips={} full={} wrong_dir={} drain={} \
             timeouts={} cancelled={} peak_occupancy={} peak_waiting={} wait_p50_ns={} wait_p99_ns={} wait_max_ns={}",
            self.total_grants(),
            self.grants_immediate,
            self.grants_queued,
            self.flips,
            self.queued_full,
            self.queued_wrong_direction,
            self.queued_drain,
            self.timeouts,
            self.cancellations,
            self.peak_occupancy,
            self.peak_waiting,
            self.wait_ns.p50().unwrap_or(0),
            self.wait_ns.p99().unwrap_or(0),
            self.wait_ns.max,
        )
    }
}
