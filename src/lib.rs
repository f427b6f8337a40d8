//! Bounded, direction-exclusive bus arbitration for a shared accelerator.
//!
//! ## Scope
//! Many threads move data to (send) or from (receive) one accelerator over a
//! bus with a fixed number of slots. The bus carries one direction at a time.
//! [`BusArbiter`] decides who may use it and who is woken when a slot frees.
//!
//! ## Key invariants
//! - Never more than `capacity` holders; all holders share one direction.
//! - The direction only flips once the bus is empty.
//! - Waiters are FIFO within their `(priority, direction)` class; HIGH goes
//!   before NORMAL, same direction before opposite.
//! - Opposite-direction waiters and NORMAL waiters are served within the
//!   streak bounds of [`ArbiterConfig`].
//!
//! ## Notable entry points
//! - [`BusArbiter`] / [`BusPermit`]: blocking, timed and cancellable
//!   acquisition with RAII release.
//! - [`BusState`]: the pure admission and wake-up policy.
//! - [`workload`]: runner threads and batch launcher used by `bus-sim`.

pub mod arbiter;
#[cfg(test)]
pub mod test_utils;
#[cfg(not(loom))]
pub mod workload;

pub use arbiter::{
    AcquireError, Admission, ArbiterConfig, ArbiterStats, BusArbiter, BusPermit, BusSnapshot,
    BusState, CancelToken, Direction, Granted, Log2Hist, PriorityClass, Task, WaitClass,
    DEFAULT_CAPACITY,
};
