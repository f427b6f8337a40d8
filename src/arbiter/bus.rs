//! Blocking Bus Arbiter
//!
//! # Purpose
//!
//! Thread-facing wrapper around [`BusState`]: one mutex guards the state, and
//! every parked task waits on its own condition variable. A release decides
//! the next grantee under the lock, accounts the grant on its behalf, records
//! the outcome for that waiter, and then wakes exactly that waiter.
//!
//! # Correctness Invariants
//!
//! - **No lost wakeups**: outcomes are written under the lock, and a waiter
//!   checks for its outcome under the lock before every park
//! - **No broadcast**: one grant wakes one condvar; spurious wakeups re-check
//!   the outcome table and park again
//! - **Leak-free**: [`BusPermit`] is RAII; the slot returns on drop, including
//!   during unwinding
//! - **Withdrawal is exact**: a timed-out or cancelled waiter is removed
//!   from its queue under the lock, and a grant that raced with it wins
//!
//! # Performance Characteristics
//!
//! | Operation       | Cost                                 |
//! |-----------------|--------------------------------------|
//! | try_acquire()   | Lock + admission check               |
//! | acquire()       | Lock + optional enqueue + condvar    |
//! | release (Drop)  | Lock + selection + one notify_one    |
//!
//! # Usage
//!
//! ```
//! use bus_arbiter::{ArbiterConfig, BusArbiter, Task};
//!
//! let bus = BusArbiter::new(ArbiterConfig::default());
//! let permit = bus.acquire(Task::high_send());
//! // ... transfer ...
//! permit.release();
//! ```
//!
//! # Model Checking
//!
//! Built with `RUSTFLAGS="--cfg loom"` the lock, condvars, atomics and `Arc`
//! come from `loom::sync`, and the `loom_tests` module explores interleavings
//! of acquire/release/cancel. Timed waits are not modelled.

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, Ordering};
#[cfg(loom)]
use loom::sync::{Arc, Condvar, Mutex, MutexGuard};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(loom))]
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use super::config::ArbiterConfig;
use super::error::AcquireError;
use super::metrics::ArbiterStats;
use super::state::{BusState, Granted};
use super::task::{Direction, Task, WaitClass};

/// A task parked in one of the wait queues.
struct Waiter {
    id: u64,
    task: Task,
    cancel: Option<CancelToken>,
    enqueued_at: Instant,
    cv: Condvar,
}

/// Written by the waker, consumed by the waiter. Both under the lock.
enum Outcome {
    Granted { seq: u64 },
    Cancelled,
}

struct Inner {
    state: BusState<Arc<Waiter>>,
    outcomes: HashMap<u64, Outcome>,
    stats: ArbiterStats,
    next_waiter: u64,
    next_grant: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_grant;
        self.next_grant += 1;
        seq
    }

    fn observe(&mut self) {
        self.stats
            .observe(self.state.occupancy(), self.state.total_waiting());
    }

    /// Admit an arriving task. Caller checked admission under this lock.
    fn admit(&mut self, task: Task) -> u64 {
        let flipped = self.state.admit(task);
        self.stats.grants_immediate += 1;
        if flipped {
            self.stats.flips += 1;
            debug!(target: "bus_arbiter", %task, "direction flip on admission");
        }
        self.observe();
        let seq = self.next_seq();
        trace!(target: "bus_arbiter", %task, seq, occupancy = self.state.occupancy(), "admitted");
        seq
    }

    /// Hand a grant made by [`BusState`] to its waiter.
    fn deliver(&mut self, granted: Granted<Arc<Waiter>>) -> Arc<Waiter> {
        self.stats.grants_queued += 1;
        if granted.flipped {
            self.stats.flips += 1;
            debug!(
                target: "bus_arbiter",
                class = %granted.class,
                waiting = self.state.total_waiting(),
                "direction flip on release"
            );
        }
        let seq = self.next_seq();
        self.outcomes
            .insert(granted.waiter.id, Outcome::Granted { seq });
        self.observe();
        trace!(target: "bus_arbiter", class = %granted.class, seq, "waiter granted");
        granted.waiter
    }

    fn refill(&mut self) -> Vec<Arc<Waiter>> {
        let granted = self.state.refill();
        granted.into_iter().map(|g| self.deliver(g)).collect()
    }

    fn snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            occupancy: self.state.occupancy(),
            direction: self.state.direction(),
            streak: self.state.streak(),
            waiting: self.state.waiting_counts(),
        }
    }
}

/// Point-in-time view of the bus, for tests and reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BusSnapshot {
    pub occupancy: usize,
    /// `None` while the bus is empty.
    pub direction: Option<Direction>,
    pub streak: usize,
    /// Queue lengths indexed by [`WaitClass::index`].
    pub waiting: [usize; 4],
}

impl BusSnapshot {
    #[inline]
    pub fn waiting(&self, class: WaitClass) -> usize {
        self.waiting[class.index()]
    }

    #[inline]
    pub fn total_waiting(&self) -> usize {
        self.waiting.iter().sum()
    }
}

/// Handle that aborts pending acquisitions parked with it.
///
/// Trigger it with [`BusArbiter::cancel`]. Cloning shares the token.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    #[inline]
    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Capacity-bounded, direction-exclusive bus shared by many threads.
///
/// # Thread Safety
///
/// Share via the `Arc` returned by [`new`](Self::new). Permits hold a clone
/// of that `Arc`, so the arbiter outlives every grant.
pub struct BusArbiter {
    config: ArbiterConfig,
    inner: Mutex<Inner>,
}

impl fmt::Debug for BusArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusArbiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BusArbiter {
    /// Create an idle arbiter.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`ArbiterConfig::validate`].
    pub fn new(config: ArbiterConfig) -> Arc<Self> {
        let state = BusState::new(&config);
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state,
                outcomes: HashMap::new(),
                stats: ArbiterStats::default(),
                next_waiter: 0,
                next_grant: 0,
            }),
        })
    }

    /// Arbiter with default thresholds for a bus of `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Self::new(ArbiterConfig::with_capacity(capacity))
    }

    #[inline]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("bus arbiter mutex poisoned")
    }

    /// Lock with poison recovery, for release paths reached from `Drop`.
    #[inline]
    fn lock_or_recover(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Block until `task` holds a slot.
    pub fn acquire(self: &Arc<Self>, task: Task) -> BusPermit {
        match self.acquire_inner(task, None, None) {
            Ok(seq) => self.permit(task, seq),
            Err(err) => unreachable!("unbounded acquire of {task} ended with: {err}"),
        }
    }

    /// Take a slot only if `task` is admissible right now. Never queues.
    pub fn try_acquire(self: &Arc<Self>, task: Task) -> Option<BusPermit> {
        let mut inner = self.lock();
        if !inner.state.admission(task).is_grant() {
            return None;
        }
        let seq = inner.admit(task);
        drop(inner);
        Some(self.permit(task, seq))
    }

    /// Like [`acquire`](Self::acquire), but give up after `timeout`.
    ///
    /// A grant that lands while the deadline expires is kept, so `Ok` may be
    /// returned slightly after `timeout`.
    #[cfg(not(loom))]
    pub fn acquire_timeout(
        self: &Arc<Self>,
        task: Task,
        timeout: Duration,
    ) -> Result<BusPermit, AcquireError> {
        let deadline = Instant::now() + timeout;
        let seq = self.acquire_inner(task, Some(deadline), None)?;
        Ok(self.permit(task, seq))
    }

    /// Like [`acquire`](Self::acquire), but abort with
    /// [`AcquireError::Cancelled`] once `token` is cancelled.
    pub fn acquire_cancellable(
        self: &Arc<Self>,
        task: Task,
        token: &CancelToken,
    ) -> Result<BusPermit, AcquireError> {
        let seq = self.acquire_inner(task, None, Some(token))?;
        Ok(self.permit(task, seq))
    }

    /// Cancel `token`: every waiter parked with it is removed from its queue
    /// and woken with [`AcquireError::Cancelled`]. Later acquisitions with
    /// the token fail immediately. Returns the number of waiters removed.
    ///
    /// Holders that were already granted keep their slots.
    pub fn cancel(&self, token: &CancelToken) -> usize {
        let mut inner = self.lock();
        token.flag.store(true, Ordering::Release);

        let removed = inner.state.remove_waiters_where(|w| {
            w.cancel.as_ref().is_some_and(|c| c.same(token))
        });
        if removed.is_empty() {
            return 0;
        }
        for (_, w) in &removed {
            inner.outcomes.insert(w.id, Outcome::Cancelled);
        }
        inner.stats.cancellations += removed.len() as u64;
        let granted = inner.refill();
        debug!(
            target: "bus_arbiter",
            cancelled = removed.len(),
            refilled = granted.len(),
            "cancel token triggered"
        );
        drop(inner);

        for (_, w) in &removed {
            w.cv.notify_one();
        }
        for w in granted {
            w.cv.notify_one();
        }
        removed.len()
    }

    /// Current occupancy, direction and queue depths.
    pub fn snapshot(&self) -> BusSnapshot {
        self.lock().snapshot()
    }

    /// Counters since construction or the last [`reset`](Self::reset).
    pub fn stats(&self) -> ArbiterStats {
        self.lock().stats.clone()
    }

    /// Return to the initial state and clear statistics.
    ///
    /// Cancelled waiters that have not yet woken keep their outcomes and
    /// still return [`AcquireError::Cancelled`].
    ///
    /// # Panics
    ///
    /// Panics if any task holds or waits for the bus.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state.reset();
        inner.stats = ArbiterStats::default();
        inner.next_grant = 0;
    }

    fn permit(self: &Arc<Self>, task: Task, seq: u64) -> BusPermit {
        BusPermit {
            arbiter: Arc::clone(self),
            task,
            seq,
        }
    }

    fn acquire_inner(
        &self,
        task: Task,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64, AcquireError> {
        let mut inner = self.lock();

        if cancel.is_some_and(CancelToken::is_cancelled) {
            inner.stats.cancellations += 1;
            return Err(AcquireError::Cancelled);
        }

        let admission = inner.state.admission(task);
        if admission.is_grant() {
            return Ok(inner.admit(task));
        }

        inner.stats.record_denied(admission);
        let id = inner.next_waiter;
        inner.next_waiter += 1;
        let waiter = Arc::new(Waiter {
            id,
            task,
            cancel: cancel.cloned(),
            enqueued_at: Instant::now(),
            cv: Condvar::new(),
        });
        inner.state.enqueue(task, Arc::clone(&waiter));
        inner.observe();
        debug!(
            target: "bus_arbiter",
            %task,
            reason = ?admission,
            waiting = inner.state.total_waiting(),
            "task queued"
        );

        loop {
            if let Some(outcome) = inner.outcomes.remove(&id) {
                return match outcome {
                    Outcome::Granted { seq } => {
                        let waited = waiter.enqueued_at.elapsed();
                        inner.stats.wait_ns.record(duration_ns(waited));
                        Ok(seq)
                    }
                    Outcome::Cancelled => Err(AcquireError::Cancelled),
                };
            }

            let (guard, expired) = self.park(&waiter, inner, deadline);
            inner = guard;

            if expired && !inner.outcomes.contains_key(&id) {
                let removed = inner
                    .state
                    .remove_waiter(WaitClass::of(waiter.task), |w| w.id == id);
                debug_assert!(removed.is_some(), "timed-out waiter missing from its queue");
                inner.stats.timeouts += 1;
                let granted = inner.refill();
                debug!(target: "bus_arbiter", %task, refilled = granted.len(), "acquire timed out");
                drop(inner);
                for w in granted {
                    w.cv.notify_one();
                }
                return Err(AcquireError::TimedOut);
            }
        }
    }

    /// Sleep on `waiter`'s condvar. Returns the reacquired guard and whether
    /// the deadline has passed.
    #[cfg(not(loom))]
    fn park<'a>(
        &self,
        waiter: &Waiter,
        guard: MutexGuard<'a, Inner>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, Inner>, bool) {
        let Some(deadline) = deadline else {
            let guard = waiter.cv.wait(guard).expect("bus arbiter condvar poisoned");
            return (guard, false);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return (guard, true);
        }
        let (guard, _) = waiter
            .cv
            .wait_timeout(guard, remaining)
            .expect("bus arbiter condvar poisoned");
        (guard, Instant::now() >= deadline)
    }

    #[cfg(loom)]
    fn park<'a>(
        &self,
        waiter: &Waiter,
        guard: MutexGuard<'a, Inner>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, Inner>, bool) {
        debug_assert!(deadline.is_none(), "timed waits are not modelled under loom");
        let guard = waiter.cv.wait(guard).expect("bus arbiter condvar poisoned");
        (guard, false)
    }

    /// Return a slot held for `task`. Called by [`BusPermit`]'s drop.
    fn release(&self, task: Task) {
        let mut inner = self.lock_or_recover();

        if inner.state.holders(task.direction) == 0 {
            // Bookkeeping is already broken; do not double-panic while unwinding.
            debug_assert!(
                std::thread::panicking(),
                "release of {task} with no {} holders",
                task.direction
            );
            return;
        }

        let woken = inner.state.release(task.direction).map(|g| inner.deliver(g));
        trace!(
            target: "bus_arbiter",
            %task,
            occupancy = inner.state.occupancy(),
            woke = woken.is_some(),
            "released"
        );
        drop(inner);

        if let Some(w) = woken {
            w.cv.notify_one();
        }
    }
}

#[inline]
fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// RAII grant of one bus slot.
///
/// Dropping the permit releases the slot and may wake one waiter.
/// [`release`](Self::release) does the same, explicitly.
#[derive(Debug)]
#[must_use = "BusPermit releases on drop; not holding it gives the slot straight back"]
pub struct BusPermit {
    arbiter: Arc<BusArbiter>,
    task: Task,
    seq: u64,
}

impl BusPermit {
    /// The task this slot was granted for.
    #[inline]
    pub fn task(&self) -> Task {
        self.task
    }

    /// Position of this grant in the arbiter's grant order (0-based, reset
    /// by [`BusArbiter::reset`]).
    #[inline]
    pub fn grant_seq(&self) -> u64 {
        self.seq
    }

    /// Give the slot back.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BusPermit {
    fn drop(&mut self) {
        self.arbiter.release(self.task);
    }
}
