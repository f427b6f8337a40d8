//! Bus State and Admission Policy
//!
//! # Purpose
//!
//! Pure, lock-free-of-concerns model of the bus: holder counts, current
//! direction, the four FIFO wait queues and the starvation counters. Every
//! admission and wake decision is made here; [`BusArbiter`] only wraps this
//! state in a mutex and turns "grant waiter W" into a wakeup.
//!
//! Keeping the policy free of synchronization primitives lets it be tested
//! (and property-tested) deterministically: the waiter handle type `W` is a
//! plain integer in tests and an `Arc<Waiter>` in the arbiter.
//!
//! # Correctness Invariants
//!
//! - **Bounded**: `occupancy <= capacity`
//! - **Exclusive**: no holder exists in the direction opposite to `direction`
//! - **Work-conserving**: an idle bus (`occupancy == 0`) has no queued waiters
//! - **FIFO**: within one [`WaitClass`] waiters are granted in arrival order
//!
//! Invariants are checked with `debug_assert!` after every complete mutation.
//!
//! # Release Precedence
//!
//! After a holder of direction `d` leaves, at most one waiter is granted:
//!
//! ```text
//! 1. HIGH   d            (no flip)
//! 2. NORMAL d            (no flip)
//! 3. HIGH   opposite(d)  only if occupancy == 0
//! 4. NORMAL opposite(d)  only if occupancy == 0
//! ```
//!
//! Steps 1-2 are skipped while a drain is pending (see below), and inside a
//! direction a NORMAL waiter overtakes HIGH once the class-aging threshold
//! is reached.
//!
//! # Starvation Bounds
//!
//! - **Direction**: `streak` counts consecutive grants in the current
//!   direction. Once `streak >= max_direction_streak` while the opposite
//!   direction has waiters, a drain is pending: arrivals in the current
//!   direction queue instead of being admitted and releases stop granting
//!   the current direction, so occupancy reaches 0 and the flip happens.
//! - **Class**: `high_run[d]` counts HIGH grants made while a NORMAL waiter
//!   of `d` was queued. At `max_priority_streak` the NORMAL head goes next.
//!
//! [`BusArbiter`]: super::BusArbiter

use std::collections::VecDeque;

use super::config::ArbiterConfig;
use super::task::{Direction, PriorityClass, Task, WaitClass};

/// Outcome of an admission check for an arriving task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Task may take a slot now.
    Grant,
    /// Same direction, but every slot is taken.
    Full,
    /// Bus is held in the other direction.
    WrongDirection,
    /// A free slot exists, but the opposite direction is owed a flip.
    DrainPending,
}

impl Admission {
    #[inline]
    pub fn is_grant(self) -> bool {
        matches!(self, Admission::Grant)
    }
}

/// A waiter taken off its queue and accounted as a holder.
#[derive(Debug)]
pub struct Granted<W> {
    pub waiter: W,
    pub class: WaitClass,
    /// The grant switched the bus direction.
    pub flipped: bool,
}

/// Shared bus state. Owned by exactly one arbiter.
#[derive(Debug)]
pub struct BusState<W> {
    capacity: usize,
    max_direction_streak: Option<usize>,
    max_priority_streak: Option<usize>,
    /// Holders per direction, indexed by [`Direction::index`].
    holders: [usize; 2],
    /// Direction of the current holders, or of the last grant when idle.
    direction: Direction,
    /// Consecutive grants in `direction` since the last flip.
    streak: usize,
    /// Consecutive HIGH queue grants while NORMAL of the same direction waited.
    high_run: [usize; 2],
    /// Wait queues, indexed by [`WaitClass::index`].
    queues: [VecDeque<W>; 4],
}

impl<W> BusState<W> {
    /// Create an idle bus.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(config: &ArbiterConfig) -> Self {
        config.validate();
        Self {
            capacity: config.capacity,
            max_direction_streak: config.max_direction_streak,
            max_priority_streak: config.max_priority_streak,
            holders: [0; 2],
            direction: Direction::Send,
            streak: 0,
            high_run: [0; 2],
            queues: std::array::from_fn(|_| VecDeque::new()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks currently holding the bus.
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.holders[0] + self.holders[1]
    }

    /// Holders in `direction`.
    #[inline]
    pub fn holders(&self, direction: Direction) -> usize {
        self.holders[direction.index()]
    }

    /// Direction of the current holders; `None` while the bus is empty.
    #[inline]
    pub fn direction(&self) -> Option<Direction> {
        (self.occupancy() > 0).then_some(self.direction)
    }

    /// Consecutive grants in the current direction since the last flip.
    #[inline]
    pub fn streak(&self) -> usize {
        self.streak
    }

    #[inline]
    pub fn waiting(&self, class: WaitClass) -> usize {
        self.queues[class.index()].len()
    }

    /// Queue lengths, indexed by [`WaitClass::index`].
    pub fn waiting_counts(&self) -> [usize; 4] {
        std::array::from_fn(|i| self.queues[i].len())
    }

    #[inline]
    pub fn total_waiting(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// No holders and no waiters.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.occupancy() == 0 && self.total_waiting() == 0
    }

    #[inline]
    fn has_waiters_in(&self, direction: Direction) -> bool {
        self.waiting(WaitClass::new(PriorityClass::High, direction)) > 0
            || self.waiting(WaitClass::new(PriorityClass::Normal, direction)) > 0
    }

    /// Whether `direction` must stop taking grants so the bus can flip.
    pub fn drain_pending(&self, direction: Direction) -> bool {
        direction == self.direction
            && self
                .max_direction_streak
                .is_some_and(|max| self.streak >= max)
            && self.has_waiters_in(direction.opposite())
    }

    /// Decide whether an arriving task may take a slot immediately.
    ///
    /// Priority is never consulted: it only orders waiters.
    pub fn admission(&self, task: Task) -> Admission {
        let occupancy = self.occupancy();
        if occupancy == 0 {
            return Admission::Grant;
        }
        if task.direction != self.direction {
            return Admission::WrongDirection;
        }
        if occupancy >= self.capacity {
            return Admission::Full;
        }
        if self.drain_pending(task.direction) {
            return Admission::DrainPending;
        }
        Admission::Grant
    }

    /// Take a slot for an arriving task. Returns whether the bus flipped.
    ///
    /// Callers must have observed [`Admission::Grant`] under the same lock.
    pub fn admit(&mut self, task: Task) -> bool {
        debug_assert!(
            self.admission(task).is_grant(),
            "admit() for {task} without a grant: {:?}",
            self.admission(task)
        );
        let flipped = self.account_grant(task.direction);
        self.assert_invariants();
        flipped
    }

    /// Park `waiter` at the tail of the queue for `task`.
    pub fn enqueue(&mut self, task: Task, waiter: W) {
        debug_assert!(
            !self.admission(task).is_grant(),
            "enqueue() for {task} while it is admissible"
        );
        self.queues[WaitClass::of(task).index()].push_back(waiter);
        self.assert_invariants();
    }

    /// A holder of `direction` leaves; grant at most one waiter in its place.
    pub fn release(&mut self, direction: Direction) -> Option<Granted<W>> {
        let slot = &mut self.holders[direction.index()];
        debug_assert!(*slot > 0, "release of {direction} with no {direction} holders");
        *slot = slot.saturating_sub(1);

        let granted = self.grant_next(direction);
        self.assert_invariants();
        granted
    }

    /// Which queue the next grant comes from after a `departing` holder left.
    ///
    /// Pure: inspects the state, mutates nothing.
    pub fn select_next_waiter(&self, departing: Direction) -> Option<WaitClass> {
        let occupancy = self.occupancy();
        if occupancy >= self.capacity {
            return None;
        }
        debug_assert!(
            occupancy == 0 || departing == self.direction,
            "{departing} holder departed while the bus runs {}",
            self.direction
        );

        if !self.drain_pending(departing) {
            if let Some(class) = self.pick_in(departing) {
                return Some(class);
            }
        }
        if occupancy == 0 {
            return self.pick_in(departing.opposite());
        }
        None
    }

    /// Head-of-line choice between the two queues of one direction.
    fn pick_in(&self, direction: Direction) -> Option<WaitClass> {
        let high = WaitClass::new(PriorityClass::High, direction);
        let normal = WaitClass::new(PriorityClass::Normal, direction);
        match (self.waiting(high) > 0, self.waiting(normal) > 0) {
            (true, true) => {
                let aged = self
                    .max_priority_streak
                    .is_some_and(|max| self.high_run[direction.index()] >= max);
                Some(if aged { normal } else { high })
            }
            (true, false) => Some(high),
            (false, true) => Some(normal),
            (false, false) => None,
        }
    }

    /// Pop the selected waiter and account it as a holder.
    fn grant_next(&mut self, departing: Direction) -> Option<Granted<W>> {
        let class = self.select_next_waiter(departing)?;
        let waiter = self.queues[class.index()].pop_front()?;
        let direction = class.direction();

        let run = &mut self.high_run[direction.index()];
        match class.priority() {
            PriorityClass::High
                if !self.queues[WaitClass::new(PriorityClass::Normal, direction).index()]
                    .is_empty() =>
            {
                *run = run.saturating_add(1);
            }
            _ => *run = 0,
        }

        let flipped = self.account_grant(direction);
        Some(Granted {
            waiter,
            class,
            flipped,
        })
    }

    /// Grant as many queued waiters as the free slots and precedence allow.
    ///
    /// Used after waiters withdraw: removing the last opposite-direction
    /// waiter ends a pending drain, and same-direction waiters parked behind
    /// it would otherwise sit next to free slots until the next release.
    pub fn refill(&mut self) -> Vec<Granted<W>> {
        let mut granted = Vec::new();
        while self.occupancy() < self.capacity {
            match self.grant_next(self.direction) {
                Some(g) => granted.push(g),
                None => break,
            }
        }
        self.assert_invariants();
        granted
    }

    /// Remove the first waiter of `class` matching `pred`.
    pub fn remove_waiter(&mut self, class: WaitClass, pred: impl Fn(&W) -> bool) -> Option<W> {
        let queue = &mut self.queues[class.index()];
        let pos = queue.iter().position(pred)?;
        queue.remove(pos)
    }

    /// Remove every waiter matching `pred`, across all queues, in class order.
    pub fn remove_waiters_where(&mut self, mut pred: impl FnMut(&W) -> bool) -> Vec<(WaitClass, W)> {
        let mut removed = Vec::new();
        for class in WaitClass::ALL {
            let queue = &mut self.queues[class.index()];
            let mut i = 0;
            while i < queue.len() {
                if pred(&queue[i]) {
                    if let Some(w) = queue.remove(i) {
                        removed.push((class, w));
                    }
                } else {
                    i += 1;
                }
            }
        }
        removed
    }

    /// Return to the freshly constructed state.
    ///
    /// # Panics
    ///
    /// Panics if tasks still hold or wait for the bus.
    pub fn reset(&mut self) {
        assert!(
            self.is_idle(),
            "reset of a busy bus: occupancy={} waiting={}",
            self.occupancy(),
            self.total_waiting()
        );
        self.direction = Direction::Send;
        self.streak = 0;
        self.high_run = [0; 2];
    }

    fn account_grant(&mut self, direction: Direction) -> bool {
        let occupancy = self.occupancy();
        debug_assert!(occupancy < self.capacity, "grant on a full bus");
        debug_assert!(
            occupancy == 0 || direction == self.direction,
            "direction flip to {direction} with {occupancy} holders on the bus"
        );

        let flipped = direction != self.direction;
        if flipped {
            self.direction = direction;
            self.streak = 0;
        }
        self.holders[direction.index()] += 1;
        self.streak = self.streak.saturating_add(1);
        flipped
    }

    #[inline]
    fn assert_invariants(&self) {
        debug_assert!(
            self.occupancy() <= self.capacity,
            "occupancy {} exceeds capacity {}",
            self.occupancy(),
            self.capacity
        );
        debug_assert_eq!(
            self.holders[self.direction.opposite().index()],
            0,
            "{} holders share the bus with {} holders",
            self.direction.opposite(),
            self.direction
        );
        debug_assert!(
            self.occupancy() > 0 || self.total_waiting() == 0,
            "idle bus with {} queued waiters",
            self.total_waiting()
        );
    }
}
