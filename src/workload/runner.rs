//! Task Runner
//!
//! One runner performs one unit of bus work:
//!
//! ```text
//! acquire(task) -> transfer (simulated delay) -> release
//! ```
//!
//! The transfer itself is a sleep; what matters is that the slot is held
//! for a while so other runners contend. A [`HolderProbe`] watches the
//! runners from outside the arbiter and flags any moment where the bus
//! contract (capacity, one direction) is observed broken.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::error;

use super::rng::XorShift64;
use crate::arbiter::{BusArbiter, Direction, Task};

/// How long a runner holds the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferDelay {
    /// Yield once, then release.
    None,
    /// Hold for exactly this long.
    Fixed { hold: Duration },
    /// Hold for a uniform random time in `[0, max]`.
    Uniform { max: Duration },
}

impl Default for TransferDelay {
    fn default() -> Self {
        TransferDelay::Fixed {
            hold: Duration::from_millis(1),
        }
    }
}

impl TransferDelay {
    pub fn sample(&self, rng: &mut XorShift64) -> Duration {
        match *self {
            TransferDelay::None => Duration::ZERO,
            TransferDelay::Fixed { hold } => hold,
            TransferDelay::Uniform { max } => {
                let max_ns = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
                Duration::from_nanos(rng.below(max_ns.saturating_add(1).max(1)))
            }
        }
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    holding: [usize; 2],
    peak: [usize; 2],
    violations: u64,
}

/// External observer of bus holders.
///
/// Runners call [`enter`](Self::enter) right after their grant and
/// [`exit`](Self::exit) right before releasing, so the probe's view is a
/// subset of the arbiter's holders at every instant.
#[derive(Debug)]
pub struct HolderProbe {
    capacity: usize,
    state: Mutex<ProbeState>,
}

/// What a [`HolderProbe`] saw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub peak_send: usize,
    pub peak_receive: usize,
    /// Moments where capacity or direction exclusivity was observed broken.
    pub violations: u64,
}

impl HolderProbe {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ProbeState::default()),
        }
    }

    pub fn enter(&self, task: Task) {
        let mut st = self.state.lock().expect("holder probe mutex poisoned");
        let mine = task.direction.index();
        let other = task.direction.opposite().index();
        st.holding[mine] += 1;
        st.peak[mine] = st.peak[mine].max(st.holding[mine]);
        if st.holding[mine] > self.capacity || st.holding[other] > 0 {
            st.violations += 1;
            error!(
                target: "bus_arbiter::workload",
                %task,
                send = st.holding[Direction::Send.index()],
                receive = st.holding[Direction::Receive.index()],
                capacity = self.capacity,
                "bus contract violated"
            );
        }
    }

    pub fn exit(&self, task: Task) {
        let mut st = self.state.lock().expect("holder probe mutex poisoned");
        let slot = &mut st.holding[task.direction.index()];
        debug_assert!(*slot > 0, "probe exit without enter for {task}");
        *slot = slot.saturating_sub(1);
    }

    pub fn report(&self) -> ProbeReport {
        let st = self.state.lock().expect("holder probe mutex poisoned");
        ProbeReport {
            peak_send: st.peak[Direction::Send.index()],
            peak_receive: st.peak[Direction::Receive.index()],
            violations: st.violations,
        }
    }
}

/// One completed runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub grant_seq: u64,
    /// Time spent in `acquire`.
    pub waited: Duration,
    /// Time the slot was held.
    pub held: Duration,
}

/// Acquire the bus for `task`, hold it for a sampled delay, release.
pub fn run_task(
    arbiter: &Arc<BusArbiter>,
    task: Task,
    delay: &TransferDelay,
    rng: &mut XorShift64,
    probe: &HolderProbe,
) -> TaskRecord {
    let hold = delay.sample(rng);

    let start = Instant::now();
    let permit = arbiter.acquire(task);
    let waited = start.elapsed();

    probe.enter(task);
    let held_from = Instant::now();
    if hold.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(hold);
    }
    let held = held_from.elapsed();
    probe.exit(task);

    let grant_seq = permit.grant_seq();
    permit.release();

    TaskRecord {
        task,
        grant_seq,
        waited,
        held,
    }
}
