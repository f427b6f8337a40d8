//! Batch Launcher
//!
//! Spawns one named runner thread per requested task and collects what each
//! runner did. A batch is described by four counts, one per
//! `(priority, direction)` class:
//!
//! ```text
//! BatchSpec { send, receive, priority_send, priority_receive }
//!     │
//!     ├── launch_batch() ──► N runner threads (shuffled spawn order)
//!     │                         └── run_task() ──► TaskRecord ──► channel
//!     └── BatchHandle::join() ──► BatchReport
//! ```
//!
//! Exactly `n` runners are spawned for a count of `n`. Spawn order is
//! shuffled with the batch seed so arrivals interleave across classes while
//! staying reproducible.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rng::XorShift64;
use super::runner::{run_task, HolderProbe, ProbeReport, TaskRecord, TransferDelay};
use crate::arbiter::{ArbiterStats, BusArbiter, Task, WaitClass};

/// Number of runners per class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    pub send: usize,
    pub receive: usize,
    pub priority_send: usize,
    pub priority_receive: usize,
}

impl BatchSpec {
    pub const fn new(send: usize, receive: usize, priority_send: usize, priority_receive: usize) -> Self {
        Self {
            send,
            receive,
            priority_send,
            priority_receive,
        }
    }

    pub fn total(&self) -> usize {
        self.send + self.receive + self.priority_send + self.priority_receive
    }

    pub fn count(&self, class: WaitClass) -> usize {
        match class {
            WaitClass::HighSend => self.priority_send,
            WaitClass::HighReceive => self.priority_receive,
            WaitClass::NormalSend => self.send,
            WaitClass::NormalReceive => self.receive,
        }
    }

    fn count_mut(&mut self, class: WaitClass) -> &mut usize {
        match class {
            WaitClass::HighSend => &mut self.priority_send,
            WaitClass::HighReceive => &mut self.priority_receive,
            WaitClass::NormalSend => &mut self.send,
            WaitClass::NormalReceive => &mut self.receive,
        }
    }

    /// Every task of the batch, grouped by class.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(self.total());
        for class in WaitClass::ALL {
            tasks.extend(std::iter::repeat(class.task()).take(self.count(class)));
        }
        tasks
    }
}

impl fmt::Display for BatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.send, self.receive, self.priority_send, self.priority_receive
        )
    }
}

/// Why a `S,R,PS,PR` batch string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseBatchError {
    /// Not exactly four comma-separated fields.
    FieldCount(usize),
    /// A field is not a non-negative integer.
    BadCount { field: &'static str, value: String },
}

impl fmt::Display for ParseBatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseBatchError::FieldCount(n) => {
                write!(f, "expected 4 comma-separated counts (S,R,PS,PR), got {n}")
            }
            ParseBatchError::BadCount { field, value } => {
                write!(f, "invalid {field} count: {value:?}")
            }
        }
    }
}

impl std::error::Error for ParseBatchError {}

impl FromStr for BatchSpec {
    type Err = ParseBatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const FIELDS: [&str; 4] = ["send", "receive", "priority_send", "priority_receive"];

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != FIELDS.len() {
            return Err(ParseBatchError::FieldCount(parts.len()));
        }
        let mut counts = [0usize; 4];
        for ((slot, part), field) in counts.iter_mut().zip(&parts).zip(FIELDS) {
            *slot = part.parse().map_err(|_| ParseBatchError::BadCount {
                field,
                value: (*part).to_string(),
            })?;
        }
        Ok(BatchSpec::new(counts[0], counts[1], counts[2], counts[3]))
    }
}

/// The reference workload: empty, single-task, one-class, balanced and
/// skewed mixes, in the order they are run.
pub const REFERENCE_BATCHES: [BatchSpec; 15] = [
    BatchSpec::new(0, 0, 0, 0),
    BatchSpec::new(1, 0, 0, 0),
    BatchSpec::new(0, 0, 0, 1),
    BatchSpec::new(0, 4, 0, 0),
    BatchSpec::new(0, 0, 4, 0),
    BatchSpec::new(3, 3, 3, 3),
    BatchSpec::new(4, 3, 4, 3),
    BatchSpec::new(7, 23, 17, 1),
    BatchSpec::new(40, 30, 0, 0),
    BatchSpec::new(30, 40, 0, 0),
    BatchSpec::new(23, 23, 1, 11),
    BatchSpec::new(22, 22, 10, 10),
    BatchSpec::new(0, 0, 11, 12),
    BatchSpec::new(0, 10, 0, 10),
    BatchSpec::new(0, 10, 10, 0),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub delay: TransferDelay,
    /// Seeds spawn order and random delays.
    pub seed: u64,
}

/// Runners of one batch, still in flight.
#[derive(Debug)]
pub struct BatchHandle {
    spec: BatchSpec,
    threads: Vec<JoinHandle<()>>,
    records: Receiver<TaskRecord>,
    started: Instant,
}

/// Outcome of one joined batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub spec: BatchSpec,
    /// Runners that finished, per class.
    pub completed: BatchSpec,
    /// Runner threads that panicked.
    pub panicked: usize,
    pub elapsed: Duration,
    /// Longest single `acquire` in the batch.
    pub max_wait: Duration,
    /// Range of grant sequence numbers handed to this batch.
    pub grant_seq: Option<(u64, u64)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.panicked == 0 && self.completed == self.spec
    }
}

/// Spawn the runners of `spec` against `arbiter`. Returns once all threads
/// are started; use [`BatchHandle::join`] to wait for them.
///
/// # Errors
///
/// Returns the OS error if a thread cannot be spawned. Runners started
/// before the failure keep running to completion, detached.
pub fn launch_batch(
    arbiter: &Arc<BusArbiter>,
    probe: &Arc<HolderProbe>,
    spec: BatchSpec,
    opts: &BatchOptions,
) -> io::Result<BatchHandle> {
    let mut rng = XorShift64::new(opts.seed);
    let mut tasks = spec.tasks();
    rng.shuffle(&mut tasks);

    let (tx, rx) = unbounded();
    let mut threads = Vec::with_capacity(tasks.len());
    let started = Instant::now();

    for (i, task) in tasks.into_iter().enumerate() {
        let arbiter = Arc::clone(arbiter);
        let probe = Arc::clone(probe);
        let tx = tx.clone();
        let delay = opts.delay;
        let mut task_rng = rng.fork();

        let th = thread::Builder::new()
            .name(format!("bus-{}-{i}", WaitClass::of(task)))
            .spawn(move || {
                let record = run_task(&arbiter, task, &delay, &mut task_rng, &probe);
                // The handle may already be gone if its owner bailed out.
                let _ = tx.send(record);
            })?;
        threads.push(th);
    }

    debug!(target: "bus_arbiter::workload", %spec, runners = threads.len(), "batch launched");
    Ok(BatchHandle {
        spec,
        threads,
        records: rx,
        started,
    })
}

impl BatchHandle {
    pub fn spec(&self) -> BatchSpec {
        self.spec
    }

    /// Wait for every runner and summarize.
    pub fn join(self) -> BatchReport {
        let mut panicked = 0;
        for th in self.threads {
            if th.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(target: "bus_arbiter::workload", spec = %self.spec, panicked, "runner threads panicked");
        }

        // All senders are gone once the runners are joined.
        let mut completed = BatchSpec::default();
        let mut max_wait = Duration::ZERO;
        let mut grant_seq: Option<(u64, u64)> = None;
        for rec in self.records.try_iter() {
            *completed.count_mut(WaitClass::of(rec.task)) += 1;
            max_wait = max_wait.max(rec.waited);
            grant_seq = Some(match grant_seq {
                None => (rec.grant_seq, rec.grant_seq),
                Some((lo, hi)) => (lo.min(rec.grant_seq), hi.max(rec.grant_seq)),
            });
        }

        let report = BatchReport {
            spec: self.spec,
            completed,
            panicked,
            elapsed: self.started.elapsed(),
            max_wait,
            grant_seq,
        };
        info!(
            target: "bus_arbiter::workload",
            spec = %report.spec,
            complete = report.is_complete(),
            elapsed_us = micros(report.elapsed),
            max_wait_us = micros(report.max_wait),
            "batch joined"
        );
        report
    }
}

#[inline]
fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Outcome of a sequence of batches on one arbiter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub batches: Vec<BatchReport>,
    /// Observed by one probe shared by every batch.
    pub probe: ProbeReport,
    pub stats: ArbiterStats,
    pub elapsed: Duration,
}

impl SuiteReport {
    /// Every runner finished and no violation was observed.
    pub fn is_clean(&self) -> bool {
        self.probe.violations == 0 && self.batches.iter().all(BatchReport::is_complete)
    }
}

/// Run `specs` against `arbiter`.
///
/// Batches run one after another, or with `overlap` all launched before any
/// is joined. Each batch gets its own seed derived from `opts.seed`.
pub fn run_suite(
    arbiter: &Arc<BusArbiter>,
    specs: &[BatchSpec],
    opts: &BatchOptions,
    overlap: bool,
) -> io::Result<SuiteReport> {
    let probe = Arc::new(HolderProbe::new(arbiter.config().capacity));
    let mut seeds = XorShift64::new(opts.seed);
    let started = Instant::now();

    let mut batches = Vec::with_capacity(specs.len());
    if overlap {
        let mut handles = Vec::with_capacity(specs.len());
        for &spec in specs {
            let batch_opts = BatchOptions {
                seed: seeds.next_u64(),
                ..*opts
            };
            handles.push(launch_batch(arbiter, &probe, spec, &batch_opts)?);
        }
        batches.extend(handles.into_iter().map(BatchHandle::join));
    } else {
        for &spec in specs {
            let batch_opts = BatchOptions {
                seed: seeds.next_u64(),
                ..*opts
            };
            batches.push(launch_batch(arbiter, &probe, spec, &batch_opts)?.join());
        }
    }

    Ok(SuiteReport {
        batches,
        probe: probe.report(),
        stats: arbiter.stats(),
        elapsed: started.elapsed(),
    })
}
