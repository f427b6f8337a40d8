//! Simulated bus traffic.
//!
//! Runners acquire the bus, hold it for a transfer delay and release it.
//! Batches spawn many runners across the four `(priority, direction)`
//! classes and report whether every one completed and whether the bus
//! contract held throughout.

pub mod batch;
pub mod rng;
pub mod runner;

pub use batch::{
    launch_batch, run_suite, BatchHandle, BatchOptions, BatchReport, BatchSpec, ParseBatchError,
    SuiteReport, REFERENCE_BATCHES,
};
pub use rng::XorShift64;
pub use runner::{run_task, HolderProbe, ProbeReport, TaskRecord, TransferDelay};
