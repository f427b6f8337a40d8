//! Bus Arbiter: admission and wake-up policy for a shared accelerator bus
//!
//! # Architecture
//!
//! ```text
//! BusArbiter (Mutex + per-waiter Condvar)
//!     └── BusState<W> (pure policy: holders, direction, 4 FIFO queues)
//!         └── select_next_waiter() (release precedence, starvation bounds)
//! ```
//!
//! - [`state`] decides: who may enter, who is woken, when the bus flips.
//! - [`bus`] executes: parks callers, delivers grants, withdraws waiters.
//!
//! # Guarantees
//!
//! - At most `capacity` holders, all in one direction.
//! - A flip only happens on an empty bus.
//! - FIFO within each `(priority, direction)` class.
//! - Opposite-direction and NORMAL waiters are served within configured
//!   bounds (see [`ArbiterConfig`]).

pub mod bus;
pub mod config;
pub mod error;
pub mod metrics;
pub mod state;
pub mod task;

pub use bus::{BusArbiter, BusPermit, BusSnapshot, CancelToken};
pub use config::{ArbiterConfig, DEFAULT_CAPACITY};
pub use error::AcquireError;
pub use metrics::{ArbiterStats, Log2Hist};
pub use state::{Admission, BusState, Granted};
pub use task::{Direction, PriorityClass, Task, WaitClass};
