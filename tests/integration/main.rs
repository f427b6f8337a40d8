//! Integration tests for the bus arbiter and its simulated workload.
//!
//! Run with: `cargo test --test integration`

mod batch_run;
mod cancellation;
mod scenarios;
mod support;
