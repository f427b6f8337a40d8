//! Bus Simulator CLI
//!
//! Drives batches of sender and receiver threads through one bus arbiter and
//! checks, from outside the arbiter, that the bus never exceeded its
//! capacity or carried both directions at once.
//!
//! # Output Format
//!
//! One line per batch on stdout:
//! `batch=S,R,PS,PR complete=<bool> runners=N elapsed_ms=N max_wait_ms=N`
//!
//! Arbiter statistics and the probe summary are written to stderr on
//! completion. With `--json`, every batch and the final summary are emitted
//! as JSON lines on stdout instead.
//!
//! # Exit Codes
//!
//! - `0`: Every runner completed and no violation was observed
//! - `1`: A runner panicked or the bus contract was observed broken
//! - `2`: Invalid arguments

use bus_arbiter::workload::{run_suite, BatchOptions, BatchSpec, TransferDelay, REFERENCE_BATCHES};
use bus_arbiter::{ArbiterConfig, BusArbiter, DEFAULT_CAPACITY};
use std::env;
use std::io::{self, Write};
use std::process;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS]

OPTIONS:
    --capacity=<N>                 Bus capacity (default: {DEFAULT_CAPACITY})
    --max-streak=<N|off>           Same-direction grants before a waiting flip wins (default: 2*capacity)
    --max-priority-streak=<N|off>  HIGH grants before a waiting NORMAL wins (default: 2*capacity)
    --batch=<S,R,PS,PR>            Run one batch; repeatable (default: reference suite)
    --delay-ms=<N>                 Transfer delay in milliseconds (default: 1)
    --random-delay                 Uniform random delay in [0, delay-ms]
    --seed=<N>                     Seed for spawn order and random delays (default: 0)
    --overlap                      Launch every batch before joining any
    --json                         Emit reports as JSON lines
    --verbose, -v                  Debug logging (RUST_LOG overrides)
    --help, -h                     Show this help message",
        exe.to_string_lossy()
    );
}

fn bad_arg(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    process::exit(2);
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| bad_arg(format_args!("invalid {flag} value: {value}")))
}

/// `N` (> 0) or `off`.
fn parse_threshold(flag: &str, value: &str) -> Option<usize> {
    if value == "off" {
        return None;
    }
    let n: usize = parse_num(flag, value);
    if n == 0 {
        bad_arg(format_args!("{flag} must be >= 1 or 'off'"));
    }
    Some(n)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> io::Result<()> {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "bus-sim".into());

    let mut capacity = DEFAULT_CAPACITY;
    let mut max_streak: Option<Option<usize>> = None;
    let mut max_priority_streak: Option<Option<usize>> = None;
    let mut batches: Vec<BatchSpec> = Vec::new();
    let mut delay_ms: u64 = 1;
    let mut random_delay = false;
    let mut seed: u64 = 0;
    let mut overlap = false;
    let mut json = false;
    let mut verbose = false;

    for arg in args {
        let Some(flag) = arg.to_str() else {
            bad_arg(format_args!("non-UTF-8 argument: {}", arg.to_string_lossy()));
        };
        if let Some(value) = flag.strip_prefix("--capacity=") {
            capacity = parse_num("--capacity", value);
            if capacity == 0 {
                bad_arg("--capacity must be >= 1");
            }
            continue;
        }
        if let Some(value) = flag.strip_prefix("--max-streak=") {
            max_streak = Some(parse_threshold("--max-streak", value));
            continue;
        }
        if let Some(value) = flag.strip_prefix("--max-priority-streak=") {
            max_priority_streak = Some(parse_threshold("--max-priority-streak", value));
            continue;
        }
        if let Some(value) = flag.strip_prefix("--batch=") {
            let spec = value
                .parse()
                .unwrap_or_else(|err| bad_arg(format_args!("invalid --batch value: {err}")));
            batches.push(spec);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--delay-ms=") {
            delay_ms = parse_num("--delay-ms", value);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--seed=") {
            seed = parse_num("--seed", value);
            continue;
        }
        match flag {
            "--random-delay" => random_delay = true,
            "--overlap" => overlap = true,
            "--json" => json = true,
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                print_usage(&exe);
                process::exit(0);
            }
            _ => {
                eprintln!("unknown argument: {flag}");
                print_usage(&exe);
                process::exit(2);
            }
        }
    }

    init_tracing(verbose);

    let mut config = ArbiterConfig::with_capacity(capacity);
    if let Some(threshold) = max_streak {
        config = config.direction_streak(threshold);
    }
    if let Some(threshold) = max_priority_streak {
        config = config.priority_streak(threshold);
    }

    let hold = Duration::from_millis(delay_ms);
    let delay = match (random_delay, delay_ms) {
        (true, _) => TransferDelay::Uniform { max: hold },
        (false, 0) => TransferDelay::None,
        (false, _) => TransferDelay::Fixed { hold },
    };
    if batches.is_empty() {
        batches.extend_from_slice(&REFERENCE_BATCHES);
    }

    info!(target: "bus_arbiter", ?config, batches = batches.len(), overlap, "starting simulation");
    let arbiter = BusArbiter::new(config);
    let opts = BatchOptions { delay, seed };
    let report = run_suite(&arbiter, &batches, &opts, overlap)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        for batch in &report.batches {
            serde_json::to_writer(&mut out, batch).map_err(io::Error::other)?;
            writeln!(out)?;
        }
        let summary = serde_json::json!({
            "clean": report.is_clean(),
            "elapsed": report.elapsed,
            "probe": report.probe,
            "stats": report.stats,
        });
        writeln!(out, "{summary}")?;
    } else {
        for batch in &report.batches {
            writeln!(
                out,
                "batch={} complete={} runners={} elapsed_ms={} max_wait_ms={}",
                batch.spec,
                batch.is_complete(),
                batch.completed.total(),
                batch.elapsed.as_millis(),
                batch.max_wait.as_millis()
            )?;
        }
        eprintln!("{}", report.stats);
        eprintln!(
            "peak_send={} peak_receive={} violations={} elapsed_ms={}",
            report.probe.peak_send,
            report.probe.peak_receive,
            report.probe.violations,
            report.elapsed.as_millis()
        );
    }
    out.flush()?;
    drop(out);

    if !report.is_clean() {
        eprintln!("bus contract violated or runners failed");
        process::exit(1);
    }
    Ok(())
}
