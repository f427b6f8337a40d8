//! Full workload runs: many runner threads, one arbiter, one probe.

use bus_arbiter::workload::{
    launch_batch, run_suite, BatchOptions, BatchSpec, HolderProbe, TransferDelay,
    REFERENCE_BATCHES,
};
use bus_arbiter::{ArbiterConfig, BusArbiter};
use std::sync::Arc;
use std::time::Duration;

fn reference_runners() -> u64 {
    REFERENCE_BATCHES.iter().map(|b| b.total() as u64).sum()
}

fn short_hold() -> BatchOptions {
    BatchOptions {
        delay: TransferDelay::Fixed {
            hold: Duration::from_micros(100),
        },
        seed: 1,
    }
}

#[test]
fn reference_suite_runs_clean() {
    let bus = BusArbiter::new(ArbiterConfig::default());
    let report = run_suite(&bus, &REFERENCE_BATCHES, &short_hold(), false).expect("spawn");

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.batches.len(), REFERENCE_BATCHES.len());
    assert_eq!(report.stats.total_grants(), reference_runners());
    assert!(report.stats.peak_occupancy <= 3);
    assert!(report.probe.peak_send <= 3 && report.probe.peak_receive <= 3);

    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.total_waiting()), (0, 0));
}

#[test]
fn overlapped_random_suite_runs_clean() {
    let bus = BusArbiter::with_capacity(2);
    let opts = BatchOptions {
        delay: TransferDelay::Uniform {
            max: Duration::from_micros(300),
        },
        seed: 0xB05,
    };
    let report = run_suite(&bus, &REFERENCE_BATCHES, &opts, true).expect("spawn");

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.stats.total_grants(), reference_runners());
    assert!(report.stats.peak_occupancy <= 2);
}

#[test]
fn strict_and_tight_configurations_complete() {
    let configs = [
        ArbiterConfig::unbounded(3),
        ArbiterConfig::with_capacity(2)
            .direction_streak(Some(1))
            .priority_streak(Some(1)),
        ArbiterConfig::with_capacity(1),
    ];
    let specs = [BatchSpec::new(7, 23, 17, 1), BatchSpec::new(22, 22, 10, 10)];
    let opts = BatchOptions {
        delay: TransferDelay::None,
        seed: 9,
    };

    for config in configs {
        let capacity = config.capacity;
        let bus = BusArbiter::new(config.clone());
        let report = run_suite(&bus, &specs, &opts, true).expect("spawn");
        assert!(report.is_clean(), "{config:?}: {report:?}");
        assert!(report.stats.peak_occupancy <= capacity, "{config:?}");
    }
}

#[test]
fn batches_share_one_probe() {
    let bus = BusArbiter::with_capacity(3);
    let probe = Arc::new(HolderProbe::new(3));
    let opts = short_hold();

    let senders = launch_batch(&bus, &probe, BatchSpec::new(10, 0, 5, 0), &opts).expect("spawn");
    let receivers = launch_batch(&bus, &probe, BatchSpec::new(0, 10, 0, 5), &opts).expect("spawn");
    let a = senders.join();
    let b = receivers.join();

    assert!(a.is_complete() && b.is_complete());
    let seen = probe.report();
    assert_eq!(seen.violations, 0);
    assert!(seen.peak_send >= 1 && seen.peak_receive >= 1);
    assert_eq!(bus.stats().total_grants(), 30);
}
