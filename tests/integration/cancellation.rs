//! Withdrawal paths: timeouts, cancel tokens and panicking holders.

use crate::support::{wait_for_waiting, Holder};
use bus_arbiter::{AcquireError, ArbiterConfig, BusArbiter, CancelToken, Direction, Task, WaitClass};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn timed_out_flip_releases_drained_senders() {
    let bus = BusArbiter::new(ArbiterConfig::with_capacity(2).direction_streak(Some(1)));
    let holder = bus.acquire(Task::send());

    let bus2 = Arc::clone(&bus);
    let receiver = thread::spawn(move || {
        bus2.acquire_timeout(Task::receive(), Duration::from_millis(500))
            .map(|p| p.task())
    });
    wait_for_waiting(&bus, 1);

    // A flip is owed, so this sender queues next to a free slot.
    let mut sender = Holder::spawn(&bus, Task::send());
    wait_for_waiting(&bus, 2);
    assert_eq!(bus.stats().queued_drain, 1);

    assert_eq!(receiver.join().expect("join"), Err(AcquireError::TimedOut));
    sender.wait_granted();
    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.total_waiting()), (2, 0));
    assert_eq!(bus.stats().timeouts, 1);

    sender.release();
    drop(holder);
    assert_eq!(bus.snapshot().occupancy, 0);
}

#[test]
fn cancel_withdraws_only_token_holders() {
    let bus = BusArbiter::with_capacity(1);
    let holder = bus.acquire(Task::send());
    let token = CancelToken::new();

    let cancellable: Vec<_> = [Task::receive(), Task::high_receive(), Task::high_send()]
        .into_iter()
        .enumerate()
        .map(|(i, task)| {
            let bus2 = Arc::clone(&bus);
            let token = token.clone();
            let th = thread::spawn(move || bus2.acquire_cancellable(task, &token).map(|p| p.task()));
            wait_for_waiting(&bus, i + 1);
            th
        })
        .collect();
    let mut survivor = Holder::spawn(&bus, Task::receive());
    wait_for_waiting(&bus, 4);

    assert_eq!(bus.cancel(&token), 3);
    for th in cancellable {
        assert_eq!(th.join().expect("join"), Err(AcquireError::Cancelled));
    }
    let snap = bus.snapshot();
    assert_eq!(snap.total_waiting(), 1);
    assert_eq!(snap.waiting(WaitClass::NormalReceive), 1);
    assert_eq!(bus.cancel(&token), 0, "nothing left to cancel");

    drop(holder);
    survivor.wait_granted();
    assert_eq!(bus.snapshot().direction, Some(Direction::Receive));
    survivor.release();
    assert_eq!(bus.stats().cancellations, 3);
}

#[test]
fn cancelled_token_fails_fast_on_idle_bus() {
    let bus = BusArbiter::with_capacity(3);
    let token = CancelToken::new();
    bus.cancel(&token);

    let err = bus.acquire_cancellable(Task::high_send(), &token).err();
    assert_eq!(err, Some(AcquireError::Cancelled));
    assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("bus acquisition cancelled"));
    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.total_waiting()), (0, 0));
    assert_eq!(bus.stats().total_grants(), 0);
}

#[test]
fn panicking_holder_hands_off_its_slot() {
    let bus = BusArbiter::with_capacity(1);

    let bus2 = Arc::clone(&bus);
    let doomed = thread::spawn(move || {
        let _permit = bus2.acquire(Task::send());
        panic!("transfer failed");
    });
    assert!(doomed.join().is_err());

    let permit = bus
        .acquire_timeout(Task::receive(), Duration::from_secs(5))
        .expect("slot returned by the unwinding holder");
    assert_eq!(permit.task(), Task::receive());
}
