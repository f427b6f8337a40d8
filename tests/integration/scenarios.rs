//! Deterministic arbitration scenarios.
//!
//! Each test arranges holders and waiters step by step, waiting for every
//! waiter to be queued before the next move, then checks who the arbiter
//! picks. Releases complete their grant before returning, so the snapshot
//! after a release is exact.

use crate::support::{wait_for_waiting, Holder};
use bus_arbiter::{ArbiterConfig, BusArbiter, Direction, Task, WaitClass};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::thread;

#[test]
fn receiver_waits_for_every_sender_to_leave() {
    let bus = BusArbiter::with_capacity(3);
    let mut senders: Vec<_> = (0..3).map(|_| bus.acquire(Task::send())).collect();

    let mut receiver = Holder::spawn(&bus, Task::receive());
    wait_for_waiting(&bus, 1);
    let snap = bus.snapshot();
    assert_eq!(snap.occupancy, 3);
    assert_eq!(snap.direction, Some(Direction::Send));
    assert_eq!(snap.waiting(WaitClass::NormalReceive), 1);

    drop(senders.pop());
    drop(senders.pop());
    assert_eq!(bus.snapshot().occupancy, 1);
    assert_eq!(receiver.granted(), None, "bus still carries a sender");

    drop(senders.pop());
    assert_eq!(receiver.wait_granted(), 3);
    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.direction), (1, Some(Direction::Receive)));

    receiver.release();
    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.total_waiting()), (0, 0));
}

#[test]
fn high_priority_waiter_goes_first() {
    let bus = BusArbiter::with_capacity(3);
    let receiver = bus.acquire(Task::receive());

    let mut normal = Holder::spawn(&bus, Task::send());
    wait_for_waiting(&bus, 1);
    let mut high = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 2);

    drop(receiver);
    assert_eq!(high.wait_granted(), 1);
    assert_eq!(normal.granted(), None, "one release grants one waiter");
    assert_eq!(bus.snapshot().waiting(WaitClass::NormalSend), 1);

    high.release();
    assert_eq!(normal.wait_granted(), 2);
    normal.release();
}

#[test]
fn flip_happens_only_once_the_bus_drains() {
    let bus = BusArbiter::with_capacity(3);
    let first = bus.acquire(Task::send());
    let second = bus.acquire(Task::send());

    let mut normal = Holder::spawn(&bus, Task::receive());
    wait_for_waiting(&bus, 1);
    let mut high = Holder::spawn(&bus, Task::high_receive());
    wait_for_waiting(&bus, 2);

    drop(first);
    let snap = bus.snapshot();
    assert_eq!(snap.occupancy, 1);
    assert_eq!(snap.direction, Some(Direction::Send));
    assert_eq!(snap.total_waiting(), 2);

    drop(second);
    high.wait_granted();
    let snap = bus.snapshot();
    assert_eq!((snap.occupancy, snap.direction), (1, Some(Direction::Receive)));
    assert_eq!(snap.waiting(WaitClass::NormalReceive), 1);
    assert!(bus.try_acquire(Task::send()).is_none(), "bus now runs the other way");

    high.release();
    normal.wait_granted();
    normal.release();
    assert_eq!(bus.snapshot().occupancy, 0);
}

#[test]
fn waiters_of_one_class_are_served_in_arrival_order() {
    const WAITERS: usize = 5;

    let bus = BusArbiter::with_capacity(1);
    let holder = bus.acquire(Task::receive());
    let (tx, rx) = unbounded();

    let threads: Vec<_> = (0..WAITERS)
        .map(|i| {
            let bus2 = Arc::clone(&bus);
            let tx = tx.clone();
            let th = thread::spawn(move || {
                let permit = bus2.acquire(Task::send());
                tx.send((permit.grant_seq(), i)).expect("send");
            });
            wait_for_waiting(&bus, i + 1);
            th
        })
        .collect();
    drop(tx);

    drop(holder);
    for th in threads {
        th.join().expect("join");
    }

    let mut order: Vec<(u64, usize)> = rx.iter().collect();
    order.sort_unstable();
    let arrivals: Vec<usize> = order.into_iter().map(|(_, i)| i).collect();
    assert_eq!(arrivals, (0..WAITERS).collect::<Vec<_>>());
}

#[test]
fn opposite_direction_is_not_starved_by_arrivals() {
    let bus = BusArbiter::new(ArbiterConfig::with_capacity(2).direction_streak(Some(2)));
    let first = bus.acquire(Task::send());
    let second = bus.acquire(Task::send());

    let mut receiver = Holder::spawn(&bus, Task::receive());
    wait_for_waiting(&bus, 1);

    drop(first);
    assert!(
        bus.try_acquire(Task::send()).is_none(),
        "streak spent with a receiver queued"
    );
    let mut late_sender = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 2);
    assert_eq!(bus.stats().queued_drain, 1);

    drop(second);
    receiver.wait_granted();
    let snap = bus.snapshot();
    assert_eq!(snap.direction, Some(Direction::Receive));
    assert_eq!(snap.waiting(WaitClass::HighSend), 1);
    assert_eq!(late_sender.granted(), None);

    receiver.release();
    late_sender.wait_granted();
    late_sender.release();
}

#[test]
fn normal_waiter_ages_past_high_stream() {
    let bus = BusArbiter::new(ArbiterConfig::with_capacity(1).priority_streak(Some(1)));
    let holder = bus.acquire(Task::receive());

    let mut normal = Holder::spawn(&bus, Task::send());
    wait_for_waiting(&bus, 1);
    let mut high_a = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 2);
    let mut high_b = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 3);

    drop(holder);
    assert_eq!(high_a.wait_granted(), 1);
    high_a.release();
    assert_eq!(normal.wait_granted(), 2, "aged NORMAL overtakes the second HIGH");
    normal.release();
    assert_eq!(high_b.wait_granted(), 3);
    high_b.release();
}

#[test]
fn strict_precedence_without_aging() {
    let bus = BusArbiter::new(ArbiterConfig::unbounded(1));
    let holder = bus.acquire(Task::receive());

    let mut normal = Holder::spawn(&bus, Task::send());
    wait_for_waiting(&bus, 1);
    let mut high_a = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 2);
    let mut high_b = Holder::spawn(&bus, Task::high_send());
    wait_for_waiting(&bus, 3);

    drop(holder);
    assert_eq!(high_a.wait_granted(), 1);
    high_a.release();
    assert_eq!(high_b.wait_granted(), 2);
    high_b.release();
    assert_eq!(normal.wait_granted(), 3);
    normal.release();
}
