//! Threads that hold a bus slot until told to let go.

use bus_arbiter::{BusArbiter, Task};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const PATIENCE: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Block until exactly `n` tasks are queued.
pub fn wait_for_waiting(bus: &BusArbiter, n: usize) {
    assert!(
        wait_until(PATIENCE, || bus.snapshot().total_waiting() == n),
        "expected {n} waiters, snapshot: {:?}",
        bus.snapshot()
    );
}

/// A task on its own thread: acquires, reports its grant, then holds the
/// slot until [`Holder::release`].
pub struct Holder {
    task: Task,
    granted: Option<u64>,
    granted_rx: Receiver<u64>,
    release_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl Holder {
    pub fn spawn(bus: &Arc<BusArbiter>, task: Task) -> Self {
        let (granted_tx, granted_rx) = bounded(1);
        let (release_tx, release_rx) = bounded::<()>(1);
        let bus = Arc::clone(bus);
        let thread = thread::Builder::new()
            .name(format!("holder-{task}"))
            .spawn(move || {
                let permit = bus.acquire(task);
                granted_tx.send(permit.grant_seq()).expect("test dropped holder");
                let _ = release_rx.recv();
                permit.release();
            })
            .expect("spawn holder");
        Self {
            task,
            granted: None,
            granted_rx,
            release_tx,
            thread,
        }
    }

    /// Grant sequence number, if granted by now.
    pub fn granted(&mut self) -> Option<u64> {
        if self.granted.is_none() {
            self.granted = self.granted_rx.try_recv().ok();
        }
        self.granted
    }

    pub fn wait_granted(&mut self) -> u64 {
        if let Some(seq) = self.granted {
            return seq;
        }
        let seq = self
            .granted_rx
            .recv_timeout(PATIENCE)
            .unwrap_or_else(|_| panic!("{} was never granted", self.task));
        self.granted = Some(seq);
        seq
    }

    /// Release the slot and wait for the thread. The release, including any
    /// grant it makes, is complete on return.
    pub fn release(mut self) {
        self.wait_granted();
        self.release_tx.send(()).expect("holder thread gone");
        self.thread.join().expect("holder thread panicked");
    }
}
