//! Task identity as seen by the arbiter.
//!
//! A task is nothing more than a `(direction, priority)` pair. The arbiter
//! never needs to tell two tasks of the same pair apart: holders are counted,
//! and waiters are identified by the handle parked in their queue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a transfer over the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Task moves data to the accelerator.
    Send,
    /// Task reads results back from the accelerator.
    Receive,
}

impl Direction {
    /// Both directions, in index order.
    pub const ALL: [Direction; 2] = [Direction::Send, Direction::Receive];

    /// The other direction.
    #[inline]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Send => Direction::Receive,
            Direction::Receive => Direction::Send,
        }
    }

    /// Stable array index (`Send = 0`, `Receive = 1`).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::Send => 0,
            Direction::Receive => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        })
    }
}

/// Scheduling hint. Only affects wake order among waiters, never admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Normal,
    High,
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriorityClass::Normal => "normal",
            PriorityClass::High => "high",
        })
    }
}

/// One logical unit of bus work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub direction: Direction,
    pub priority: PriorityClass,
}

impl Task {
    #[inline]
    pub const fn new(direction: Direction, priority: PriorityClass) -> Self {
        Self {
            direction,
            priority,
        }
    }

    /// Normal-priority sender.
    #[inline]
    pub const fn send() -> Self {
        Self::new(Direction::Send, PriorityClass::Normal)
    }

    /// Normal-priority receiver.
    #[inline]
    pub const fn receive() -> Self {
        Self::new(Direction::Receive, PriorityClass::Normal)
    }

    /// High-priority sender.
    #[inline]
    pub const fn high_send() -> Self {
        Self::new(Direction::Send, PriorityClass::High)
    }

    /// High-priority receiver.
    #[inline]
    pub const fn high_receive() -> Self {
        Self::new(Direction::Receive, PriorityClass::High)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority, self.direction)
    }
}

/// Identity of one of the four wait queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitClass {
    HighSend,
    HighReceive,
    NormalSend,
    NormalReceive,
}

impl WaitClass {
    /// All classes, in index order.
    pub const ALL: [WaitClass; 4] = [
        WaitClass::HighSend,
        WaitClass::HighReceive,
        WaitClass::NormalSend,
        WaitClass::NormalReceive,
    ];

    #[inline]
    pub const fn new(priority: PriorityClass, direction: Direction) -> Self {
        match (priority, direction) {
            (PriorityClass::High, Direction::Send) => WaitClass::HighSend,
            (PriorityClass::High, Direction::Receive) => WaitClass::HighReceive,
            (PriorityClass::Normal, Direction::Send) => WaitClass::NormalSend,
            (PriorityClass::Normal, Direction::Receive) => WaitClass::NormalReceive,
        }
    }

    /// Queue a task parks in when it cannot be admitted.
    #[inline]
    pub const fn of(task: Task) -> Self {
        Self::new(task.priority, task.direction)
    }

    #[inline]
    pub const fn direction(self) -> Direction {
        match self {
            WaitClass::HighSend | WaitClass::NormalSend => Direction::Send,
            WaitClass::HighReceive | WaitClass::NormalReceive => Direction::Receive,
        }
    }

    #[inline]
    pub const fn priority(self) -> PriorityClass {
        match self {
            WaitClass::HighSend | WaitClass::HighReceive => PriorityClass::High,
            WaitClass::NormalSend | WaitClass::NormalReceive => PriorityClass::Normal,
        }
    }

    /// The task shape a grant from this queue is made for.
    #[inline]
    pub const fn task(self) -> Task {
        Task::new(self.direction(), self.priority())
    }

    /// Stable array index into per-class tables.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            WaitClass::HighSend => 0,
            WaitClass::HighReceive => 1,
            WaitClass::NormalSend => 2,
            WaitClass::NormalReceive => 3,
        }
    }
}

impl fmt::Display for WaitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.task(), f)
    }
}
