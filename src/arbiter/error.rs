//! Outcomes of an acquisition that ended without a grant.
//!
//! Plain `acquire` cannot fail. These only come back from the timed and
//! cancellable variants, and are expected results rather than faults: the
//! caller simply skips its transfer. No slot is held when one is returned.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireError {
    /// The deadline passed while the task was queued.
    TimedOut,
    /// The task's cancel token was triggered before it was granted.
    Cancelled,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::TimedOut => write!(f, "timed out waiting for a bus slot"),
            AcquireError::Cancelled => write!(f, "bus acquisition cancelled"),
        }
    }
}

impl std::error::Error for AcquireError {}
