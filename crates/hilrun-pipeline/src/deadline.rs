//! Job-wide deadline threaded through every `run` call

use crate::error::{ActionError, Result};
use std::time::Duration;
use tokio::time::Instant;

/// The job's `max_end_time`. Actions check it before starting unbounded
/// work (archive creation, long copies, rendezvous).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_else(Self::none)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|end| end.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.0.map(|end| Instant::now() >= end).unwrap_or(false)
    }

    /// Fail with a timeout-class error if the deadline has passed
    pub fn check(&self, action: &str) -> Result<()> {
        if self.is_expired() {
            return Err(ActionError::Timeout {
                action: action.to_string(),
                message: "job deadline exceeded".to_string(),
            });
        }
        Ok(())
    }

    /// The earlier of this deadline and `now + limit`
    pub fn capped(&self, limit: Duration) -> Self {
        let capped = Instant::now() + limit;
        match self.0 {
            Some(end) if end <= capped => *self,
            _ => Self(Some(capped)),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
