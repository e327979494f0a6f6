//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound single descriptor operations (data reads and writes)
//! - Idle timer for the control channel, armed only while something is
//!   pending
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and always fatal

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::WasError;

/// Run `fut` with a deadline, mapping expiry to [`WasError::Timeout`].
pub async fn with_timeout<F, T>(
    duration: Duration,
    what: &'static str,
    fut: F,
) -> Result<T, WasError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| WasError::Timeout(what))
}

/// A restartable deadline that only runs while armed.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// Arm or disarm. Arming keeps an already running deadline.
    pub fn arm(&mut self, armed: bool) {
        match (armed, self.deadline) {
            (true, None) => self.deadline = Some(Instant::now() + self.duration),
            (false, _) => self.deadline = None,
            (true, Some(_)) => {}
        }
    }

    /// Progress was made; restart the deadline if armed.
    pub fn touch(&mut self) {
        if self.deadline.is_some() {
            self.deadline = Some(Instant::now() + self.duration);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves at the deadline; never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
