//! Bounded polling until an external system converges.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tidepool_core::WaitConfig;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{what} is not ready after {polls} polls")]
    Timeout { what: String, polls: u64 },

    #[error("{what} reached an unexpected state: {reason}")]
    Aborted { what: String, reason: String },
}

/// Verdict of a ready predicate on one status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
    /// The status can never become ready. Stops polling at once.
    Abort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessWaiter {
    interval: Duration,
    timeout: Duration,
}

impl ReadinessWaiter {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &WaitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Number of polls made before giving up: `floor(timeout / interval)`.
    pub fn max_polls(&self) -> u64 {
        (self.timeout.as_millis() / self.interval.as_millis().max(1)) as u64
    }

    /// Poll `status` until `ready` accepts a snapshot.
    ///
    /// A failed poll is logged and counts as not ready. Returns the first
    /// ready snapshot.
    pub async fn wait<S, E, F, Fut, P>(&self, what: &str, mut status: F, ready: P) -> Result<S, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, E>>,
        E: Display,
        P: Fn(&S) -> Readiness,
    {
        let polls = self.max_polls();
        for poll in 1..=polls {
            match status().await {
                Ok(snapshot) => match ready(&snapshot) {
                    Readiness::Ready => {
                        debug!(what, poll, "ready");
                        return Ok(snapshot);
                    }
                    Readiness::NotReady => debug!(what, poll, polls, "not ready yet"),
                    Readiness::Abort(reason) => {
                        return Err(WaitError::Aborted {
                            what: what.to_string(),
                            reason,
                        });
                    }
                },
                Err(e) => warn!(what, poll, error = %e, "status poll failed"),
            }
            if poll < polls {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(WaitError::Timeout {
            what: what.to_string(),
            polls,
        })
    }
}
