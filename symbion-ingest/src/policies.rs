//! # Supervision policies for topic workers.
//!
//! - [`FailurePolicy`] decides what a worker does with a payload it cannot decode.
//! - [`RestartPolicy`] decides whether the supervisor restarts a worker that stopped
//!   on a fatal error.
//! - [`BackoffPolicy`] computes the delay before such a restart.
//!
//! ```text
//! malformed payload ──► FailurePolicy::Skip  ─► warn, next message
//!                   └─► FailurePolicy::Stop  ─► worker fatal ─► RestartPolicy::Never     ─► stays down
//!                                                          └─► RestartPolicy::OnFailure ─► sleep(backoff.next(n)), resubscribe
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a worker does when a payload fails to decode.
///
/// Unsupported record types are always fatal regardless of this policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop consuming the topic and report the error (default).
    #[default]
    Stop,
    /// Log the bad message and keep consuming.
    Skip,
}

/// Whether a worker stopped by a fatal error is started again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// A dead worker stays dead; the fatal log is the operator signal (default).
    #[default]
    Never,
    /// Resubscribe after a backoff delay.
    OnFailure,
}

/// Restart backoff: `first × factor^attempt`, clamped to `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given restart number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
