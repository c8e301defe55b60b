// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt::Debug;
use std::time::Duration;

use crate::error::JobSetError;

/// What the sync loop does after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorAction {
    /// Leave the loop. The job set keeps its last applied state forever.
    Terminate,
    /// Sleep, then try again. Shutdown still interrupts the sleep.
    RetryAfter(Duration),
}

/// Decides how the sync loop reacts to a failed diff fetch.
///
/// `consecutive_failures` starts at 1 and is reset by the next successful sync.
pub trait SyncErrorPolicy: Debug + Send + Sync {
    fn on_sync_error(&self, error: &JobSetError, consecutive_failures: u32) -> SyncErrorAction;
}

/// Any failure ends the loop. The owner notices through `wait_for_done`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminateOnError;

impl SyncErrorPolicy for TerminateOnError {
    fn on_sync_error(&self, _error: &JobSetError, _consecutive_failures: u32) -> SyncErrorAction {
        SyncErrorAction::Terminate
    }
}

/// Exponential backoff: `initial`, doubled per consecutive failure, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryWithBackoff {
    pub initial: Duration,
    pub max: Duration,
    /// Give up after this many failures in a row. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryWithBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl RetryWithBackoff {
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl SyncErrorPolicy for RetryWithBackoff {
    fn on_sync_error(&self, _error: &JobSetError, consecutive_failures: u32) -> SyncErrorAction {
        match self.max_attempts {
            Some(max_attempts) if consecutive_failures >= max_attempts => SyncErrorAction::Terminate,
            _ => SyncErrorAction::RetryAfter(self.delay_for(consecutive_failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_error() -> JobSetError {
        JobSetError::Fetch {
            job_set: "queue".into(),
            cause: anyhow::anyhow!("connection reset"),
        }
    }

    #[test]
    fn terminate_policy_always_terminates() {
        let policy = TerminateOnError;
        assert_eq!(
            policy.on_sync_error(&fetch_error(), 1),
            SyncErrorAction::Terminate
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryWithBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(200), Duration::from_millis(500));
    }

    #[test]
    fn backoff_gives_up_after_max_attempts() {
        let policy = RetryWithBackoff {
            max_attempts: Some(3),
            ..RetryWithBackoff::default()
        };
        assert!(matches!(
            policy.on_sync_error(&fetch_error(), 2),
            SyncErrorAction::RetryAfter(_)
        ));
        assert_eq!(
            policy.on_sync_error(&fetch_error(), 3),
            SyncErrorAction::Terminate
        );
    }
}
