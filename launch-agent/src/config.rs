// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use crate::job_set::error_policy::{RetryWithBackoff, SyncErrorPolicy, TerminateOnError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per job set settings, handed over at construction.
#[derive(Debug, Clone)]
pub struct JobSetConfig {
    /// Identity used for leases and sent along with every diff request.
    pub agent_id: String,
    /// Upper bound between two syncs when nobody asks for an eager poll.
    pub poll_interval: Duration,
    pub error_policy: Arc<dyn SyncErrorPolicy>,
}

impl JobSetConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_policy: Arc::new(TerminateOnError),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_policy(mut self, policy: impl SyncErrorPolicy + 'static) -> Self {
        self.error_policy = Arc::new(policy);
        self
    }

    pub fn with_shared_error_policy(mut self, policy: Arc<dyn SyncErrorPolicy>) -> Self {
        self.error_policy = policy;
        self
    }
}

/// The sync error policy as selected on the command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum ErrorPolicyKind {
    #[default]
    /// Default: a failed fetch ends the sync loop
    Terminate,
    /// Retry failed fetches with exponential backoff (1s up to 60s)
    Backoff,
}

impl ErrorPolicyKind {
    pub fn into_policy(self) -> Arc<dyn SyncErrorPolicy> {
        match self {
            ErrorPolicyKind::Terminate => Arc::new(TerminateOnError),
            ErrorPolicyKind::Backoff => Arc::new(RetryWithBackoff::default()),
        }
    }
}
