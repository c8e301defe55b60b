// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use futures::task::SpawnError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobSetError {
    #[error("tried to start job set {job_set} but its sync loop was already started")]
    AlreadyStarted { job_set: String },

    #[error("tried to stop job set {job_set} but its sync loop is not running")]
    NotStarted { job_set: String },

    #[error("could not spawn the sync loop: {0}")]
    Spawn(#[from] SpawnError),

    #[error("could not look up job set {name}: {cause:#}")]
    Lookup { name: String, cause: anyhow::Error },

    #[error("failed to fetch diff for job set {job_set}: {cause:#}")]
    Fetch { job_set: String, cause: anyhow::Error },

    #[error("{operation} of job {job_id} failed: {cause:#}")]
    Remote {
        operation: &'static str,
        job_id: String,
        cause: anyhow::Error,
    },
}

impl JobSetError {
    /// Caller misuse rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            JobSetError::AlreadyStarted { .. } | JobSetError::NotStarted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, JobSetError>;
