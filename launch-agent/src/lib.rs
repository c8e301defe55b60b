// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Client-side mirror of a launch job set: a cache of the remote queue kept
//! current by a background sync loop, plus the lease / ack / fail calls an
//! agent uses to claim and resolve jobs.

pub mod config;
pub mod error;
pub mod event;
pub mod job_set;
pub mod replay;
pub mod runtime;

pub use config::{ErrorPolicyKind, JobSetConfig, DEFAULT_POLL_INTERVAL};
pub use error::{JobSetError, Result};
pub use job_set::error_policy::{
    RetryWithBackoff, SyncErrorAction, SyncErrorPolicy, TerminateOnError,
};
pub use job_set::{create_job_set, JobSet, Snapshot, SyncExit};
pub use jobset_api as api;
pub use runtime::BackgroundRuntime;
