// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Job sets
//!
//! A [`JobSet`] mirrors a remote job queue. A single background task (the sync
//! loop) fetches versioned diffs and applies them to a local cache; consumers
//! lease, acknowledge and fail jobs through the same handle and only ever read
//! copies of the cache.
//!
//! ```text
//!     lease/ack/fail  ----------------> remote service
//!          |                                 ^
//!          | poll-now (on success)           | diff since version
//!          v                                 |
//!     +----------+  timer or poll-now   +----+------+   lock   +-----------+
//!     |   idle   | -------------------> |  fetching | -------> |  applying |
//!     +----------+                      +-----------+          +-----+-----+
//!          ^                                                         |
//!          +---------------------- ready / updated ------------------+
//! ```
//!
//! The loop leaves `idle` for good once shutdown is requested.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::task::{Spawn, SpawnExt};
use futures::{pin_mut, select_biased, Future, FutureExt};
use jobset_api::{
    Job, JobId, JobSetApi, JobSetDescriptor, JobSetId, JobSetSpec, Metadata,
};
use log::{debug, error};

use crate::config::JobSetConfig;
use crate::error::{JobSetError, Result};
use crate::event::Event;

pub mod cache;
pub mod error_policy;
mod sync_loop;

use cache::JobCache;


/// How a sync loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncExit {
    /// `stop_sync_loop` was called.
    Stopped,
    /// A sync failed and the error policy gave up.
    Failed(String),
}

/// Jobs and metadata as of one applied diff.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: i64,
    pub jobs: HashMap<JobId, Job>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Running,
    Stopped,
}

struct Inner {
    api: Arc<dyn JobSetApi>,
    id: JobSetId,
    name: String,
    spec: Option<JobSetSpec>,
    config: JobSetConfig,

    cache: Mutex<JobCache>,

    phase: Mutex<Phase>,
    exit: Mutex<Option<SyncExit>>,

    ready: Event,
    updated: Event,
    shutdown: Event,
    done: Event,
    poll_now: Event,
}

impl Inner {
    fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    fn cache(&self) -> MutexGuard<'_, JobCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exit(&self) -> MutexGuard<'_, Option<SyncExit>> {
        self.exit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a locally mirrored job set. Clones share the same cache and loop.
#[derive(Clone)]
pub struct JobSet {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSet")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("version", &self.job_set_diff_version())
            .finish()
    }
}

/// Looks the job set up by `spec` and wraps the result. The sync loop is not
/// started.
pub async fn create_job_set(
    spec: JobSetSpec,
    api: Arc<dyn JobSetApi>,
    config: JobSetConfig,
) -> Result<JobSet> {
    let descriptor = api
        .get_job_set_by_spec(&spec)
        .await
        .map_err(|cause| JobSetError::Lookup {
            name: spec.name.clone(),
            cause,
        })?;
    Ok(JobSet::build(api, descriptor, Some(spec), config))
}

impl JobSet {
    pub fn new(api: Arc<dyn JobSetApi>, descriptor: JobSetDescriptor, config: JobSetConfig) -> Self {
        Self::build(api, descriptor, None, config)
    }

    fn build(
        api: Arc<dyn JobSetApi>,
        descriptor: JobSetDescriptor,
        spec: Option<JobSetSpec>,
        config: JobSetConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                id: descriptor.id,
                name: descriptor.name,
                spec,
                config,
                cache: Mutex::new(JobCache::new(descriptor.metadata)),
                phase: Mutex::new(Phase::NotStarted),
                exit: Mutex::new(None),
                ready: Event::new(),
                updated: Event::new(),
                shutdown: Event::new(),
                done: Event::new(),
                poll_now: Event::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn spec(&self) -> Option<&JobSetSpec> {
        self.inner.spec.as_ref()
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.config.agent_id
    }

    /// Copy of all cached jobs, always taken between two diff applications.
    pub fn jobs(&self) -> HashMap<JobId, Job> {
        self.inner.cache().jobs().clone()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.inner.cache().get(job_id).cloned()
    }

    pub fn metadata(&self) -> Metadata {
        self.inner.cache().metadata().clone()
    }

    /// Version, jobs and metadata read under a single lock, so the three
    /// always belong to the same diff.
    pub fn snapshot(&self) -> Snapshot {
        let cache = self.inner.cache();
        Snapshot {
            version: cache.version(),
            jobs: cache.jobs().clone(),
            metadata: cache.metadata().clone(),
        }
    }

    /// Version of the last applied diff, `NO_DIFF_VERSION` before the first one.
    pub fn job_set_diff_version(&self) -> i64 {
        self.inner.cache().version()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_set()
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.is_set()
    }

    pub fn exit_status(&self) -> Option<SyncExit> {
        self.inner.exit().clone()
    }

    /// Spawns the sync loop. Allowed once per instance; a stopped job set
    /// cannot be restarted.
    pub fn start_sync_loop<S>(&self, spawner: &S) -> Result<()>
    where
        S: Spawn + ?Sized,
    {
        let mut phase = self.inner.phase();
        if *phase != Phase::NotStarted {
            error!(
                "[JobSet {}] Tried to start JobSet but already started",
                self.inner.label()
            );
            return Err(JobSetError::AlreadyStarted {
                job_set: self.inner.label().to_string(),
            });
        }

        self.inner.shutdown.clear();
        debug!("[JobSet {}] Starting sync loop", self.inner.label());
        spawner.spawn(sync_loop::run(self.inner.clone()))?;
        *phase = Phase::Running;
        Ok(())
    }

    /// Asks the loop to exit after the current cycle. A fetch already in flight
    /// completes; a pending wait is cut short.
    pub fn stop_sync_loop(&self) -> Result<()> {
        let mut phase = self.inner.phase();
        if *phase != Phase::Running {
            error!(
                "[JobSet {}] Tried to stop JobSet but not started",
                self.inner.label()
            );
            return Err(JobSetError::NotStarted {
                job_set: self.inner.label().to_string(),
            });
        }

        debug!("[JobSet {}] Stopping sync loop", self.inner.label());
        self.inner.shutdown.set();
        self.inner.poll_now.set();
        *phase = Phase::Stopped;
        Ok(())
    }

    /// Resolves once the first diff has been applied.
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    /// Resolves after the next sync that completes after this call.
    pub async fn wait_for_update(&self) {
        self.inner.updated.clear();
        self.inner.updated.wait().await
    }

    /// Resolves once the sync loop has terminated.
    pub async fn wait_for_done(&self) -> SyncExit {
        self.inner.done.wait().await;
        self.exit_status().unwrap_or(SyncExit::Stopped)
    }

    /// Like [`JobSet::ready`], but gives up with the exit status if the loop
    /// dies first.
    pub async fn ready_or_exit(&self) -> std::result::Result<(), SyncExit> {
        self.race_with_done(self.ready()).await
    }

    /// Like [`JobSet::wait_for_update`], but gives up with the exit status if
    /// the loop dies first.
    pub async fn next_update_or_exit(&self) -> std::result::Result<(), SyncExit> {
        self.race_with_done(self.wait_for_update()).await
    }

    async fn race_with_done<F>(&self, wait: F) -> std::result::Result<(), SyncExit>
    where
        F: Future<Output = ()>,
    {
        let wait = wait.fuse();
        let done = self.wait_for_done().fuse();
        pin_mut!(wait, done);
        // a wait that is already satisfied wins over a finished loop
        select_biased! {
            _ = wait => Ok(()),
            exit = done => Err(exit),
        }
    }

    /// Leases `job_id` for this agent. Returns the service's answer.
    pub async fn lease_job(&self, job_id: &str) -> Result<bool> {
        let result = self
            .inner
            .api
            .lease_job_set_item(&self.inner.id, job_id, &self.inner.config.agent_id)
            .await;
        self.settle("lease", job_id, result)
    }

    /// Tells the service a leased job was started as `run_name`.
    pub async fn ack_job(&self, job_id: &str, run_name: &str) -> Result<bool> {
        let result = self
            .inner
            .api
            .ack_job_set_item(
                &self.inner.id,
                job_id,
                &self.inner.config.agent_id,
                run_name,
            )
            .await;
        self.settle("ack", job_id, result)
    }

    /// Tells the service a job failed in `stage` before or while running.
    pub async fn fail_job(
        &self,
        job_id: &str,
        message: &str,
        stage: &str,
        file_paths: Option<&[String]>,
    ) -> Result<bool> {
        let result = self
            .inner
            .api
            .fail_run_queue_item(job_id, message, stage, file_paths)
            .await;
        self.settle("fail", job_id, result)
    }

    fn settle(
        &self,
        operation: &'static str,
        job_id: &str,
        result: anyhow::Result<bool>,
    ) -> Result<bool> {
        match result {
            Ok(true) => {
                debug!(
                    "[JobSet {}] {} of job {} accepted, polling now",
                    self.inner.label(),
                    operation,
                    job_id
                );
                self.poll_now();
                Ok(true)
            }
            Ok(false) => {
                debug!(
                    "[JobSet {}] {} of job {} refused",
                    self.inner.label(),
                    operation,
                    job_id
                );
                Ok(false)
            }
            Err(cause) => Err(JobSetError::Remote {
                operation,
                job_id: job_id.to_string(),
                cause,
            }),
        }
    }

    fn poll_now(&self) {
        self.inner.poll_now.set();
    }
}
