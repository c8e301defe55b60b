// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use futures::{pin_mut, select, FutureExt};
use log::{debug, error, warn};

use super::error_policy::SyncErrorAction;
use super::{Inner, SyncExit};
use crate::error::{JobSetError, Result};

/// Body of the background task. Always ends by recording the exit status and
/// setting `done`.
pub(super) async fn run(inner: Arc<Inner>) {
    let exit = drive(&inner).await;
    match &exit {
        SyncExit::Stopped => debug!("[JobSet {}] Sync loop exited.", inner.label()),
        SyncExit::Failed(reason) => error!(
            "[JobSet {}] Sync loop terminated: {}",
            inner.label(),
            reason
        ),
    }
    *inner.exit() = Some(exit);
    inner.done.set();
}

async fn drive(inner: &Inner) -> SyncExit {
    let mut consecutive_failures = 0u32;

    while !inner.shutdown.is_set() {
        let pause = match inner.sync().await {
            Ok(()) => {
                consecutive_failures = 0;
                inner.config.poll_interval
            }
            Err(error) => {
                consecutive_failures += 1;
                match inner
                    .config
                    .error_policy
                    .on_sync_error(&error, consecutive_failures)
                {
                    SyncErrorAction::Terminate => return SyncExit::Failed(error.to_string()),
                    SyncErrorAction::RetryAfter(delay) => {
                        warn!(
                            "[JobSet {}] Sync failed ({} in a row), retrying in {:?}: {}",
                            inner.label(),
                            consecutive_failures,
                            delay,
                            error
                        );
                        delay
                    }
                }
            }
        };

        inner.wait_for_poll(pause).await;
        inner.poll_now.clear();
    }

    SyncExit::Stopped
}

impl Inner {
    /// One cycle: fetch the diff since the cursor and apply it under the lock.
    async fn sync(&self) -> Result<()> {
        debug!("[JobSet {}] Updating...", self.label());
        let cursor = self.cache().version();

        let diff = self
            .api
            .get_job_set_diff_by_id(&self.id, cursor, &self.config.agent_id)
            .await
            .map_err(|cause| JobSetError::Fetch {
                job_set: self.label().to_string(),
                cause,
            })?;

        if diff.is_empty() {
            debug!(
                "[JobSet {}] Next state: version {}, no changes",
                self.label(),
                diff.version
            );
        } else {
            debug!(
                "[JobSet {}] Next state: version {} (complete: {}), {} upserts, {} removals",
                self.label(),
                diff.version,
                diff.complete,
                diff.upsert_jobs.len(),
                diff.remove_jobs.len()
            );
        }

        let (report, job_count) = {
            let mut cache = self.cache();
            if cache.is_stale(&diff) {
                let current = cache.version();
                drop(cache);
                warn!(
                    "[JobSet {}] Ignoring stale diff with version {} behind {}",
                    self.label(),
                    diff.version,
                    current
                );
                return Ok(());
            }
            let report = cache.apply(diff);
            (report, cache.jobs().len())
        };

        for job_id in &report.upserted {
            debug!("[JobSet {}] Updated Job {}", self.label(), job_id);
        }
        for job_id in &report.removed {
            debug!("[JobSet {}] Deleted Job {}", self.label(), job_id);
        }
        if !report.is_consistent() {
            for job_id in &report.missing {
                error!(
                    "[JobSet {}] Deleted Job {}, but it did not exist",
                    self.label(),
                    job_id
                );
            }
        }

        debug!("[JobSet {}] Done, {} jobs cached.", self.label(), job_count);
        self.ready.set();
        self.updated.set();
        Ok(())
    }

    /// Sleeps for `timeout` unless somebody asks for an eager poll first.
    async fn wait_for_poll(&self, timeout: Duration) {
        let timer = Timer::after(timeout).fuse();
        let poll_now = self.poll_now.wait().fuse();
        pin_mut!(timer, poll_now);
        select! {
            _ = timer => {},
            _ = poll_now => {},
        }
    }
}
