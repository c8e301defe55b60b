// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;

use jobset_api::{Job, JobId, JobSetDiff, Metadata, NO_DIFF_VERSION};

/// Local copy of a job set's jobs and metadata, together with the version of
/// the last diff applied to them.
#[derive(Debug, Clone)]
pub struct JobCache {
    version: i64,
    jobs: HashMap<JobId, Job>,
    metadata: Metadata,
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new(Metadata::new())
    }
}

/// What applying a single diff did to the cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub upserted: Vec<JobId>,
    pub removed: Vec<JobId>,
    /// Ids the diff asked to remove that were not cached.
    pub missing: Vec<JobId>,
}

impl ApplyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
    }
}

impl JobCache {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            version: NO_DIFF_VERSION,
            jobs: HashMap::new(),
            metadata,
        }
    }

    /// True if `diff` is older than what the cache already holds.
    pub fn is_stale(&self, diff: &JobSetDiff) -> bool {
        diff.version < self.version
    }

    /// Upserts first, then removals. Full snapshots and incremental patches
    /// are merged the same way. The cache version moves to the diff's.
    pub fn apply(&mut self, diff: JobSetDiff) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.version = diff.version;

        for job in diff.upsert_jobs {
            report.upserted.push(job.id.clone());
            self.jobs.insert(job.id.clone(), job);
        }

        for job_id in diff.remove_jobs {
            if self.jobs.remove(&job_id).is_some() {
                report.removed.push(job_id);
            } else {
                report.missing.push(job_id);
            }
        }

        if !diff.metadata.is_empty() {
            self.metadata = diff.metadata;
        }

        report
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn jobs(&self) -> &HashMap<JobId, Job> {
        &self.jobs
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

}
