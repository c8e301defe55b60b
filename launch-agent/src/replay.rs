// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! A [`JobSetApi`] that serves a recorded sequence of diffs instead of talking
//! to the service. Handy to reproduce what an agent saw.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use jobset_api::{
    JobId, JobSetApi, JobSetDescriptor, JobSetDiff, JobSetSpec, NO_DIFF_VERSION,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// On-disk format of a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayFile {
    pub job_set: JobSetDescriptor,
    #[serde(default)]
    pub diffs: Vec<JobSetDiff>,
}

impl ReplayFile {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid replay JSON")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("could not read replay file {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let decoded = BASE64_STANDARD
            .decode(encoded.trim())
            .context("replay is not valid base64")?;
        let json = String::from_utf8(decoded).context("replay is not valid UTF-8")?;
        Self::from_json(&json)
    }
}

/// A state change requested by the agent, as seen by the replay service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Lease {
        job_id: JobId,
        agent_id: String,
        granted: bool,
    },
    Ack {
        job_id: JobId,
        agent_id: String,
        run_name: String,
        accepted: bool,
    },
    Fail {
        job_id: JobId,
        message: String,
        stage: String,
        file_paths: Vec<String>,
    },
}

#[derive(Debug)]
struct ReplayState {
    pending: VecDeque<JobSetDiff>,
    last_version: i64,
    exhausted: bool,
    known: HashSet<JobId>,
    /// job id -> agent holding the lease
    leases: HashMap<JobId, String>,
    acked: HashSet<JobId>,
}

#[derive(Debug)]
pub struct ReplayApi {
    descriptor: JobSetDescriptor,
    state: Mutex<ReplayState>,
    tx: Sender<Mutation>,
    rx: Receiver<Mutation>,
}

impl ReplayApi {
    pub fn new(file: ReplayFile) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            descriptor: file.job_set,
            state: Mutex::new(ReplayState {
                pending: file.diffs.into(),
                last_version: NO_DIFF_VERSION,
                exhausted: false,
                known: HashSet::new(),
                leases: HashMap::new(),
                acked: HashSet::new(),
            }),
            tx,
            rx,
        }
    }

    pub fn descriptor(&self) -> &JobSetDescriptor {
        &self.descriptor
    }

    /// True once a fetch found no recorded diff left.
    pub fn is_exhausted(&self) -> bool {
        self.state().exhausted
    }

    pub fn remaining(&self) -> usize {
        self.state().pending.len()
    }

    /// Every lease, ack and fail the replay received, in order. The channel is
    /// unbounded, nothing is dropped when nobody listens.
    pub fn mutations(&self) -> Receiver<Mutation> {
        self.rx.clone()
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, mutation: Mutation) {
        if let Err(e) = self.tx.try_send(mutation) {
            warn!("Could not record replay mutation: {e}");
        }
    }

    fn check_job_set(&self, job_set_id: &str) -> anyhow::Result<()> {
        if job_set_id != self.descriptor.id {
            bail!(
                "unknown job set {job_set_id}, replay only serves {}",
                self.descriptor.id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobSetApi for ReplayApi {
    async fn get_job_set_by_spec(&self, spec: &JobSetSpec) -> anyhow::Result<JobSetDescriptor> {
        if spec.name != self.descriptor.name {
            bail!(
                "no job set named {} in replay (recorded: {})",
                spec.name,
                self.descriptor.name
            );
        }
        Ok(self.descriptor.clone())
    }

    async fn get_job_set_diff_by_id(
        &self,
        job_set_id: &str,
        version: i64,
        _agent_id: &str,
    ) -> anyhow::Result<JobSetDiff> {
        self.check_job_set(job_set_id)?;
        let mut state = self.state();

        while let Some(diff) = state.pending.pop_front() {
            if diff.version <= version {
                debug!(
                    "Replay skips diff {} already seen by cursor {}",
                    diff.version, version
                );
                continue;
            }
            for job in &diff.upsert_jobs {
                state.known.insert(job.id.clone());
            }
            for job_id in &diff.remove_jobs {
                state.known.remove(job_id);
            }
            state.last_version = diff.version;
            return Ok(diff);
        }

        state.exhausted = true;
        Ok(JobSetDiff::unchanged(state.last_version.max(version)))
    }

    async fn lease_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<bool> {
        self.check_job_set(job_set_id)?;
        let granted = {
            let mut state = self.state();
            if state.known.contains(job_id) && !state.leases.contains_key(job_id) {
                state.leases.insert(job_id.to_string(), agent_id.to_string());
                true
            } else {
                false
            }
        };
        self.publish(Mutation::Lease {
            job_id: job_id.to_string(),
            agent_id: agent_id.to_string(),
            granted,
        });
        Ok(granted)
    }

    async fn ack_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
        run_name: &str,
    ) -> anyhow::Result<bool> {
        self.check_job_set(job_set_id)?;
        let accepted = {
            let mut state = self.state();
            let holds_lease = state.leases.get(job_id).map(String::as_str) == Some(agent_id);
            holds_lease && state.acked.insert(job_id.to_string())
        };
        self.publish(Mutation::Ack {
            job_id: job_id.to_string(),
            agent_id: agent_id.to_string(),
            run_name: run_name.to_string(),
            accepted,
        });
        Ok(accepted)
    }

    async fn fail_run_queue_item(
        &self,
        job_id: &str,
        message: &str,
        stage: &str,
        file_paths: Option<&[String]>,
    ) -> anyhow::Result<bool> {
        self.state().leases.remove(job_id);
        self.publish(Mutation::Fail {
            job_id: job_id.to_string(),
            message: message.to_string(),
            stage: stage.to_string(),
            file_paths: file_paths.map(<[String]>::to_vec).unwrap_or_default(),
        });
        Ok(true)
    }
}
