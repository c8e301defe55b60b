// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Wire types shared between the launch agent and the job-set service, plus the
//! [`JobSetApi`] trait the agent uses to talk to that service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type JobSetId = String;
pub type JobId = String;
pub type Metadata = Map<String, Value>;

/// Cursor sent to the service before any diff has been applied.
pub const NO_DIFF_VERSION: i64 = -1;

/// Identifies the remote job collection an agent attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSetSpec {
    pub name: String,
    pub entity_name: String,
    pub project_name: Option<String>,
}

impl JobSetSpec {
    pub fn new(
        name: impl Into<String>,
        entity_name: impl Into<String>,
        project_name: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_name: entity_name.into(),
            project_name,
        }
    }
}

/// A single job. Only `id` has a meaning on the agent side, every other field
/// belongs to the service's schema and is carried along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Job {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Versioned delta of a job set. When `complete` is set, `upsert_jobs` lists
/// every job of the set as of `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSetDiff {
    pub version: i64,
    pub complete: bool,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub upsert_jobs: Vec<Job>,
    #[serde(default)]
    pub remove_jobs: Vec<JobId>,
}

impl JobSetDiff {
    /// A diff that changes nothing, as returned when the set is unchanged since `version`.
    pub fn unchanged(version: i64) -> Self {
        Self {
            version,
            complete: false,
            metadata: Metadata::new(),
            upsert_jobs: Vec::new(),
            remove_jobs: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert_jobs.is_empty() && self.remove_jobs.is_empty()
    }
}

/// Initial description of a job set as returned by the lookup by spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSetDescriptor {
    pub id: JobSetId,
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The remote job-set service. Implementations own transport and auth; the
/// agent only relies on these five calls.
#[async_trait]
pub trait JobSetApi: Send + Sync {
    async fn get_job_set_by_spec(&self, spec: &JobSetSpec) -> anyhow::Result<JobSetDescriptor>;

    /// Changes since `version`. The agent id lets the service release leases
    /// held by this agent when needed.
    async fn get_job_set_diff_by_id(
        &self,
        job_set_id: &str,
        version: i64,
        agent_id: &str,
    ) -> anyhow::Result<JobSetDiff>;

    async fn lease_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<bool>;

    async fn ack_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
        run_name: &str,
    ) -> anyhow::Result<bool>;

    async fn fail_run_queue_item(
        &self,
        job_id: &str,
        message: &str,
        stage: &str,
        file_paths: Option<&[String]>,
    ) -> anyhow::Result<bool>;
}
