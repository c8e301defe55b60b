// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use jobset_api::{
    JobSetApi, JobSetDescriptor, JobSetDiff, JobSetSpec, NO_DIFF_VERSION,
};

/// A mutation the fake service received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lease {
        job_set_id: String,
        job_id: String,
        agent_id: String,
    },
    Ack {
        job_set_id: String,
        job_id: String,
        agent_id: String,
        run_name: String,
    },
    Fail {
        job_id: String,
        message: String,
        stage: String,
        file_paths: Option<Vec<String>>,
    },
}

#[derive(Debug)]
struct FetchLog {
    cursors: Vec<i64>,
    last_version: i64,
}

/// Fake job-set service answering fetches from a script.
///
/// Once the script runs out every fetch returns an unchanged diff. A gated
/// service makes every fetch wait for one permit on the gate channel.
#[derive(Debug)]
pub struct ScriptedApi {
    descriptor: JobSetDescriptor,
    responses: Mutex<VecDeque<Result<JobSetDiff, String>>>,
    fetches: Mutex<FetchLog>,
    gate: Option<Receiver<()>>,
    lease_answer: AtomicBool,
    ack_answer: AtomicBool,
    fail_answer: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedApi {
    pub fn new(descriptor: JobSetDescriptor) -> Self {
        Self::build(descriptor, None)
    }

    pub fn gated(descriptor: JobSetDescriptor) -> (Self, Sender<()>) {
        let (tx, rx) = async_channel::unbounded();
        (Self::build(descriptor, Some(rx)), tx)
    }

    fn build(descriptor: JobSetDescriptor, gate: Option<Receiver<()>>) -> Self {
        Self {
            descriptor,
            responses: Mutex::new(VecDeque::new()),
            fetches: Mutex::new(FetchLog {
                cursors: Vec::new(),
                last_version: NO_DIFF_VERSION,
            }),
            gate,
            lease_answer: AtomicBool::new(true),
            ack_answer: AtomicBool::new(true),
            fail_answer: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn descriptor(&self) -> JobSetDescriptor {
        self.descriptor.clone()
    }

    pub fn push_diff(&self, diff: JobSetDiff) {
        self.responses.lock().unwrap().push_back(Ok(diff));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Err(message.into()));
    }

    pub fn set_lease_answer(&self, answer: bool) {
        self.lease_answer.store(answer, Ordering::SeqCst);
    }

    pub fn set_ack_answer(&self, answer: bool) {
        self.ack_answer.store(answer, Ordering::SeqCst);
    }

    pub fn set_fail_answer(&self, answer: bool) {
        self.fail_answer.store(answer, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().cursors.len()
    }

    /// Cursor sent with every fetch so far, in order.
    pub fn cursors(&self) -> Vec<i64> {
        self.fetches.lock().unwrap().cursors.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSetApi for ScriptedApi {
    async fn get_job_set_by_spec(&self, spec: &JobSetSpec) -> anyhow::Result<JobSetDescriptor> {
        if spec.name != self.descriptor.name {
            anyhow::bail!("job set {} not found", spec.name);
        }
        Ok(self.descriptor.clone())
    }

    async fn get_job_set_diff_by_id(
        &self,
        _job_set_id: &str,
        version: i64,
        _agent_id: &str,
    ) -> anyhow::Result<JobSetDiff> {
        if let Some(gate) = &self.gate {
            gate.recv()
                .await
                .map_err(|_| anyhow::anyhow!("fetch gate closed"))?;
        }

        let response = self.responses.lock().unwrap().pop_front();
        let mut fetches = self.fetches.lock().unwrap();
        fetches.cursors.push(version);
        match response {
            Some(Ok(diff)) => {
                fetches.last_version = fetches.last_version.max(diff.version);
                Ok(diff)
            }
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(JobSetDiff::unchanged(fetches.last_version.max(version))),
        }
    }

    async fn lease_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<bool> {
        self.calls.lock().unwrap().push(Call::Lease {
            job_set_id: job_set_id.to_string(),
            job_id: job_id.to_string(),
            agent_id: agent_id.to_string(),
        });
        Ok(self.lease_answer.load(Ordering::SeqCst))
    }

    async fn ack_job_set_item(
        &self,
        job_set_id: &str,
        job_id: &str,
        agent_id: &str,
        run_name: &str,
    ) -> anyhow::Result<bool> {
        self.calls.lock().unwrap().push(Call::Ack {
            job_set_id: job_set_id.to_string(),
            job_id: job_id.to_string(),
            agent_id: agent_id.to_string(),
            run_name: run_name.to_string(),
        });
        Ok(self.ack_answer.load(Ordering::SeqCst))
    }

    async fn fail_run_queue_item(
        &self,
        job_id: &str,
        message: &str,
        stage: &str,
        file_paths: Option<&[String]>,
    ) -> anyhow::Result<bool> {
        self.calls.lock().unwrap().push(Call::Fail {
            job_id: job_id.to_string(),
            message: message.to_string(),
            stage: stage.to_string(),
            file_paths: file_paths.map(<[String]>::to_vec),
        });
        Ok(self.fail_answer.load(Ordering::SeqCst))
    }
}
