// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use futures::executor::block_on;
use launch_agent::replay::{Mutation, ReplayApi, ReplayFile};
use launch_agent::{BackgroundRuntime, JobSet, JobSetConfig, SyncExit};
use launch_agent_tests::fixtures::fixture_path;
use serde_json::json;

fn load_fixture() -> Arc<ReplayApi> {
    let file = ReplayFile::from_path(&fixture_path("gpu-queue.json"))
        .unwrap_or_else(|e| panic!("failed to load fixture: {e:#}"));
    Arc::new(ReplayApi::new(file))
}

#[test]
fn test_replay_fixture_end_state() {
    let api = load_fixture();
    let descriptor = api.descriptor().clone();
    let job_set = JobSet::new(
        api.clone(),
        descriptor,
        JobSetConfig::new("agent-1").with_poll_interval(Duration::from_millis(10)),
    );

    let mut runtime = BackgroundRuntime::new();
    job_set.start_sync_loop(&runtime).unwrap();

    block_on(async {
        job_set.ready().await;
        while !api.is_exhausted() {
            job_set.wait_for_update().await;
        }
    });

    assert_eq!(job_set.job_set_diff_version(), 4);
    let mut ids: Vec<String> = job_set.jobs().into_keys().collect();
    ids.sort();
    assert_eq!(ids, vec!["rq-2", "rq-3"]);
    assert_eq!(
        job_set.job("rq-2").and_then(|job| job.get("state").cloned()),
        Some(json!("CLAIMED"))
    );
    assert_eq!(job_set.metadata().get("@max_concurrency"), Some(&json!(4)));

    job_set.stop_sync_loop().unwrap();
    assert_eq!(block_on(job_set.wait_for_done()), SyncExit::Stopped);
    runtime.wait_until_finished();
}

#[test]
fn test_replay_arbitrates_leases_between_agents() {
    let api = load_fixture();
    let descriptor = api.descriptor().clone();
    let first = JobSet::new(api.clone(), descriptor.clone(), JobSetConfig::new("agent-1"));
    let second = JobSet::new(api.clone(), descriptor, JobSetConfig::new("agent-2"));
    let mutations = api.mutations();

    let mut runtime = BackgroundRuntime::new();
    first.start_sync_loop(&runtime).unwrap();
    block_on(first.ready());

    block_on(async {
        assert!(first.lease_job("rq-1").await.unwrap());
        assert!(!second.lease_job("rq-1").await.unwrap());
        assert!(!second.ack_job("rq-1", "run-stolen").await.unwrap());
        assert!(first.ack_job("rq-1", "run-rq-1").await.unwrap());

        let logs = vec!["/var/log/launch/rq-1.log".to_string()];
        assert!(second
            .fail_job("rq-2", "image pull failed", "agent", Some(&logs))
            .await
            .unwrap());
    });

    first.stop_sync_loop().unwrap();
    block_on(first.wait_for_done());
    runtime.wait_until_finished();

    let recorded: Vec<Mutation> = std::iter::from_fn(|| mutations.try_recv().ok()).collect();
    assert_eq!(
        recorded,
        vec![
            Mutation::Lease {
                job_id: "rq-1".into(),
                agent_id: "agent-1".into(),
                granted: true
            },
            Mutation::Lease {
                job_id: "rq-1".into(),
                agent_id: "agent-2".into(),
                granted: false
            },
            Mutation::Ack {
                job_id: "rq-1".into(),
                agent_id: "agent-2".into(),
                run_name: "run-stolen".into(),
                accepted: false
            },
            Mutation::Ack {
                job_id: "rq-1".into(),
                agent_id: "agent-1".into(),
                run_name: "run-rq-1".into(),
                accepted: true
            },
            Mutation::Fail {
                job_id: "rq-2".into(),
                message: "image pull failed".into(),
                stage: "agent".into(),
                file_paths: vec!["/var/log/launch/rq-1.log".into()],
            },
        ]
    );
}
