// SPDX-License-Identifier: MIT
// jobset-replay: run a launch agent job set against a recorded replay
//
// - Serves the recorded diffs through the regular JobSet sync loop.
// - Prints a JSON snapshot of the jobs after every update.
// - Optionally leases and acks jobs the way an agent would.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::executor::block_on;
use log::{info, warn};
use serde_json::json;

use launch_agent::api::JobSetSpec;
use launch_agent::replay::{ReplayApi, ReplayFile};
use launch_agent::{create_job_set, BackgroundRuntime, ErrorPolicyKind, JobSet, JobSetConfig, SyncExit};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Replay file (JSON) to serve diffs from
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Replay document as base64-encoded JSON. Note that this excludes --file.
    #[arg(long = "replay-base64", value_name = "BASE64")]
    replay_base64: Option<String>,

    /// Job set name (defaults to the name recorded in the replay)
    #[arg(long)]
    name: Option<String>,

    /// Entity owning the job set
    #[arg(long, default_value = "replay")]
    entity: String,

    /// Project of the job set
    #[arg(long)]
    project: Option<String>,

    /// Agent identity used for leases
    #[arg(long = "agent-id", default_value = "replay-agent")]
    agent_id: String,

    /// Upper bound between two polls in milliseconds
    #[arg(long = "poll-interval-ms", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// What to do when fetching a diff fails
    #[arg(long = "error-policy", value_enum, default_value_t)]
    error_policy: ErrorPolicyKind,

    /// Lease and ack every job as soon as it shows up
    #[arg(long)]
    lease: bool,
}

fn validate_args(args: &Args) -> Result<(), String> {
    match (&args.file, &args.replay_base64) {
        (Some(_), None) | (None, Some(_)) => {}
        (None, None) => {
            return Err("one of --file or --replay-base64 is required".into());
        }
        (Some(_), Some(_)) => {
            return Err("--file and --replay-base64 may not be used together".into());
        }
    }

    if args.poll_interval_ms == 0 {
        return Err("--poll-interval-ms must be greater than 0".into());
    }

    if args.agent_id.trim().is_empty() {
        return Err("--agent-id must not be empty".into());
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let replay = match (&args.file, &args.replay_base64) {
        (Some(path), None) => ReplayFile::from_path(path)?,
        (None, Some(encoded)) => ReplayFile::from_base64(encoded)?,
        _ => unreachable!("validate_args enforces mutual exclusion"),
    };

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| replay.job_set.name.clone());
    let spec = JobSetSpec::new(name, args.entity.clone(), args.project.clone());
    let api = Arc::new(ReplayApi::new(replay));
    let config = JobSetConfig::new(args.agent_id.clone())
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_shared_error_policy(args.error_policy.into_policy());

    let mut runtime = BackgroundRuntime::new();
    let job_set = block_on(create_job_set(spec, api.clone(), config))
        .context("failed to open job set")?;

    info!("Starting replay of job set {} ({})", job_set.name(), job_set.id());
    job_set.start_sync_loop(&runtime)?;

    let outcome = block_on(follow(&job_set, &api, args.lease, &mut std::io::stdout().lock()));

    job_set.stop_sync_loop()?;
    let exit = block_on(job_set.wait_for_done());
    runtime.wait_until_finished();

    let mutations = api.mutations();
    while let Ok(mutation) = mutations.try_recv() {
        info!("Replay recorded {:?}", mutation);
    }

    outcome?;
    match exit {
        SyncExit::Stopped => {
            info!("Stopping jobset-replay");
            Ok(())
        }
        SyncExit::Failed(reason) => {
            eprintln!("Error: sync loop failed: {reason}");
            std::process::exit(1);
        }
    }
}

/// Prints every update until the replay runs dry or the loop dies.
async fn follow<W: Write>(
    job_set: &JobSet,
    api: &ReplayApi,
    lease: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    if job_set.ready_or_exit().await.is_err() {
        return Ok(());
    }

    let mut attempted: HashSet<String> = HashSet::new();
    loop {
        // read before printing: once set, every recorded diff is already applied
        let exhausted = api.is_exhausted();
        print_snapshot(job_set, out)?;
        if lease {
            lease_new_jobs(job_set, &mut attempted).await;
        }
        if exhausted {
            info!("Replay exhausted at version {}", job_set.job_set_diff_version());
            return Ok(());
        }
        if job_set.next_update_or_exit().await.is_err() {
            return Ok(());
        }
    }
}

fn print_snapshot<W: Write>(job_set: &JobSet, out: &mut W) -> anyhow::Result<()> {
    let snapshot = job_set.snapshot();
    let jobs: BTreeMap<_, _> = snapshot.jobs.into_iter().collect();
    let document = json!({
        "jobSet": job_set.name(),
        "version": snapshot.version,
        "metadata": snapshot.metadata,
        "jobs": jobs,
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

async fn lease_new_jobs(job_set: &JobSet, attempted: &mut HashSet<String>) {
    let mut job_ids: Vec<String> = job_set.jobs().into_keys().collect();
    job_ids.sort();

    for job_id in job_ids {
        if !attempted.insert(job_id.clone()) {
            continue;
        }
        match job_set.lease_job(&job_id).await {
            Ok(true) => {
                let run_name = format!("replay-run-{job_id}");
                match job_set.ack_job(&job_id, &run_name).await {
                    Ok(true) => info!("Leased and acked job {job_id} as {run_name}"),
                    Ok(false) => warn!("Ack of job {job_id} was refused"),
                    Err(e) => warn!("{e}"),
                }
            }
            Ok(false) => info!("Lease of job {job_id} was refused"),
            Err(e) => warn!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("jobset-replay").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn needs_exactly_one_replay_source() {
        assert!(validate_args(&parse(&[])).is_err());
        assert!(validate_args(&parse(&["--file", "a.json", "--replay-base64", "e30="])).is_err());
        assert!(validate_args(&parse(&["--file", "a.json"])).is_ok());
        assert!(validate_args(&parse(&["--replay-base64", "e30="])).is_ok());
    }

    #[test]
    fn rejects_zero_interval_and_blank_agent() {
        assert!(validate_args(&parse(&["--file", "a.json", "--poll-interval-ms", "0"])).is_err());
        assert!(validate_args(&parse(&["--file", "a.json", "--agent-id", " "])).is_err());
    }

    fn printed_documents(out: &[u8]) -> Vec<serde_json::Value> {
        serde_json::Deserializer::from_slice(out)
            .into_iter::<serde_json::Value>()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn follow_prints_the_final_version_when_leasing() {
        let replay = ReplayFile::from_json(
            &json!({
                "jobSet": {"id": "js-1", "name": "gpu-queue"},
                "diffs": [
                    {"version": 1, "complete": true,
                     "upsertJobs": [{"id": "a"}, {"id": "b"}, {"id": "c"}, {"id": "d"}]},
                    {"version": 2, "complete": false,
                     "upsertJobs": [{"id": "e"}], "removeJobs": ["a"]}
                ]
            })
            .to_string(),
        )
        .unwrap();

        for _ in 0..10 {
            let api = Arc::new(ReplayApi::new(replay.clone()));
            let job_set = launch_agent::JobSet::new(
                api.clone(),
                api.descriptor().clone(),
                JobSetConfig::new("agent-1").with_poll_interval(Duration::from_millis(5)),
            );
            let mut pool = futures::executor::LocalPool::new();
            job_set.start_sync_loop(&pool.spawner()).unwrap();

            let mut out = Vec::new();
            pool.run_until(follow(&job_set, &api, true, &mut out)).unwrap();

            let documents = printed_documents(&out);
            let last = documents.last().unwrap();
            assert_eq!(last["version"], json!(2));
            let mut ids: Vec<&String> = last["jobs"].as_object().unwrap().keys().collect();
            ids.sort();
            assert_eq!(ids, vec!["b", "c", "d", "e"]);

            let leased: Vec<String> = std::iter::from_fn(|| api.mutations().try_recv().ok())
                .filter_map(|mutation| match mutation {
                    launch_agent::replay::Mutation::Lease {
                        job_id,
                        granted: true,
                        ..
                    } => Some(job_id),
                    _ => None,
                })
                .collect();
            assert!(leased.contains(&"e".to_string()), "{leased:?}");

            job_set.stop_sync_loop().unwrap();
            pool.run_until(job_set.wait_for_done());
        }
    }

    #[test]
    fn printed_version_matches_printed_jobs() {
        let replay = ReplayFile::from_json(
            &json!({
                "jobSet": {"id": "js-1", "name": "gpu-queue"},
                "diffs": [{"version": 3, "complete": true, "upsertJobs": [{"id": "a"}]}]
            })
            .to_string(),
        )
        .unwrap();
        let api = Arc::new(ReplayApi::new(replay));
        let job_set = launch_agent::JobSet::new(
            api.clone(),
            api.descriptor().clone(),
            JobSetConfig::new("agent-1"),
        );

        let mut out = Vec::new();
        print_snapshot(&job_set, &mut out).unwrap();
        let mut pool = futures::executor::LocalPool::new();
        job_set.start_sync_loop(&pool.spawner()).unwrap();
        pool.run_until(job_set.ready());
        print_snapshot(&job_set, &mut out).unwrap();

        let documents = printed_documents(&out);
        assert_eq!(documents[0]["version"], json!(-1));
        assert_eq!(documents[0]["jobs"], json!({}));
        assert_eq!(documents[1]["version"], json!(3));
        assert_eq!(documents[1]["jobs"]["a"], json!({"id": "a"}));

        job_set.stop_sync_loop().unwrap();
        pool.run_until(job_set.wait_for_done());
    }

    #[test]
    fn error_policy_defaults_to_terminate() {
        let args = parse(&["--file", "a.json", "--error-policy", "backoff"]);
        assert_eq!(args.error_policy, ErrorPolicyKind::Backoff);
        assert_eq!(parse(&["--file", "a.json"]).error_policy, ErrorPolicyKind::Terminate);
    }
}
