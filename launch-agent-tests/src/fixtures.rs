// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;

use jobset_api::{Job, JobSetDescriptor, JobSetDiff, Metadata};

pub fn descriptor(id: &str, name: &str) -> JobSetDescriptor {
    JobSetDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        metadata: Metadata::new(),
    }
}

/// Incremental diff upserting bare jobs with the given ids.
pub fn diff(version: i64, upserts: &[&str], removals: &[&str]) -> JobSetDiff {
    JobSetDiff {
        version,
        complete: false,
        metadata: Metadata::new(),
        upsert_jobs: upserts.iter().map(|id| Job::new(*id)).collect(),
        remove_jobs: removals.iter().map(|id| id.to_string()).collect(),
    }
}

pub fn full_snapshot(version: i64, upserts: &[&str]) -> JobSetDiff {
    JobSetDiff {
        complete: true,
        ..diff(version, upserts, &[])
    }
}

/// Path of a file below this crate's `fixtures/` directory.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}
