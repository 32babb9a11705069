//! The transient Build entity, one per execution attempt.
//!
//! Owns the working directories `{base}/{definition_id}/{execution_id}/`
//! with `clone/`, `build/` and `artifact/` below it, and the status machine
//! `created → running → succeeded | failed | partially_succeeded`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    /// The build stage succeeded but at least one deployment target failed.
    PartiallySucceeded,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Created => "created",
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::PartiallySucceeded => "partially_succeeded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::PartiallySucceeded
        )
    }

    /// Transitions are one-way; no state is ever re-entered.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match self {
            BuildStatus::Created => next == BuildStatus::Running,
            BuildStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BuildStatus::Created),
            "running" => Ok(BuildStatus::Running),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "partially_succeeded" => Ok(BuildStatus::PartiallySucceeded),
            other => Err(format!("unknown build status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal build status transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: BuildStatus,
    pub to: BuildStatus,
}

static LAST_EXECUTION_ID: AtomicI64 = AtomicI64::new(0);

/// Wall-clock nanoseconds, bumped so ids are strictly increasing in-process.
fn next_execution_id(now: DateTime<Utc>) -> i64 {
    let candidate = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut last = LAST_EXECUTION_ID.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_EXECUTION_ID.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

#[derive(Debug)]
pub struct Build {
    definition_id: i64,
    execution_id: i64,
    root: PathBuf,
    status: BuildStatus,
    artifact: Option<PathBuf>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Build {
    pub fn new(base_path: &Path, definition_id: i64) -> Self {
        let started_at = Utc::now();
        let execution_id = next_execution_id(started_at);
        let base = if base_path.is_absolute() {
            base_path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(base_path))
                .unwrap_or_else(|_| base_path.to_path_buf())
        };

        Self {
            definition_id,
            execution_id,
            root: base
                .join(definition_id.to_string())
                .join(execution_id.to_string()),
            status: BuildStatus::Created,
            artifact: None,
            started_at,
            started: Instant::now(),
        }
    }

    pub fn definition_id(&self) -> i64 {
        self.definition_id
    }

    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clone_dir(&self) -> PathBuf {
        self.root.join("clone")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join("artifact")
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn set_artifact(&mut self, path: PathBuf) {
        self.artifact = Some(path);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn transition(&mut self, next: BuildStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Recreate the working directories, removing any stale tree first.
    pub async fn setup(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        for dir in [self.clone_dir(), self.build_dir(), self.artifact_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}
