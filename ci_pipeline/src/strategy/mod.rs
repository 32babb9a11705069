//! Language build strategies, one per project type.
//!
//! Each strategy runs the ecosystem's tests and benchmarks against the
//! checked-out source and produces the build output inside `build/`.
//! Operations a strategy cannot perform fail with
//! [`StrategyError::Unsupported`] instead of silently succeeding.

mod generic;
mod go;
mod script;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::command::{CommandOutput, ExecContext};
use crate::definition::{BuildTarget, ProjectType, Repository};
use crate::error::StrategyError;
use crate::report::Reporter;

pub use generic::GenericStrategy;
pub use go::GoStrategy;
pub use script::ScriptStrategy;

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Everything a strategy needs from the running build.
pub struct StrategyContext<'a> {
    /// Runs in the checked-out source directory.
    pub exec: &'a ExecContext,
    pub repository: &'a Repository,
    pub target: &'a BuildTarget,
    pub build_dir: &'a Path,
    pub reporter: &'a Reporter,
}

#[async_trait]
pub trait BuildStrategy: Send + Sync {
    fn project_type(&self) -> ProjectType;

    async fn run_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError>;

    async fn run_benchmark_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError>;

    /// Produce the build output and return its path.
    async fn build_artifact(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf, StrategyError>;
}

pub fn for_project(project_type: ProjectType) -> Box<dyn BuildStrategy> {
    match project_type {
        ProjectType::Go => Box::new(GoStrategy),
        ProjectType::Python | ProjectType::Node => Box::new(ScriptStrategy::new(project_type)),
        ProjectType::Compiled | ProjectType::Interpreted => {
            Box::new(GenericStrategy::new(project_type))
        }
    }
}

/// Lower-case, runs of anything but `[a-z0-9]` collapsed to one `-`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = NON_ALPHANUMERIC.replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "app".to_string()
    } else {
        slug.to_string()
    }
}

/// Echo a tool invocation and its output into the report.
async fn report_run(reporter: &Reporter, invocation: &str, output: &CommandOutput) {
    reporter.line(format!("$ {invocation}")).await;
    reporter.block(&output.output).await;
}

/// The build stage's commands are expected to have filled `build/`.
async fn collect_build_dir(build_dir: &Path) -> Result<PathBuf, StrategyError> {
    let mut entries = tokio::fs::read_dir(build_dir)
        .await
        .map_err(|_| StrategyError::NoOutput(build_dir.display().to_string()))?;
    match entries.next_entry().await {
        Ok(Some(_)) => Ok(build_dir.to_path_buf()),
        _ => Err(StrategyError::NoOutput(build_dir.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Web-Server"), "web-server");
        assert_eq!(slugify("My  Cool__App!!"), "my-cool-app");
        assert_eq!(slugify("--edge--"), "edge");
        assert_eq!(slugify("###"), "app");
    }

    #[test]
    fn strategies_match_project_types() {
        for project_type in [
            ProjectType::Go,
            ProjectType::Python,
            ProjectType::Node,
            ProjectType::Compiled,
            ProjectType::Interpreted,
        ] {
            assert_eq!(for_project(project_type).project_type(), project_type);
        }
    }
}
