//! Pipeline error taxonomy.
//!
//! Every variant of [`PipelineError`] is fatal to a run: remaining stages are
//! skipped but the execution record is still written. Deployment errors live
//! in [`crate::deploy::DeployError`] and only downgrade the final status.

use thiserror::Error;

use crate::command::CommandError;
use crate::definition::ProjectType;
use crate::packager::PackagingError;
use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed build definition: {0}")]
    MalformedDefinition(String),

    #[error("cannot load definition inputs: {0}")]
    Store(String),

    #[error("workspace setup failed at {path}: {source}")]
    Setup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("clone failed: {0}")]
    Clone(String),

    #[error("{stage} command `{command}` exited with code {exit_code}")]
    StageCommand {
        stage: Stage,
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("{stage} command `{command}` could not run: {source}")]
    Command {
        stage: Stage,
        command: String,
        #[source]
        source: CommandError,
    },

    #[error("test stage failed: {0}")]
    Test(StrategyError),

    #[error("build failed: {0}")]
    Build(#[from] StrategyError),

    #[error("packaging failed: {0}")]
    Packaging(#[from] PackagingError),

    #[error("pipeline cancelled at {0}")]
    Cancelled(Stage),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },
}

/// Failures raised by a language build strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("tests failed (exit code {exit_code})")]
    TestFailure { exit_code: i32, output: String },

    #[error("benchmarks failed (exit code {exit_code})")]
    BenchmarkFailure { exit_code: i32, output: String },

    #[error("toolchain build failed (exit code {exit_code})")]
    BuildFailure { exit_code: i32, output: String },

    #[error("{operation} is not supported for project type `{project_type}`")]
    Unsupported {
        project_type: ProjectType,
        operation: &'static str,
    },

    #[error("build stage produced no output in {0}")]
    NoOutput(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl StrategyError {
    /// Captured tool output, if the failure came from a finished process.
    pub fn output(&self) -> Option<&str> {
        match self {
            StrategyError::TestFailure { output, .. }
            | StrategyError::BenchmarkFailure { output, .. }
            | StrategyError::BuildFailure { output, .. } => Some(output),
            _ => None,
        }
    }
}
