//! Runtime knobs of the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Directory holding one workspace per execution.
    pub base_path: PathBuf,
    /// Upper bound for a single stage unless the definition overrides it.
    pub stage_timeout: Duration,
    /// Run executions of the same definition one at a time.
    pub serialize_runs: bool,
}

impl PipelineSettings {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./builds"),
            stage_timeout: Duration::from_secs(1800),
            serialize_runs: true,
        }
    }
}
