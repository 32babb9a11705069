//! Toolchain-agnostic projects: the definition's own `build` commands
//! populate `build/`, there is no built-in test runner.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{collect_build_dir, BuildStrategy, StrategyContext};
use crate::definition::ProjectType;
use crate::error::StrategyError;

pub struct GenericStrategy {
    project_type: ProjectType,
}

impl GenericStrategy {
    pub fn new(project_type: ProjectType) -> Self {
        Self { project_type }
    }
}

#[async_trait]
impl BuildStrategy for GenericStrategy {
    fn project_type(&self) -> ProjectType {
        self.project_type
    }

    async fn run_tests(&self, _ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        Err(StrategyError::Unsupported {
            project_type: self.project_type,
            operation: "run_tests",
        })
    }

    async fn run_benchmark_tests(&self, _ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        Err(StrategyError::Unsupported {
            project_type: self.project_type,
            operation: "run_benchmark_tests",
        })
    }

    async fn build_artifact(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf, StrategyError> {
        collect_build_dir(ctx.build_dir).await
    }
}
