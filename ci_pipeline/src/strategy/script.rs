//! Interpreted ecosystems with a conventional test runner.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{collect_build_dir, report_run, BuildStrategy, StrategyContext};
use crate::definition::ProjectType;
use crate::error::StrategyError;

pub struct ScriptStrategy {
    project_type: ProjectType,
}

impl ScriptStrategy {
    pub fn new(project_type: ProjectType) -> Self {
        Self { project_type }
    }

    fn test_command(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self.project_type {
            ProjectType::Python => Some(("python3", &["-m", "pytest"][..])),
            ProjectType::Node => Some(("npm", &["test"][..])),
            _ => None,
        }
    }

    fn bench_command(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self.project_type {
            ProjectType::Node => Some(("npm", &["run", "bench"][..])),
            _ => None,
        }
    }
}

#[async_trait]
impl BuildStrategy for ScriptStrategy {
    fn project_type(&self) -> ProjectType {
        self.project_type
    }

    async fn run_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        let (program, args) = self.test_command().ok_or(StrategyError::Unsupported {
            project_type: self.project_type,
            operation: "run_tests",
        })?;
        let output = ctx.exec.run(program, args, &[]).await?;
        report_run(ctx.reporter, &format!("{program} {}", args.join(" ")), &output).await;
        if !output.success() {
            return Err(StrategyError::TestFailure {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }

    async fn run_benchmark_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        let (program, args) = self.bench_command().ok_or(StrategyError::Unsupported {
            project_type: self.project_type,
            operation: "run_benchmark_tests",
        })?;
        let output = ctx.exec.run(program, args, &[]).await?;
        report_run(ctx.reporter, &format!("{program} {}", args.join(" ")), &output).await;
        if !output.success() {
            return Err(StrategyError::BenchmarkFailure {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }

    async fn build_artifact(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf, StrategyError> {
        collect_build_dir(ctx.build_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runners_per_ecosystem() {
        let python = ScriptStrategy::new(ProjectType::Python);
        assert_eq!(python.test_command().unwrap().0, "python3");
        assert!(python.bench_command().is_none());

        let node = ScriptStrategy::new(ProjectType::Node);
        assert_eq!(node.test_command().unwrap(), ("npm", &["test"][..]));
        assert_eq!(node.bench_command().unwrap().1, &["run", "bench"]);
    }
}
