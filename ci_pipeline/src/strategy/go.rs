//! Go modules: `go test`, `go test -bench`, and a stripped static binary.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{report_run, slugify, BuildStrategy, StrategyContext};
use crate::definition::{BuildTarget, ProjectType, Repository};
use crate::error::StrategyError;

pub struct GoStrategy;

/// Output binary name: slug of the repository's short name, `.exe` for Windows.
pub fn binary_name(repository: &Repository, target: &BuildTarget) -> String {
    let name = slugify(repository.short_name());
    if target.is_windows() {
        format!("{name}.exe")
    } else {
        name
    }
}

fn target_env(target: &BuildTarget) -> Vec<(&'static str, String)> {
    let mut env = vec![("CGO_ENABLED", "0".to_string())];
    if let Some(os) = &target.os {
        env.push(("GOOS", os.to_lowercase()));
    }
    if let Some(arch) = &target.arch {
        env.push(("GOARCH", arch.to_lowercase()));
    }
    if let Some(arm) = &target.arm {
        env.push(("GOARM", arm.clone()));
    }
    env
}

fn ldflags(built_at: DateTime<Utc>) -> String {
    format!(
        "-s -w -X main.buildTime={}",
        built_at.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

#[async_trait]
impl BuildStrategy for GoStrategy {
    fn project_type(&self) -> ProjectType {
        ProjectType::Go
    }

    async fn run_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        let output = ctx.exec.run("go", &["test", "-v", "./..."], &[]).await?;
        report_run(ctx.reporter, "go test -v ./...", &output).await;
        if !output.success() {
            return Err(StrategyError::TestFailure {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }

    async fn run_benchmark_tests(&self, ctx: &StrategyContext<'_>) -> Result<(), StrategyError> {
        let args = ["test", "-run=^$", "-bench=.", "-benchmem", "./..."];
        let output = ctx.exec.run("go", &args, &[]).await?;
        report_run(ctx.reporter, &format!("go {}", args.join(" ")), &output).await;
        if !output.success() {
            return Err(StrategyError::BenchmarkFailure {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }

    async fn build_artifact(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf, StrategyError> {
        let binary = ctx.build_dir.join(binary_name(ctx.repository, ctx.target));
        let binary_str = binary.to_string_lossy();
        let flags = ldflags(Utc::now());
        let args = ["build", "-trimpath", "-ldflags", flags.as_str(), "-o", &*binary_str, "."];

        let env = target_env(ctx.target);
        let output = ctx.exec.run("go", &args, &env).await?;
        let shown_env: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        report_run(
            ctx.reporter,
            &format!("{} go build -trimpath -ldflags \"{flags}\" -o {binary_str} .", shown_env.join(" ")),
            &output,
        )
        .await;

        if !output.success() {
            return Err(StrategyError::BuildFailure {
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(binary)
    }
}
