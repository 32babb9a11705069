//! The build orchestrator.
//!
//! One [`Pipeline`] is built at start-up and shared by every trigger. Each
//! run walks the fixed stage sequence, stops at the first fatal error, and
//! always persists exactly one execution record with the collected report.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::build::{Build, BuildStatus};
use crate::command::{CommandError, ExecContext};
use crate::definition::BuildDefinitionContent;
use crate::deploy::{Deployer, DeploymentSummary};
use crate::error::PipelineError;
use crate::packager::{self, PackagingError};
use crate::report::{ReportCollector, Reporter};
use crate::settings::PipelineSettings;
use crate::store::{BuildDefinition, BuildExecution, BuildStore, NewBuildExecution};
use crate::strategy::{self, BuildStrategy, StrategyContext};
use crate::{git, metrics, variables};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Workspace,
    Clone,
    Setup,
    Test,
    PreBuild,
    Build,
    PostBuild,
    Package,
    Deploy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Workspace => "workspace",
            Stage::Clone => "clone",
            Stage::Setup => "setup",
            Stage::Test => "test",
            Stage::PreBuild => "pre_build",
            Stage::Build => "build",
            Stage::PostBuild => "post_build",
            Stage::Package => "package",
            Stage::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Webhook,
    Manual { user_id: i64 },
}

impl Trigger {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Trigger::Webhook => None,
            Trigger::Manual { user_id } => Some(*user_id),
        }
    }
}

/// One async mutex per definition id.
#[derive(Default)]
struct DefinitionLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl DefinitionLocks {
    async fn acquire(&self, definition_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(definition_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    store: Arc<dyn BuildStore>,
    deployer: Deployer,
    shutdown: CancellationToken,
    locks: DefinitionLocks,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn BuildStore>,
        deployer: Deployer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            store,
            deployer,
            shutdown,
            locks: DefinitionLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    /// Substitute the creator's variables into the raw document and parse it.
    pub async fn resolve_content(
        &self,
        definition: &BuildDefinition,
    ) -> Result<BuildDefinitionContent, PipelineError> {
        let variables = self
            .store
            .variables_for(definition.created_by)
            .await
            .map_err(|e| PipelineError::Store(format!("{e:#}")))?;
        let document = variables::substitute_user_variables(&definition.content, &variables);
        BuildDefinitionContent::parse(&document)
    }

    /// Run in the background; the caller does not wait for the outcome.
    pub fn dispatch(
        self: &Arc<Self>,
        definition: BuildDefinition,
        trigger: Trigger,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let definition_id = definition.id;
            if let Err(e) = pipeline.run(definition, trigger).await {
                tracing::error!(definition_id, "Failed to record build execution: {e:#}");
            }
        })
    }

    /// Run the full pipeline and persist its record.
    ///
    /// Build failures end up in the record; an error is only returned when
    /// the record itself cannot be written.
    pub async fn run(
        &self,
        definition: BuildDefinition,
        trigger: Trigger,
    ) -> anyhow::Result<BuildExecution> {
        let _serial = if self.settings.serialize_runs {
            Some(self.locks.acquire(definition.id).await)
        } else {
            None
        };

        let mut build = Build::new(&self.settings.base_path, definition.id);
        let cancel = self.shutdown.child_token();
        let collector = ReportCollector::start();
        let reporter = collector.reporter();

        if let Err(e) = build.transition(BuildStatus::Running) {
            tracing::error!("{e}");
        }
        tracing::info!(
            definition_id = definition.id,
            execution_id = build.execution_id(),
            trigger = ?trigger,
            "Build started"
        );
        reporter
            .line(format!(
                "build {} of `{}` started at {}",
                build.execution_id(),
                definition.caption,
                build.started_at().to_rfc3339()
            ))
            .await;

        let outcome = self.execute(&mut build, &definition, &cancel, &reporter).await;
        let status = match outcome {
            Ok(summary) if summary.is_clean() => BuildStatus::Succeeded,
            Ok(summary) => {
                tracing::warn!(
                    definition_id = definition.id,
                    failed = summary.failures.len(),
                    "Deployment targets failed"
                );
                BuildStatus::PartiallySucceeded
            }
            Err(e) => {
                tracing::warn!(
                    definition_id = definition.id,
                    execution_id = build.execution_id(),
                    "Build failed: {e}"
                );
                reporter.line(format!("ERROR: {e}")).await;
                BuildStatus::Failed
            }
        };

        reporter.line(format!("build finished: {status}")).await;
        drop(reporter);
        let report = collector.finish().await;

        if let Err(e) = build.transition(status) {
            tracing::error!("{e}");
        }
        let elapsed = build.elapsed();
        metrics::build_finished(status, elapsed);
        tracing::info!(
            definition_id = definition.id,
            execution_id = build.execution_id(),
            status = %status,
            duration_ms = elapsed.as_millis() as u64,
            "Build finished"
        );

        self.store
            .create_execution(NewBuildExecution {
                definition_id: definition.id,
                user_id: trigger.user_id(),
                report,
                status,
                artifact_path: build.artifact().map(|p| p.display().to_string()),
                execution_time: elapsed.as_secs_f64(),
                executed_at: build.started_at(),
            })
            .await
    }

    async fn execute(
        &self,
        build: &mut Build,
        definition: &BuildDefinition,
        cancel: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<DeploymentSummary, PipelineError> {
        let content = self.resolve_content(definition).await?;
        let limit = content
            .options
            .stage_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.stage_timeout);

        checkpoint(cancel, Stage::Workspace)?;
        reporter.stage(Stage::Workspace).await;
        build.setup().await.map_err(|source| PipelineError::Setup {
            path: build.root().display().to_string(),
            source,
        })?;
        reporter
            .line(format!("workspace {}", build.root().display()))
            .await;

        checkpoint(cancel, Stage::Clone)?;
        reporter.stage(Stage::Clone).await;
        let clone_dir = build.clone_dir();
        let checkout_exec = ExecContext::new(build.root(), cancel.clone());
        let source_dir = timed(
            Stage::Clone,
            limit,
            git::checkout(&content.repository, &clone_dir, &checkout_exec, reporter),
        )
        .await?;

        let build_dir = build.build_dir();
        let exec = stage_env(build, &content, &source_dir, cancel);
        let strategy = strategy::for_project(content.project_type);
        let ctx = StrategyContext {
            exec: &exec,
            repository: &content.repository,
            target: &content.target,
            build_dir: &build_dir,
            reporter,
        };

        checkpoint(cancel, Stage::Setup)?;
        reporter.stage(Stage::Setup).await;
        timed(
            Stage::Setup,
            limit,
            run_commands(Stage::Setup, &content.setup, &exec, reporter),
        )
        .await?;

        checkpoint(cancel, Stage::Test)?;
        reporter.stage(Stage::Test).await;
        let tested = timed(
            Stage::Test,
            limit,
            test_stage(&content, strategy.as_ref(), &ctx),
        )
        .await;
        match tested {
            Err(e) if content.options.advisory_tests && !is_interruption(&e) => {
                tracing::warn!(definition_id = definition.id, "Advisory test failure: {e}");
                reporter
                    .line(format!("WARNING: test stage failed, continuing: {e}"))
                    .await;
            }
            other => other?,
        }

        checkpoint(cancel, Stage::PreBuild)?;
        reporter.stage(Stage::PreBuild).await;
        timed(
            Stage::PreBuild,
            limit,
            run_commands(Stage::PreBuild, &content.pre_build, &exec, reporter),
        )
        .await?;

        checkpoint(cancel, Stage::Build)?;
        reporter.stage(Stage::Build).await;
        let output = timed(Stage::Build, limit, async {
            run_commands(Stage::Build, &content.build, &exec, reporter).await?;
            Ok::<_, PipelineError>(strategy.build_artifact(&ctx).await?)
        })
        .await?;
        reporter
            .line(format!("build output in {}", output.display()))
            .await;

        checkpoint(cancel, Stage::PostBuild)?;
        reporter.stage(Stage::PostBuild).await;
        timed(
            Stage::PostBuild,
            limit,
            run_commands(Stage::PostBuild, &content.post_build, &exec, reporter),
        )
        .await?;

        checkpoint(cancel, Stage::Package)?;
        reporter.stage(Stage::Package).await;
        let archive = build.artifact_dir().join(format!(
            "{}.zip",
            strategy::slugify(content.repository.short_name())
        ));
        let artifact = timed(Stage::Package, limit, package(build_dir.clone(), archive)).await?;
        reporter
            .line(format!("artifact {}", artifact.display()))
            .await;
        build.set_artifact(artifact.clone());

        checkpoint(cancel, Stage::Deploy)?;
        reporter.stage(Stage::Deploy).await;
        if content.deployments.enabled_count() == 0 {
            reporter.line("no deployment targets enabled").await;
            return Ok(DeploymentSummary::default());
        }
        let summary = timed(Stage::Deploy, limit, async {
            let summary = self.deployer.deploy(&artifact, &content, reporter).await;
            Ok::<_, PipelineError>(summary)
        })
        .await?;
        reporter
            .line(format!(
                "deployments: {} succeeded, {} failed",
                summary.succeeded,
                summary.failures.len()
            ))
            .await;
        Ok(summary)
    }
}

fn checkpoint(cancel: &CancellationToken, next: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled(next))
    } else {
        Ok(())
    }
}

fn is_interruption(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::Cancelled(_) | PipelineError::Timeout { .. }
    )
}

/// Environment shared by every stage command of a run.
fn stage_env(
    build: &Build,
    content: &BuildDefinitionContent,
    source_dir: &std::path::Path,
    cancel: &CancellationToken,
) -> ExecContext {
    let path = |p: PathBuf| p.to_string_lossy().into_owned();
    ExecContext::new(source_dir, cancel.clone())
        .with_env("BUILD_DIR", path(build.build_dir()))
        .with_env("ARTIFACT_DIR", path(build.artifact_dir()))
        .with_env("CLONE_DIR", path(source_dir.to_path_buf()))
        .with_env("DEFINITION_ID", build.definition_id().to_string())
        .with_env("EXECUTION_ID", build.execution_id().to_string())
        .with_env("BRANCH", content.repository.branch.clone())
}

async fn timed<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PipelineError::Timeout {
            stage,
            secs: limit.as_secs(),
        })?;
    metrics::stage_duration(stage.as_str(), started.elapsed());
    result
}

async fn run_commands(
    stage: Stage,
    commands: &[String],
    exec: &ExecContext,
    reporter: &Reporter,
) -> Result<(), PipelineError> {
    for command in commands {
        reporter.line(format!("$ {command}")).await;
        let output = exec.run_line(command).await.map_err(|source| match source {
            CommandError::Cancelled => PipelineError::Cancelled(stage),
            source => PipelineError::Command {
                stage,
                command: command.clone(),
                source,
            },
        })?;
        reporter.block(&output.output).await;
        if !output.success() {
            return Err(PipelineError::StageCommand {
                stage,
                command: command.clone(),
                exit_code: output.exit_code,
                output: output.output,
            });
        }
    }
    Ok(())
}

async fn test_stage(
    content: &BuildDefinitionContent,
    strategy: &dyn BuildStrategy,
    ctx: &StrategyContext<'_>,
) -> Result<(), PipelineError> {
    run_commands(Stage::Test, &content.test, ctx.exec, ctx.reporter).await?;
    if content.options.language_tests {
        strategy.run_tests(ctx).await.map_err(PipelineError::Test)?;
    }
    if content.options.benchmarks {
        strategy
            .run_benchmark_tests(ctx)
            .await
            .map_err(PipelineError::Test)?;
    }
    Ok(())
}

async fn package(source: PathBuf, archive: PathBuf) -> Result<PathBuf, PipelineError> {
    let packed = tokio::task::spawn_blocking(move || packager::package_directory(&source, &archive))
        .await
        .map_err(|e| PackagingError::Io(io::Error::other(e)))?;
    Ok(packed?)
}
