use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use shipyard_pipeline::definition::{ConnectionType, RemoteDeployment};
use shipyard_pipeline::deploy::{
    DeployError, Deployer, RemoteConnector, RemotePhase, RemoteSession,
};
use shipyard_pipeline::{BuildStatus, BuildStore, MemoryStore, Pipeline, PipelineSettings, Trigger};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Accepts every host except `unreachable`; records uploads. Steps named
/// `slow-step` take two seconds.
#[derive(Default)]
struct FakeConnector {
    uploads: Arc<Mutex<Vec<String>>>,
}

struct FakeSession {
    uploads: Arc<Mutex<Vec<String>>>,
}

impl RemoteSession for FakeSession {
    fn exec(&mut self, command: &str) -> Result<(i32, String), String> {
        if command.ends_with("slow-step") {
            std::thread::sleep(std::time::Duration::from_secs(2));
        }
        Ok((0, String::new()))
    }

    fn upload(&mut self, _local: &Path, remote: &str, _via: ConnectionType) -> Result<(), String> {
        self.uploads.lock().unwrap().push(remote.to_string());
        Ok(())
    }

    fn close(&mut self) {}
}

impl RemoteConnector for FakeConnector {
    fn connect(&self, target: &RemoteDeployment) -> Result<Box<dyn RemoteSession>, DeployError> {
        if target.host == "unreachable" {
            return Err(DeployError::Remote {
                host: target.address(),
                phase: RemotePhase::Connect,
                message: "connection refused".to_string(),
            });
        }
        Ok(Box::new(FakeSession {
            uploads: self.uploads.clone(),
        }))
    }
}

struct Harness {
    _tmp: TempDir,
    root: std::path::PathBuf,
    store: Arc<MemoryStore>,
    pipeline: Pipeline,
    connector: Arc<FakeConnector>,
}

impl Harness {
    fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    fn with_shutdown(shutdown: CancellationToken) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir(root.join("src")).unwrap();

        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(FakeConnector::default());
        let deployer = Deployer::new(None, connector.clone());
        let pipeline = Pipeline::new(
            PipelineSettings::new(root.join("builds")),
            store.clone(),
            deployer,
            shutdown,
        );
        Self {
            _tmp: tmp,
            root,
            store,
            pipeline,
            connector,
        }
    }

    fn document(&self, build: &str, deployments: &str) -> String {
        format!(
            r#"
project_type: compiled
repository:
  hoster: local
  hoster_url: {src}
  name: acme/app
  branch: main
build:
  - {build}
deployments:
{deployments}
"#,
            src = self.root.join("src").display(),
        )
    }

    async fn run(&self, document: &str) -> shipyard_pipeline::BuildExecution {
        let definition = self
            .store
            .insert_definition("app", document, 1, None)
            .await;
        self.pipeline
            .run(definition, Trigger::Manual { user_id: 1 })
            .await
            .unwrap()
    }
}

const PRODUCE_APP: &str = r#"sh -c 'printf built > "$BUILD_DIR/app"'"#;

#[tokio::test]
async fn compiled_project_is_built_packaged_and_deployed() {
    let h = Harness::new();
    let out = h.root.join("out").join("app");
    let doc = h.document(
        &format!("\"{}\"", PRODUCE_APP.replace('"', "\\\"")),
        &format!(
            "  local_deployments:\n    - enabled: true\n      path: {}",
            out.display()
        ),
    );

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Succeeded, "{}", record.report);
    assert_eq!(record.user_id, Some(1));
    let artifact = record.artifact_path.clone().unwrap();
    assert!(artifact.ends_with("artifact/app.zip"));

    let deployed = std::fs::read(&out).unwrap();
    assert_eq!(deployed, std::fs::read(&artifact).unwrap());

    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(deployed)).unwrap();
    let mut inner = String::new();
    zip.by_name("app").unwrap().read_to_string(&mut inner).unwrap();
    assert_eq!(inner, "built");

    for header in ["==> workspace", "==> build", "==> package", "==> deploy"] {
        assert!(record.report.contains(header), "missing {header}");
    }
    assert!(record.report.contains("local deployment to"));
    assert!(record.report.ends_with("build finished: succeeded\n"));

    // persisted exactly once
    assert_eq!(h.store.executions(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failing_build_command_fails_the_run_with_its_output() {
    let h = Harness::new();
    let doc = h.document(r#""sh -c 'echo compile error: missing semicolon; exit 3'""#, "  {}");

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(record.report.contains("compile error: missing semicolon"));
    assert!(record.report.contains("exited with code 3"));
    assert!(!record.report.contains("==> package"));
    assert!(record.artifact_path.is_none());
}

#[tokio::test]
async fn one_unreachable_remote_target_partially_succeeds() {
    let h = Harness::new();
    let remotes = "  remote_deployments:
    - enabled: true
      host: unreachable
      user: deploy
      working_directory: /srv/app
    - enabled: true
      host: good.example.com
      user: deploy
      working_directory: /srv/app
      post_deployment_steps: [\"systemctl restart app\"]";
    let doc = h.document(&format!("\"{}\"", PRODUCE_APP.replace('"', "\\\"")), remotes);

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::PartiallySucceeded, "{}", record.report);
    assert!(record
        .report
        .contains("remote deployment to unreachable:22 FAILED"));
    assert!(record
        .report
        .contains("remote deployment to good.example.com:22 succeeded"));
    assert_eq!(
        *h.connector.uploads.lock().unwrap(),
        vec!["/srv/app/app.zip".to_string()]
    );
}

#[tokio::test]
async fn disabled_targets_are_skipped() {
    let h = Harness::new();
    let out = h.root.join("never");
    let doc = h.document(
        &format!("\"{}\"", PRODUCE_APP.replace('"', "\\\"")),
        &format!("  local_deployments:\n    - path: {}", out.display()),
    );

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Succeeded);
    assert!(record.report.contains("no deployment targets enabled"));
    assert!(!out.exists());
}

#[tokio::test]
async fn user_variables_are_substituted_before_parsing() {
    let h = Harness::new();
    let out = h.root.join("via-variable");
    h.store
        .insert_variable(Some(1), "out_path", &out.display().to_string(), false)
        .await;
    let doc = h.document(
        &format!("\"{}\"", PRODUCE_APP.replace('"', "\\\"")),
        "  local_deployments:\n    - enabled: true\n      path: ${out_path}",
    );

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Succeeded, "{}", record.report);
    assert!(out.exists());
}

#[tokio::test]
async fn malformed_definition_is_recorded_as_failed() {
    let h = Harness::new();
    let record = h.run("project_type: [not, a, type]").await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(record.report.contains("malformed build definition"));
}

#[tokio::test]
async fn shutdown_cancels_before_the_first_stage() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let h = Harness::with_shutdown(shutdown);
    let doc = h.document(&format!("\"{}\"", PRODUCE_APP.replace('"', "\\\"")), "  {}");

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(record.report.contains("pipeline cancelled at workspace"));
}

fn produce_app() -> String {
    format!("\"{}\"", PRODUCE_APP.replace('"', "\\\""))
}

const FAILING_TEST: &str = "test:\n  - \"sh -c 'echo 2 tests failed; exit 1'\"\n";

#[tokio::test]
async fn failing_test_stage_fails_the_run_by_default() {
    let h = Harness::new();
    let doc = h.document(&produce_app(), "  {}") + FAILING_TEST;

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(record.report.contains("2 tests failed"));
    assert!(record.report.contains("ERROR: test command"));
    assert!(!record.report.contains("==> build"));
}

#[tokio::test]
async fn advisory_tests_only_warn() {
    let h = Harness::new();
    let doc = h.document(&produce_app(), "  {}")
        + FAILING_TEST
        + "options:\n  advisory_tests: true\n";

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Succeeded, "{}", record.report);
    assert!(record.report.contains("WARNING: test stage failed, continuing"));
    assert!(record.report.contains("==> package"));
}

#[tokio::test]
async fn definition_stage_timeout_overrides_the_default() {
    let h = Harness::new();
    let doc = h.document(&produce_app(), "  {}")
        + "setup:\n  - \"sleep 5\"\noptions:\n  stage_timeout_secs: 1\n";

    let started = std::time::Instant::now();
    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(
        record.report.contains("ERROR: setup timed out after 1s"),
        "{}",
        record.report
    );
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn language_tests_on_a_generic_project_are_unsupported() {
    let h = Harness::new();
    let doc = h.document(&produce_app(), "  {}") + "options:\n  language_tests: true\n";

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(
        record.report.contains(
            "ERROR: test stage failed: run_tests is not supported for project type `compiled`"
        ),
        "{}",
        record.report
    );
    assert!(!record.report.contains("==> pre_build"));
}

#[tokio::test]
async fn deploy_stage_runs_under_the_stage_timeout() {
    let h = Harness::new();
    let remotes = "  remote_deployments:
    - enabled: true
      host: slow.example.com
      user: deploy
      working_directory: /srv/app
      post_deployment_steps: [slow-step]";
    let doc = h.document(&produce_app(), remotes) + "options:\n  stage_timeout_secs: 1\n";

    let record = h.run(&doc).await;

    assert_eq!(record.status, BuildStatus::Failed);
    assert!(
        record.report.contains("ERROR: deploy timed out after 1s"),
        "{}",
        record.report
    );
}
