//! SSH deployment: pre steps, upload (SFTP or SCP), post steps.
//!
//! Every target opens its own session. The ssh2 bindings are blocking, so
//! the whole exchange runs on the blocking pool.
//!
//! The connect timeout covers TCP connect, handshake and authentication
//! only; deployment steps and uploads are bounded by the stage timeout.
//!
//! Host keys are accepted as presented. The deployment host is trusted to be
//! the one named in the definition, as with `StrictHostKeyChecking=no`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;

use super::{DeployError, RemotePhase};
use crate::definition::{ConnectionType, RemoteDeployment};

/// An authenticated session on a deployment host.
pub trait RemoteSession: Send {
    /// Run `command` and return its exit code with combined output.
    fn exec(&mut self, command: &str) -> Result<(i32, String), String>;

    fn upload(&mut self, local: &Path, remote: &str, via: ConnectionType) -> Result<(), String>;

    fn close(&mut self);
}

/// Opens sessions; failures carry the connect or authenticate phase.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, target: &RemoteDeployment) -> Result<Box<dyn RemoteSession>, DeployError>;
}

pub struct Ssh2Connector {
    timeout: Duration,
}

impl Ssh2Connector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn remote_error(
    target: &RemoteDeployment,
    phase: RemotePhase,
    message: impl ToString,
) -> DeployError {
    DeployError::Remote {
        host: target.address(),
        phase,
        message: message.to_string(),
    }
}

impl RemoteConnector for Ssh2Connector {
    fn connect(&self, target: &RemoteDeployment) -> Result<Box<dyn RemoteSession>, DeployError> {
        let connect_err = |e: &dyn std::fmt::Display| remote_error(target, RemotePhase::Connect, e);

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(&e))?
            .next()
            .ok_or_else(|| connect_err(&"host did not resolve"))?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| connect_err(&e))?;

        let mut session = Session::new().map_err(|e| connect_err(&e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(|e| connect_err(&e))?;

        let auth = match (&target.private_key, &target.password) {
            (Some(key), _) => session.userauth_pubkey_file(
                &target.user,
                None,
                Path::new(key),
                target.passphrase.as_deref(),
            ),
            (None, Some(password)) => session.userauth_password(&target.user, password),
            (None, None) => session.userauth_agent(&target.user),
        };
        auth.map_err(|e| remote_error(target, RemotePhase::Authenticate, e))?;
        if !session.authenticated() {
            return Err(remote_error(
                target,
                RemotePhase::Authenticate,
                "server rejected credentials",
            ));
        }
        clear_io_timeout(&session);

        Ok(Box::new(Ssh2Session { session }))
    }
}

/// Long-running steps may stay silent for minutes; stop timing out reads.
fn clear_io_timeout(session: &Session) {
    session.set_timeout(0);
}

struct Ssh2Session {
    session: Session,
}

impl Ssh2Session {
    fn scp(&self, local: &Path, remote: &str, file: &mut File) -> io::Result<()> {
        let size = file.metadata()?.len();
        let mut channel = self
            .session
            .scp_send(Path::new(remote), 0o644, size, None)?;
        io::copy(file, &mut channel)?;
        channel.flush()?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;
        tracing::debug!(local = %local.display(), remote, "Uploaded over scp");
        Ok(())
    }

    fn sftp(&self, local: &Path, remote: &str, file: &mut File) -> io::Result<()> {
        let sftp = self.session.sftp()?;
        let mut handle = sftp.create(Path::new(remote))?;
        io::copy(file, &mut handle)?;
        tracing::debug!(local = %local.display(), remote, "Uploaded over sftp");
        Ok(())
    }
}

impl RemoteSession for Ssh2Session {
    fn exec(&mut self, command: &str) -> Result<(i32, String), String> {
        let run = || -> io::Result<(i32, String)> {
            let mut channel = self.session.channel_session()?;
            channel.exec(command)?;
            let mut output = String::new();
            channel.read_to_string(&mut output)?;
            channel.stderr().read_to_string(&mut output)?;
            channel.wait_close()?;
            Ok((channel.exit_status()?, output))
        };
        run().map_err(|e| e.to_string())
    }

    fn upload(&mut self, local: &Path, remote: &str, via: ConnectionType) -> Result<(), String> {
        let mut file = File::open(local).map_err(|e| e.to_string())?;
        match via {
            ConnectionType::Sftp => self.sftp(local, remote, &mut file),
            ConnectionType::Scp => self.scp(local, remote, &mut file),
        }
        .map_err(|e| e.to_string())
    }

    fn close(&mut self) {
        let _ = self.session.disconnect(None, "deployment finished", None);
    }
}

/// Remote path the artifact is uploaded to.
fn remote_path(working_directory: &str, artifact: &Path) -> String {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    format!("{}/{name}", working_directory.trim_end_matches('/'))
}

fn in_working_directory(working_directory: &str, step: &str) -> String {
    format!("cd {} && {step}", shell_words::quote(working_directory))
}

fn run_steps(
    session: &mut dyn RemoteSession,
    target: &RemoteDeployment,
    steps: &[String],
    phase: RemotePhase,
    lines: &mut Vec<String>,
) -> Result<(), DeployError> {
    for step in steps {
        lines.push(format!("[{}] $ {step}", target.host));
        let (exit_code, output) = session
            .exec(&in_working_directory(&target.working_directory, step))
            .map_err(|e| remote_error(target, phase, e))?;
        if !output.trim().is_empty() {
            lines.push(output.trim_end().to_string());
        }
        if exit_code != 0 {
            return Err(remote_error(
                target,
                phase,
                format!("`{step}` exited with code {exit_code}"),
            ));
        }
    }
    Ok(())
}

fn deploy_blocking(
    connector: &dyn RemoteConnector,
    artifact: &Path,
    target: &RemoteDeployment,
    lines: &mut Vec<String>,
) -> Result<(), DeployError> {
    let mut session = connector.connect(target)?;

    let result = (|| {
        run_steps(
            session.as_mut(),
            target,
            &target.pre_deployment_steps,
            RemotePhase::PreDeployment,
            lines,
        )?;

        let remote = remote_path(&target.working_directory, artifact);
        lines.push(format!(
            "[{}] upload {} -> {remote}",
            target.host,
            artifact.display()
        ));
        session
            .upload(artifact, &remote, target.connection_type)
            .map_err(|e| remote_error(target, RemotePhase::Transfer, e))?;

        run_steps(
            session.as_mut(),
            target,
            &target.post_deployment_steps,
            RemotePhase::PostDeployment,
            lines,
        )
    })();

    session.close();
    result
}

/// Deploy to one remote target. Returns the report lines produced along the
/// way together with the outcome.
pub async fn deploy(
    connector: Arc<dyn RemoteConnector>,
    artifact: PathBuf,
    target: RemoteDeployment,
) -> (Vec<String>, Result<(), DeployError>) {
    let host = target.address();
    let joined = tokio::task::spawn_blocking(move || {
        let mut lines = Vec::new();
        let result = deploy_blocking(connector.as_ref(), &artifact, &target, &mut lines);
        (lines, result)
    })
    .await;

    match joined {
        Ok(outcome) => outcome,
        Err(e) => (
            Vec::new(),
            Err(DeployError::Remote {
                host,
                phase: RemotePhase::Connect,
                message: format!("deployment task failed: {e}"),
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        commands: Vec<String>,
        uploads: Vec<(String, ConnectionType)>,
        closed: usize,
    }

    struct FakeSession {
        journal: Arc<Mutex<Journal>>,
        failing_command: Option<&'static str>,
    }

    impl RemoteSession for FakeSession {
        fn exec(&mut self, command: &str) -> Result<(i32, String), String> {
            self.journal.lock().unwrap().commands.push(command.to_string());
            match self.failing_command {
                Some(needle) if command.contains(needle) => Ok((3, "boom".to_string())),
                _ => Ok((0, "ok".to_string())),
            }
        }

        fn upload(&mut self, _local: &Path, remote: &str, via: ConnectionType) -> Result<(), String> {
            self.journal.lock().unwrap().uploads.push((remote.to_string(), via));
            Ok(())
        }

        fn close(&mut self) {
            self.journal.lock().unwrap().closed += 1;
        }
    }

    struct FakeConnector {
        journal: Arc<Mutex<Journal>>,
        failing_command: Option<&'static str>,
    }

    impl FakeConnector {
        fn new(failing_command: Option<&'static str>) -> Self {
            Self {
                journal: Arc::default(),
                failing_command,
            }
        }
    }

    impl RemoteConnector for FakeConnector {
        fn connect(&self, target: &RemoteDeployment) -> Result<Box<dyn RemoteSession>, DeployError> {
            if target.host == "unreachable" {
                return Err(remote_error(target, RemotePhase::Connect, "connection refused"));
            }
            Ok(Box::new(FakeSession {
                journal: self.journal.clone(),
                failing_command: self.failing_command,
            }))
        }
    }

    fn target(host: &str) -> RemoteDeployment {
        RemoteDeployment {
            enabled: true,
            host: host.to_string(),
            port: 22,
            connection_type: ConnectionType::Scp,
            user: "deploy".to_string(),
            password: Some("pw".to_string()),
            private_key: None,
            passphrase: None,
            working_directory: "/opt/my app/".to_string(),
            pre_deployment_steps: vec!["systemctl stop app".to_string()],
            post_deployment_steps: vec!["systemctl start app".to_string()],
        }
    }

    #[test]
    fn remote_path_joins_file_name() {
        assert_eq!(
            remote_path("/opt/app/", Path::new("/b/artifact/app.zip")),
            "/opt/app/app.zip"
        );
    }

    #[tokio::test]
    async fn runs_steps_around_upload_in_order() {
        let connector = Arc::new(FakeConnector::new(None));
        let (lines, result) = deploy(
            connector.clone(),
            PathBuf::from("/b/artifact/app.zip"),
            target("deploy.example.com"),
        )
        .await;

        result.unwrap();
        let journal = connector.journal.lock().unwrap();
        assert_eq!(
            journal.commands,
            vec![
                "cd '/opt/my app/' && systemctl stop app",
                "cd '/opt/my app/' && systemctl start app",
            ]
        );
        assert_eq!(
            journal.uploads,
            vec![("/opt/my app/app.zip".to_string(), ConnectionType::Scp)]
        );
        assert_eq!(journal.closed, 1);
        assert!(lines.iter().any(|l| l == "[deploy.example.com] $ systemctl stop app"));
    }

    #[tokio::test]
    async fn failing_pre_step_skips_transfer_and_closes() {
        let connector = Arc::new(FakeConnector::new(Some("stop")));
        let (_, result) = deploy(
            connector.clone(),
            PathBuf::from("/b/app.zip"),
            target("deploy.example.com"),
        )
        .await;

        match result {
            Err(DeployError::Remote { phase, .. }) => assert_eq!(phase, RemotePhase::PreDeployment),
            other => panic!("unexpected {other:?}"),
        }
        let journal = connector.journal.lock().unwrap();
        assert!(journal.uploads.is_empty());
        assert_eq!(journal.closed, 1);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_failure() {
        let connector = Arc::new(FakeConnector::new(None));
        let (lines, result) =
            deploy(connector, PathBuf::from("/b/app.zip"), target("unreachable")).await;
        assert!(lines.is_empty());
        assert!(matches!(
            result,
            Err(DeployError::Remote {
                phase: RemotePhase::Connect,
                ..
            })
        ));
    }

    #[test]
    fn authenticated_session_has_no_io_timeout() {
        let session = Session::new().unwrap();
        session.set_timeout(30_000);
        assert_eq!(session.timeout(), 30_000);

        clear_io_timeout(&session);
        assert_eq!(session.timeout(), 0);
    }
}
