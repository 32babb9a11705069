//! Deployment fan-out.
//!
//! Three independent channels (local, email, remote) each walk their own
//! target list. Disabled targets are skipped. A failing target never stops
//! the others; failures are collected and returned to the orchestrator.

pub mod email;
pub mod local;
pub mod remote;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::definition::BuildDefinitionContent;
use crate::report::Reporter;

pub use email::{MailSender, SmtpMailer, SmtpSettings};
pub use remote::{RemoteConnector, RemoteSession, Ssh2Connector};

/// Where a remote deployment stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    Connect,
    Authenticate,
    PreDeployment,
    Transfer,
    PostDeployment,
}

impl fmt::Display for RemotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemotePhase::Connect => "connect",
            RemotePhase::Authenticate => "authenticate",
            RemotePhase::PreDeployment => "pre_deployment",
            RemotePhase::Transfer => "transfer",
            RemotePhase::PostDeployment => "post_deployment",
        })
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("local deployment to {path} failed: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("email deployment to {address} failed: {message}")]
    Email { address: String, message: String },

    #[error("remote deployment to {host} failed during {phase}: {message}")]
    Remote {
        host: String,
        phase: RemotePhase,
        message: String,
    },
}

impl DeployError {
    pub fn channel(&self) -> &'static str {
        match self {
            DeployError::Local { .. } => "local",
            DeployError::Email { .. } => "email",
            DeployError::Remote { .. } => "remote",
        }
    }
}

#[derive(Debug, Default)]
pub struct DeploymentSummary {
    pub succeeded: usize,
    pub failures: Vec<DeployError>,
}

impl DeploymentSummary {
    fn record(&mut self, result: Result<(), DeployError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => self.failures.push(e),
        }
    }

    fn merge(&mut self, other: DeploymentSummary) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The three deployment channels and their transports.
#[derive(Clone)]
pub struct Deployer {
    mailer: Option<Arc<dyn MailSender>>,
    connector: Arc<dyn RemoteConnector>,
}

impl Deployer {
    pub fn new(mailer: Option<Arc<dyn MailSender>>, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { mailer, connector }
    }

    pub async fn deploy(
        &self,
        artifact: &Path,
        content: &BuildDefinitionContent,
        reporter: &Reporter,
    ) -> DeploymentSummary {
        let (local, email, remote) = tokio::join!(
            self.deploy_local(artifact, content, reporter),
            self.deploy_email(artifact, content, reporter),
            self.deploy_remote(artifact, content, reporter),
        );

        let mut summary = DeploymentSummary::default();
        summary.merge(local);
        summary.merge(email);
        summary.merge(remote);
        summary
    }

    async fn deploy_local(
        &self,
        artifact: &Path,
        content: &BuildDefinitionContent,
        reporter: &Reporter,
    ) -> DeploymentSummary {
        let mut summary = DeploymentSummary::default();
        for target in content.deployments.local_deployments.iter().filter(|t| t.enabled) {
            let result = local::deploy(artifact, target).await;
            report_result(reporter, &format!("local deployment to {}", target.path), &result).await;
            summary.record(result);
        }
        summary
    }

    async fn deploy_email(
        &self,
        artifact: &Path,
        content: &BuildDefinitionContent,
        reporter: &Reporter,
    ) -> DeploymentSummary {
        let mut summary = DeploymentSummary::default();
        for target in content.deployments.email_deployments.iter().filter(|t| t.enabled) {
            let result = match &self.mailer {
                Some(mailer) => email::deploy(mailer.as_ref(), artifact, target, content).await,
                None => Err(DeployError::Email {
                    address: target.address.clone(),
                    message: "no mail transport configured".to_string(),
                }),
            };
            report_result(reporter, &format!("email deployment to {}", target.address), &result)
                .await;
            summary.record(result);
        }
        summary
    }

    async fn deploy_remote(
        &self,
        artifact: &Path,
        content: &BuildDefinitionContent,
        reporter: &Reporter,
    ) -> DeploymentSummary {
        let mut summary = DeploymentSummary::default();
        for target in content.deployments.remote_deployments.iter().filter(|t| t.enabled) {
            let (lines, result) =
                remote::deploy(self.connector.clone(), artifact.to_path_buf(), target.clone()).await;
            for line in lines {
                reporter.line(line).await;
            }
            report_result(reporter, &format!("remote deployment to {}", target.address()), &result)
                .await;
            summary.record(result);
        }
        summary
    }
}

async fn report_result(reporter: &Reporter, what: &str, result: &Result<(), DeployError>) {
    match result {
        Ok(()) => reporter.line(format!("{what} succeeded")).await,
        Err(e) => {
            tracing::warn!(channel = e.channel(), "{e}");
            crate::metrics::deployment_failed(e.channel());
            reporter.line(format!("{what} FAILED: {e}")).await;
        }
    }
}
