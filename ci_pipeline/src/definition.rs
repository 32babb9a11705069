//! Build definition document: typed model and parser.
//!
//! The raw document is YAML. Variables are substituted into the raw text
//! first (see [`crate::variables`]); only then is it decoded here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Ecosystem tag selecting the [`crate::strategy::BuildStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Go,
    Python,
    Node,
    /// Generic compiled project: the `build` commands alone fill `build/`.
    Compiled,
    /// Generic interpreted project: the `build` commands alone fill `build/`.
    Interpreted,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Go => "go",
            ProjectType::Python => "python",
            ProjectType::Node => "node",
            ProjectType::Compiled => "compiled",
            ProjectType::Interpreted => "interpreted",
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, ProjectType::Go | ProjectType::Compiled)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-control hosting provider named by `repository.hoster`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hoster {
    Bitbucket,
    GitHub,
    GitLab,
    Gitea,
    AzureDevOps,
    /// The repository URL is a directory on this machine; nothing is cloned.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown repository hoster `{0}`")]
pub struct UnknownHoster(pub String);

impl FromStr for Hoster {
    type Err = UnknownHoster;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitbucket" => Ok(Hoster::Bitbucket),
            "github" => Ok(Hoster::GitHub),
            "gitlab" => Ok(Hoster::GitLab),
            "gitea" => Ok(Hoster::Gitea),
            "azure_devops" | "azure-devops" | "azuredevops" => Ok(Hoster::AzureDevOps),
            "local" => Ok(Hoster::Local),
            _ => Err(UnknownHoster(s.to_string())),
        }
    }
}

impl Hoster {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hoster::Bitbucket => "bitbucket",
            Hoster::GitHub => "github",
            Hoster::GitLab => "gitlab",
            Hoster::Gitea => "gitea",
            Hoster::AzureDevOps => "azure_devops",
            Hoster::Local => "local",
        }
    }
}

impl fmt::Display for Hoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub hoster: String,
    #[serde(rename = "hoster_url")]
    pub url: String,
    /// Full name as the hoster reports it, e.g. `team/app`.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_secret: String,
    pub branch: String,
}

impl Repository {
    pub fn hoster(&self) -> Result<Hoster, UnknownHoster> {
        self.hoster.parse()
    }

    /// Last path segment of the full name (`team/app` → `app`).
    pub fn short_name(&self) -> &str {
        self.name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// ARM sub-version (`GOARM`), only meaningful with `arch: arm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm: Option<String>,
}

impl BuildTarget {
    pub fn is_windows(&self) -> bool {
        self.os
            .as_deref()
            .is_some_and(|os| os.eq_ignore_ascii_case("windows"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Run the strategy's own test runner after the `test` commands.
    #[serde(default)]
    pub language_tests: bool,
    /// Run the strategy's benchmark runner after the tests.
    #[serde(default)]
    pub benchmarks: bool,
    /// Report test-stage failures instead of failing the run.
    #[serde(default)]
    pub advisory_tests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDeployment {
    #[serde(default)]
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDeployment {
    #[serde(default)]
    pub enabled: bool,
    pub address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Sftp,
    Scp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDeployment {
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file on the build host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    pub working_directory: String,
    #[serde(default)]
    pub pre_deployment_steps: Vec<String>,
    #[serde(default)]
    pub post_deployment_steps: Vec<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl RemoteDeployment {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    #[serde(default)]
    pub local_deployments: Vec<LocalDeployment>,
    #[serde(default)]
    pub email_deployments: Vec<EmailDeployment>,
    #[serde(default)]
    pub remote_deployments: Vec<RemoteDeployment>,
}

impl Deployments {
    pub fn enabled_count(&self) -> usize {
        self.local_deployments.iter().filter(|d| d.enabled).count()
            + self.email_deployments.iter().filter(|d| d.enabled).count()
            + self.remote_deployments.iter().filter(|d| d.enabled).count()
    }
}

/// Parsed form of a build definition document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDefinitionContent {
    pub project_type: ProjectType,
    pub repository: Repository,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default)]
    pub pre_build: Vec<String>,
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub post_build: Vec<String>,
    #[serde(default)]
    pub deployments: Deployments,
    #[serde(default)]
    pub target: BuildTarget,
    #[serde(default)]
    pub options: PipelineOptions,
}

impl BuildDefinitionContent {
    /// Decode an already-substituted document.
    pub fn parse(document: &str) -> Result<Self, PipelineError> {
        let content: BuildDefinitionContent = serde_yaml::from_str(document)
            .map_err(|e| PipelineError::MalformedDefinition(e.to_string()))?;

        if content.build.iter().all(|cmd| cmd.trim().is_empty()) {
            return Err(PipelineError::MalformedDefinition(
                "`build` must contain at least one command".to_string(),
            ));
        }
        Ok(content)
    }

    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::MalformedDefinition(e.to_string()))
    }

    /// All stage commands in execution order. For display only.
    pub fn steps(&self) -> Vec<&str> {
        self.setup
            .iter()
            .chain(&self.test)
            .chain(&self.pre_build)
            .chain(&self.build)
            .chain(&self.post_build)
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
project_type: go
repository:
  hoster: github
  hoster_url: https://github.com/acme/Web-Server.git
  name: acme/Web-Server
  access_user: ci-bot
  access_secret: s3cret
  branch: main
setup:
  - go mod download
test:
  - go vet ./...
pre_build:
  - make generate
build:
  - make assets
post_build:
  - echo done
target:
  os: linux
  arch: arm
  arm: "7"
deployments:
  local_deployments:
    - enabled: true
      path: /srv/app/bin
  email_deployments:
    - address: ops@example.com
  remote_deployments:
    - enabled: true
      host: deploy.example.com
      user: deploy
      private_key: /home/ci/.ssh/id_ed25519
      working_directory: /opt/app
      pre_deployment_steps: ["systemctl stop app"]
      post_deployment_steps: ["systemctl start app"]
"#;

    #[test]
    fn parses_full_document() {
        let content = BuildDefinitionContent::parse(DOCUMENT).unwrap();

        assert_eq!(content.project_type, ProjectType::Go);
        assert_eq!(content.repository.hoster().unwrap(), Hoster::GitHub);
        assert_eq!(content.repository.url, "https://github.com/acme/Web-Server.git");
        assert_eq!(content.repository.short_name(), "Web-Server");
        assert_eq!(content.build, vec!["make assets"]);
        assert_eq!(content.target.arm.as_deref(), Some("7"));

        let deployments = &content.deployments;
        assert!(deployments.local_deployments[0].enabled);
        // enabled must be opted into
        assert!(!deployments.email_deployments[0].enabled);
        let remote = &deployments.remote_deployments[0];
        assert_eq!(remote.port, 22);
        assert_eq!(remote.connection_type, ConnectionType::Sftp);
        assert_eq!(remote.address(), "deploy.example.com:22");
        assert_eq!(deployments.enabled_count(), 2);
    }

    #[test]
    fn steps_follow_stage_order() {
        let content = BuildDefinitionContent::parse(DOCUMENT).unwrap();
        assert_eq!(
            content.steps(),
            vec![
                "go mod download",
                "go vet ./...",
                "make generate",
                "make assets",
                "echo done"
            ]
        );
    }

    #[test]
    fn serialized_content_parses_back_equal() {
        let content = BuildDefinitionContent::parse(DOCUMENT).unwrap();
        let yaml = content.to_yaml().unwrap();
        assert_eq!(BuildDefinitionContent::parse(&yaml).unwrap(), content);
    }

    #[test]
    fn missing_build_stage_is_malformed() {
        let doc = r#"
project_type: compiled
repository: {hoster: local, hoster_url: /src, name: app, branch: main}
build: []
"#;
        let err = BuildDefinitionContent::parse(doc).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDefinition(_)));
    }

    #[test]
    fn undecodable_document_is_malformed() {
        for doc in ["", "project_type: [", "project_type: cobol\nbuild: [x]"] {
            let err = BuildDefinitionContent::parse(doc).unwrap_err();
            assert!(matches!(err, PipelineError::MalformedDefinition(_)), "{doc:?}");
        }
    }

    #[test]
    fn hoster_tags() {
        assert_eq!("Azure_DevOps".parse::<Hoster>().unwrap(), Hoster::AzureDevOps);
        assert_eq!("gitea".parse::<Hoster>().unwrap(), Hoster::Gitea);
        assert_eq!(
            "sourceforge".parse::<Hoster>().unwrap_err(),
            UnknownHoster("sourceforge".to_string())
        );
    }

    #[test]
    fn windows_target_detection() {
        let target = BuildTarget {
            os: Some("Windows".to_string()),
            ..Default::default()
        };
        assert!(target.is_windows());
        assert!(!BuildTarget::default().is_windows());
    }
}
