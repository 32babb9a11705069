//! Server configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use shipyard_pipeline::deploy::SmtpSettings;
use shipyard_pipeline::PipelineSettings;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// Root of the per-execution working directories.
    pub workspace_dir: PathBuf,
    /// Per-stage timeout in seconds.
    pub stage_timeout_secs: u64,
    /// Queue runs of the same definition instead of overlapping them.
    pub serialize_runs: bool,
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub smtp_starttls: bool,
    /// SSH connect and I/O timeout in seconds.
    pub ssh_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl CiConfig {
    pub fn from_env() -> Self {
        let workspace_dir = std::env::var("CI_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./builds"));
        let github_webhook_secret = std::env::var("CI_WEBHOOK_SECRET").unwrap_or_default();
        let smtp_host = std::env::var("CI_SMTP_HOST").unwrap_or_default();
        let smtp_from =
            std::env::var("CI_SMTP_FROM").unwrap_or_else(|_| "shipyard@localhost".to_string());

        if github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- GitHub signature validation disabled");
        }
        if smtp_host.is_empty() {
            tracing::warn!("CI_SMTP_HOST not set -- email deployments disabled");
        }

        Self {
            workspace_dir,
            stage_timeout_secs: env_or("CI_STAGE_TIMEOUT", 1800),
            serialize_runs: env_or("CI_SERIALIZE_RUNS", true),
            github_webhook_secret,
            smtp_host,
            smtp_port: env_or("CI_SMTP_PORT", 587),
            smtp_user: std::env::var("CI_SMTP_USER").ok().filter(|s| !s.is_empty()),
            smtp_password: std::env::var("CI_SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_from,
            smtp_starttls: env_or("CI_SMTP_STARTTLS", true),
            ssh_timeout_secs: env_or("CI_SSH_TIMEOUT", 30),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            base_path: self.workspace_dir.clone(),
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            serialize_runs: self.serialize_runs,
        }
    }

    /// `None` when no SMTP host is configured.
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        if self.smtp_host.is_empty() {
            return None;
        }
        Some(SmtpSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_user.clone(),
            password: self.smtp_password.clone(),
            from: self.smtp_from.clone(),
            starttls: self.smtp_starttls,
        })
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }
}

#[cfg(test)]
impl CiConfig {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            workspace_dir: std::env::temp_dir().join("shipyard-tests"),
            stage_timeout_secs: 60,
            serialize_runs: true,
            github_webhook_secret: String::new(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            smtp_from: "shipyard@localhost".to_string(),
            smtp_starttls: true,
            ssh_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_is_disabled_without_host() {
        let mut config = CiConfig::for_tests();
        assert!(config.smtp_settings().is_none());

        config.smtp_host = "mail.example.com".to_string();
        let smtp = config.smtp_settings().unwrap();
        assert_eq!((smtp.host.as_str(), smtp.port), ("mail.example.com", 587));
    }

    #[test]
    fn pipeline_settings_follow_config() {
        let mut config = CiConfig::for_tests();
        config.stage_timeout_secs = 90;
        config.serialize_runs = false;
        let settings = config.pipeline_settings();
        assert_eq!(settings.stage_timeout, Duration::from_secs(90));
        assert!(!settings.serialize_runs);
    }
}
