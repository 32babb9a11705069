//! Single-branch checkout of the definition's repository.

use std::path::{Path, PathBuf};

use url::Url;

use crate::command::{CommandError, ExecContext};
use crate::definition::{Hoster, Repository};
use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::report::Reporter;

/// Identity used when a secret is configured without a user.
const PLACEHOLDER_USER: &str = "git";

/// Remote URL with credentials injected when an access secret is set.
pub fn authenticated_url(repository: &Repository) -> Result<String, PipelineError> {
    if repository.access_secret.is_empty() {
        return Ok(repository.url.clone());
    }

    let mut url = Url::parse(&repository.url).map_err(|e| {
        PipelineError::Clone(format!(
            "credentials need an http(s) remote URL, got `{}`: {e}",
            repository.url
        ))
    })?;
    let user = if repository.access_user.is_empty() {
        PLACEHOLDER_USER
    } else {
        repository.access_user.as_str()
    };
    url.set_username(user)
        .and_then(|_| url.set_password(Some(&repository.access_secret)))
        .map_err(|_| {
            PipelineError::Clone(format!("cannot attach credentials to `{}`", repository.url))
        })?;
    Ok(url.to_string())
}

/// Check the configured branch out into `dest`.
///
/// Returns the directory the remaining stages should run in: `dest`, or the
/// configured path itself for the `local` hoster.
pub async fn checkout(
    repository: &Repository,
    dest: &Path,
    exec: &ExecContext,
    reporter: &Reporter,
) -> Result<PathBuf, PipelineError> {
    let hoster = repository
        .hoster()
        .map_err(|e| PipelineError::Clone(e.to_string()))?;

    if hoster == Hoster::Local {
        let source = PathBuf::from(&repository.url);
        if !source.is_dir() {
            return Err(PipelineError::Clone(format!(
                "local source `{}` is not a directory",
                source.display()
            )));
        }
        reporter
            .line(format!("using local source {}", source.display()))
            .await;
        return Ok(source);
    }

    let remote = authenticated_url(repository)?;
    let dest_str = dest.to_string_lossy();
    reporter
        .line(format!(
            "$ git clone --single-branch --branch {} {} {}",
            repository.branch, repository.url, dest_str
        ))
        .await;

    let args = [
        "clone",
        "--single-branch",
        "--branch",
        repository.branch.as_str(),
        remote.as_str(),
        &*dest_str,
    ];
    let output = exec
        .run("git", &args, &[("GIT_TERMINAL_PROMPT", "0".to_string())])
        .await
        .map_err(|e| match e {
            CommandError::Cancelled => PipelineError::Cancelled(Stage::Clone),
            e => PipelineError::Clone(e.to_string()),
        })?;

    let text = redact(&output.output, &repository.access_secret);
    reporter.block(&text).await;
    if !output.success() {
        return Err(PipelineError::Clone(format!(
            "git exited with code {}",
            output.exit_code
        )));
    }
    Ok(dest.to_path_buf())
}

/// `secret` as it appears in the userinfo of the remote URL.
fn encoded_secret(secret: &str) -> Option<String> {
    let mut url = Url::parse("https://redacted.invalid").ok()?;
    url.set_password(Some(secret)).ok()?;
    url.password().map(str::to_string)
}

/// Mask the secret both verbatim and percent-encoded, since git echoes the
/// remote URL back in its errors.
fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    let mut masked = text.to_string();
    if let Some(encoded) = encoded_secret(secret).filter(|e| e != secret) {
        masked = masked.replace(&encoded, "*****");
    }
    masked.replace(secret, "*****")
}
