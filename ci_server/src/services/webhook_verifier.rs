//! Per-provider validation of inbound push notifications.
//!
//! Checks the provider's required headers, decodes the JSON body once and
//! compares the pushed repository and branch against the definition.

use axum::http::HeaderMap;
use serde_json::Value;
use thiserror::Error;

use shipyard_pipeline::definition::UnknownHoster;
use shipyard_pipeline::{BuildDefinitionContent, Hoster};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("missing required header `{0}`")]
    MissingHeader(&'static str),

    #[error("cannot decode webhook payload: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    #[error("payload field `{0}` is missing or not a string")]
    MissingField(&'static str),

    #[error("repository mismatch: expected `{expected}`, got `{actual}`")]
    RepositoryMismatch { expected: String, actual: String },

    #[error("branch mismatch: expected `{expected}`, got `{actual}`")]
    BranchMismatch { expected: String, actual: String },

    #[error(transparent)]
    UnknownHoster(#[from] UnknownHoster),

    #[error("webhook signature does not match")]
    InvalidSignature,
}

impl VerificationError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::MissingHeader(_) => "missing_header",
            VerificationError::PayloadDecode(_) => "payload_decode",
            VerificationError::MissingField(_) => "missing_field",
            VerificationError::RepositoryMismatch { .. } => "repository_mismatch",
            VerificationError::BranchMismatch { .. } => "branch_mismatch",
            VerificationError::UnknownHoster(_) => "unknown_hoster",
            VerificationError::InvalidSignature => "invalid_signature",
        }
    }
}

/// Where a provider puts the fields the verifier compares.
struct ProviderRules {
    headers: &'static [&'static str],
    /// JSON pointer to the branch.
    branch: &'static str,
    /// JSON pointer to the repository full name.
    repository: &'static str,
}

fn rules(hoster: Hoster) -> Option<ProviderRules> {
    let rules = match hoster {
        Hoster::Bitbucket => ProviderRules {
            headers: &["X-Event-Key", "X-Hook-UUID", "X-Request-UUID", "X-Attempt-Number"],
            branch: "/push/changes/0/new/name",
            repository: "/repository/full_name",
        },
        Hoster::GitHub => ProviderRules {
            headers: &["X-GitHub-Delivery", "X-GitHub-Event", "X-Hub-Signature"],
            branch: "/repository/default_branch",
            repository: "/repository/full_name",
        },
        Hoster::GitLab => ProviderRules {
            headers: &["X-GitLab-Event"],
            branch: "/ref",
            repository: "/project/path_with_namespace",
        },
        Hoster::Gitea => ProviderRules {
            headers: &["X-Gitea-Delivery", "X-Gitea-Event"],
            branch: "/ref",
            repository: "/repository/full_name",
        },
        Hoster::AzureDevOps => ProviderRules {
            headers: &["X-Request-Type"],
            branch: "/resource/refUpdates/0/name",
            repository: "/resource/repository/name",
        },
        Hoster::Local => return None,
    };
    Some(rules)
}

fn field<'a>(payload: &'a Value, pointer: &'static str) -> Result<&'a str, VerificationError> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or(VerificationError::MissingField(pointer))
}

/// Third `/`-separated piece of a ref, keeping any further slashes:
/// `refs/heads/feature/x` is `feature/x`.
fn ref_branch(git_ref: &str) -> &str {
    git_ref.splitn(3, '/').nth(2).unwrap_or_default()
}

/// Verify a webhook request against the definition it targets.
pub fn verify(
    content: &BuildDefinitionContent,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), VerificationError> {
    let repository = &content.repository;
    let hoster = repository.hoster()?;
    let rules = rules(hoster).ok_or_else(|| UnknownHoster(repository.hoster.clone()))?;

    for header in rules.headers {
        if !headers.contains_key(*header) {
            return Err(VerificationError::MissingHeader(*header));
        }
    }

    let payload: Value = serde_json::from_slice(body)?;

    let actual_repository = field(&payload, rules.repository)?;
    if actual_repository != repository.name {
        return Err(VerificationError::RepositoryMismatch {
            expected: repository.name.clone(),
            actual: actual_repository.to_string(),
        });
    }

    let raw_branch = field(&payload, rules.branch)?;
    let (expected, actual) = match hoster {
        Hoster::GitLab | Hoster::Gitea => (repository.branch.clone(), ref_branch(raw_branch)),
        Hoster::AzureDevOps => (format!("refs/heads/{}", repository.branch), raw_branch),
        _ => (repository.branch.clone(), raw_branch),
    };
    if actual != expected {
        return Err(VerificationError::BranchMismatch {
            expected,
            actual: actual.to_string(),
        });
    }

    Ok(())
}
