//! Webhook reception: resolve the definition by token, verify, dispatch.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;

use shipyard_pipeline::{Hoster, PipelineError, Trigger};

use super::AppState;
use crate::services::webhook_verifier::{self, VerificationError};
use crate::services::github_service;

pub const TOKEN_HEADER: &str = "x-build-token";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no build token given")]
    MissingToken,

    #[error("no build definition for this token")]
    UnknownDefinition,

    #[error(transparent)]
    Definition(#[from] PipelineError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingToken => StatusCode::BAD_REQUEST,
            WebhookError::UnknownDefinition => StatusCode::NOT_FOUND,
            WebhookError::Definition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WebhookError::Verification(VerificationError::InvalidSignature) => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::Verification(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            WebhookError::MissingToken => "missing_token",
            WebhookError::UnknownDefinition => "unknown_definition",
            WebhookError::Definition(_) => "malformed_definition",
            WebhookError::Verification(e) => e.reason(),
            WebhookError::Store(_) => "store",
        }
    }
}

/// Token from `?id=` or the `X-Build-Token` header.
pub fn token(query_id: Option<String>, headers: &HeaderMap) -> Option<String> {
    query_id.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

/// Handle an incoming push notification. Returns once the build is
/// dispatched; the run continues in the background.
pub async fn handle_webhook(
    state: &AppState,
    token: Option<String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<String, WebhookError> {
    let result = receive(state, token, headers, body).await;
    if let Err(e) = &result {
        crate::metrics::webhook_rejected(e.reason());
        tracing::warn!(reason = e.reason(), "Webhook rejected: {e}");
    }
    result
}

async fn receive(
    state: &AppState,
    token: Option<String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<String, WebhookError> {
    let token = token.ok_or(WebhookError::MissingToken)?;
    let definition = state
        .pipeline
        .store()
        .definition_by_token(&token)
        .await?
        .ok_or(WebhookError::UnknownDefinition)?;

    let content = state.pipeline.resolve_content(&definition).await?;
    crate::metrics::webhook_received(&content.repository.hoster);

    if content.repository.hoster() == Ok(Hoster::GitHub) {
        github_service::check_request(&state.config.github_webhook_secret, headers, &body)?;
    }
    webhook_verifier::verify(&content, headers, &body)?;

    let definition_id = definition.id;
    state.pipeline.dispatch(definition, Trigger::Webhook);
    tracing::info!(definition_id, "Build dispatched from webhook");
    Ok(format!("build of definition {definition_id} dispatched"))
}
