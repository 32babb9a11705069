//! GitHub webhook signature validation (X-Hub-Signature-256).

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::webhook_verifier::VerificationError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Validate a `sha256=<hex>` signature of `payload`.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Check the request signature when a secret is configured.
pub fn check_request(
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), VerificationError> {
    if secret.is_empty() {
        tracing::debug!("Webhook secret not configured, skipping signature check");
        return Ok(());
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if validate_signature(secret, body, signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}

/// `sha256=<hex>` signature of `payload`, as GitHub sends it.
#[cfg(test)]
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
