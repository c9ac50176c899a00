//! # Signature Verification
//!
//! The gateway signs a canonical string built from a fixed set of payload
//! fields and carries the hex HMAC-SHA256 digest in the payload itself.
//!
//! ## Canonical form
//!
//! - Only the fields in [`SIGNED_FIELDS`] participate; the signature field
//!   never does
//! - Fields are sorted by name and rendered as `key=value`, joined with `&`
//! - Absent or `null` fields are omitted; strings are unquoted; numbers and
//!   booleans use their JSON text
//!
//! Verification fails closed: no secret, an empty secret, a missing or
//! malformed signature all yield `false`.

use crate::config::WebhookSecret;
use crate::event::FIELD_SIGNATURE;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Payload fields covered by the signature, in canonical (sorted) order
pub const SIGNED_FIELDS: [&str; 7] = [
    "approvedAt",
    "balanceAmount",
    "orderId",
    "paymentKey",
    "requestedAt",
    "status",
    "totalAmount",
];

/// Build the string the gateway signs
pub fn canonical_string(payload: &Value) -> String {
    let mut fields: Vec<&str> = SIGNED_FIELDS
        .iter()
        .copied()
        .filter(|name| *name != FIELD_SIGNATURE)
        .collect();
    fields.sort_unstable();

    fields
        .into_iter()
        .filter_map(|name| {
            let value = payload.get(name)?;
            canonical_value(value).map(|rendered| format!("{}={}", name, rendered))
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Hex HMAC-SHA256 of the canonical string under `secret`
pub fn compute_signature(payload: &Value, secret: &WebhookSecret) -> String {
    hex::encode(compute_digest(payload, secret))
}

fn compute_digest(payload: &Value, secret: &WebhookSecret) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.expose_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(canonical_string(payload).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Compare two byte strings without an early exit on the first mismatch
///
/// Lengths are compared first; a length mismatch returns immediately and
/// never reaches the byte comparison.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

/// Verifies gateway signatures against the configured shared secret
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<WebhookSecret>,
}

impl SignatureVerifier {
    /// Create a verifier. `None` makes every verification fail.
    pub fn new(secret: Option<WebhookSecret>) -> Self {
        Self { secret }
    }

    /// Whether a usable secret is configured
    pub fn is_configured(&self) -> bool {
        self.secret.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Verify the signature carried in `payload`
    #[instrument(skip(self, payload))]
    pub fn verify(&self, payload: &Value) -> bool {
        Self::verify_with(payload, self.secret.as_ref())
    }

    /// Verify the signature carried in `payload` under an explicit secret
    pub fn verify_with(payload: &Value, secret: Option<&WebhookSecret>) -> bool {
        let secret = match secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                debug!("No webhook secret configured; failing signature check");
                return false;
            }
        };

        let provided = match payload.get(FIELD_SIGNATURE).and_then(|v| v.as_str()) {
            Some(signature) => signature,
            None => {
                debug!("Payload carries no signature field");
                return false;
            }
        };

        let hex_part = provided.strip_prefix("sha256=").unwrap_or(provided);
        let provided_bytes = match hex::decode(hex_part) {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("Signature is not valid hex");
                return false;
            }
        };

        let expected = compute_digest(payload, secret);
        if expected.len() != DIGEST_LEN {
            return false;
        }

        constant_time_eq(&expected, &provided_bytes)
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
