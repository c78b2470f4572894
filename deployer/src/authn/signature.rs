//! HMAC-SHA256 request signatures
//!
//! Callers sign the exact request body with the shared secret and send the
//! lowercase or uppercase hex digest in `X-Signature`. Path-only calls carry
//! no body; for those the signed bytes are the stack name itself.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::DeployerError;

type HmacSha256 = Hmac<Sha256>;

/// Hex encoded HMAC-SHA256 of `payload` under `secret`.
///
/// Returns `None` if the key is rejected by the MAC.
pub fn sign(secret: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check `provided_hex` against the HMAC of `payload`.
///
/// The comparison is constant time. Malformed hex and empty secrets never
/// verify.
pub fn verify(secret: &[u8], payload: &[u8], provided_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Bytes covered by the signature: the body, or the stack name when the body is empty
pub fn signed_payload<'a>(raw_body: &'a [u8], stack: &'a str) -> &'a [u8] {
    if raw_body.is_empty() {
        stack.as_bytes()
    } else {
        raw_body
    }
}

/// Verifies signatures with the configured shared secret
pub struct SignatureVerifier {
    secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Gate a request: missing or mismatching signatures are rejected
    pub fn check(&self, payload: &[u8], signature: Option<&str>) -> Result<(), DeployerError> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
            DeployerError::Unauthorized("missing signature".to_string())
        })?;

        if verify(self.secret.expose_secret().as_bytes(), payload, signature) {
            Ok(())
        } else {
            Err(DeployerError::Unauthorized("invalid signature".to_string()))
        }
    }
}
