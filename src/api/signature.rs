//! Shared-secret signing of `POST /runs` bodies.
//!
//! A client signs the exact request body it sends and puts
//! `sha256=<hex>` in [`SIGNATURE_HEADER`]. The server checks the bytes it
//! received, so re-serializing a request invalidates its signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the run submission signature.
pub const SIGNATURE_HEADER: &str = "x-forgeflow-signature";

const SCHEME: &str = "sha256=";

fn keyed(secret: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::SignatureVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(mac)
}

/// Check a submission body against its signature header value.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> Result<()> {
    let digest = header_value
        .strip_prefix(SCHEME)
        .ok_or_else(|| AppError::SignatureVerification("Missing sha256= prefix".to_string()))?;
    let digest = hex::decode(digest)
        .map_err(|e| AppError::SignatureVerification(format!("Invalid hex in signature: {e}")))?;

    keyed(secret, body)?
        .verify_slice(&digest)
        .map_err(|_| AppError::SignatureVerification("Signature mismatch".to_string()))
}

/// Header value a client sends along with `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let digest = keyed(secret, body)?.finalize().into_bytes();
    Ok(format!("{SCHEME}{}", hex::encode(digest)))
}
