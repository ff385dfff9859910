//! Webhook signature verification.
//!
//! Setu signs each notification with HMAC-SHA256 over the raw request body;
//! the hex digest arrives in the [`SIGNATURE_HEADER`] header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the notification signature.
pub const SIGNATURE_HEADER: &str = "x-setu-signature";

/// Compute HMAC-SHA256 over `message` and return it hex-encoded.
///
/// # Panics
///
/// Never in practice; HMAC key setup is infallible for SHA-256.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length (RFC 2104), so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }
    result == 0
}

/// Check `signature` (hex, case-insensitive, optional `sha256=` prefix)
/// against the body.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let expected = hmac_sha256_hex(secret.as_bytes(), body);
    constant_time_eq(
        expected.as_bytes(),
        provided.to_ascii_lowercase().as_bytes(),
    )
}
