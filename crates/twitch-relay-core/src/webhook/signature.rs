//! EventSub signature verification.
//!
//! Twitch signs every webhook delivery with HMAC-SHA256 over the
//! concatenation of the message id header, the message timestamp header and
//! the raw request body. The result is sent hex-encoded in the
//! `Twitch-Eventsub-Message-Signature` header as `sha256=<hex-digest>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify an EventSub signature.
///
/// Computes `HMAC-SHA256(secret, message_id || timestamp || body)` and
/// compares its lowercase hex encoding with the digest portion of
/// `claimed_signature`, i.e. everything after the first `=`. The algorithm
/// prefix itself is not checked.
///
/// Returns `false` for a claimed signature without a `=` separator. Never
/// panics.
///
/// # Examples
///
/// ```rust
/// use twitch_relay_core::webhook::signature::{compute_signature, verify};
///
/// let sig = compute_signature("s3cret-value", "id-1", "2024-01-01T00:00:00Z", b"{}");
/// assert!(verify("s3cret-value", "id-1", "2024-01-01T00:00:00Z", b"{}", &sig));
/// assert!(!verify("s3cret-value", "id-1", "2024-01-01T00:00:00Z", b"{ }", &sig));
/// ```
pub fn verify(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    claimed_signature: &str,
) -> bool {
    let Some((_algorithm, claimed_digest)) = claimed_signature.split_once('=') else {
        return false;
    };

    let expected = hex_digest(secret, message_id, timestamp, body);

    // Length is not secret; ct_eq needs equal-length inputs.
    if expected.len() != claimed_digest.len() {
        return false;
    }

    expected.as_bytes().ct_eq(claimed_digest.as_bytes()).into()
}

/// Compute the `sha256=<hex>` signature header value for a message.
///
/// This is what the publisher sends; it is exposed for tests and tooling
/// that need to produce signed deliveries.
pub fn compute_signature(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    format!("sha256={}", hex_digest(secret, message_id, timestamp, body))
}

fn hex_digest(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
