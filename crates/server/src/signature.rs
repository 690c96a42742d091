//! Slack request signature verification (HMAC-SHA256, `v0` scheme).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Requests older than this are treated as replays.
const REPLAY_WINDOW_SECS: i64 = 60 * 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request timestamp outside the replay window")]
    StaleTimestamp,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify an inbound request against the signing secret.
///
/// The signed base string is `v0:{timestamp}:{body}`; the comparison is
/// constant-time via the MAC verification.
pub fn verify(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::StaleTimestamp)?;
    if (now_unix - ts).abs() > REPLAY_WINDOW_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let hex_digest = provided
        .strip_prefix("v0=")
        .ok_or(SignatureError::Mismatch)?;
    let provided_bytes = hex::decode(hex_digest).map_err(|_| SignatureError::Mismatch)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    mac.verify_slice(&provided_bytes)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compute the `v0=` signature for a request body (the counterpart of
/// `verify`, used by tests and local tooling).
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}
