//! Helpers for deriving filesystem artifacts from opaque chat identifiers.

use sha2::{Digest, Sha256};

/// Longest readable prefix kept in a derived directory name.
const MAX_PREFIX_LEN: usize = 40;

/// Derive a filesystem-safe directory name from an opaque conversation id.
///
/// The readable prefix keeps directories recognizable when listing the
/// worktree root; the hash suffix keeps the mapping injective for ids that
/// differ only in characters the sanitizer collapses (e.g. `a.b` vs `a-b`).
pub fn dir_id(conversation_id: &str) -> String {
    let mut sanitized: String = conversation_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    sanitized.truncate(MAX_PREFIX_LEN);
    let sanitized = sanitized.trim_matches('-');
    let prefix = if sanitized.is_empty() {
        "thread"
    } else {
        sanitized
    };
    format!("{}-{}", prefix, short_hash(conversation_id))
}

/// First eight hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}
