//! Deterministic route identifiers.
//!
//! `route_id(provider, operation)` is `<provider>_<operation>` when that fits in
//! [`MAX_ROUTE_ID_LEN`] characters. Provider ids never contain `_`, so the
//! first `_` always separates the two parts and the plain form is injective.
//! Longer pairs use `h.` followed by 40 hex characters of
//! `SHA-256(provider || 0x00 || operation)`; the `.` cannot appear in the plain
//! form, so the two forms never collide.

use sha2::{Digest, Sha256};

/// Longest id the admin API accepts
pub const MAX_ROUTE_ID_LEN: usize = 64;

const HASHED_PREFIX: &str = "h.";
const HASH_HEX_LEN: usize = 40;

pub fn route_id(provider_id: &str, operation_id: &str) -> String {
    let plain = format!("{}_{}", provider_id, operation_id);
    if plain.len() <= MAX_ROUTE_ID_LEN {
        return plain;
    }

    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(operation_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", HASHED_PREFIX, &digest[..HASH_HEX_LEN])
}

/// Split a plain-form id back into (provider, operation). Hashed ids return `None`.
pub fn split_route_id(id: &str) -> Option<(&str, &str)> {
    if id.starts_with(HASHED_PREFIX) {
        return None;
    }
    id.split_once('_')
}
