//! Per-use password protection.
//!
//! A protected use stores `hex(SHA256(SHA256(base_password || public_key || use)))` on chain.
//! Claiming sends the inner hash, `hex(SHA256(base_password || public_key || use))`, which the
//! contract hashes once more and compares.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::PublicKey;

/// The password hash of one protected use, as `create_drop` and `add_keys` expect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPasswordForUse {
    /// Double hash of the use's password, hex encoded.
    pub pw: String,
    /// The protected use, starting at 1.
    pub key_use: u64,
}

fn inner_hash(base_password: &str, public_key: &PublicKey, key_use: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(base_password.as_bytes());
    hasher.update(public_key.to_string().as_bytes());
    hasher.update(key_use.to_string().as_bytes());
    hasher.finalize().into()
}

/// The password a claimer submits for use `key_use` of `public_key`.
#[must_use]
pub fn hash_password_for_claim(
    base_password: &str,
    public_key: &PublicKey,
    key_use: u64,
) -> String {
    hex::encode(inner_hash(base_password, public_key, key_use))
}

/// The hash stored on chain for use `key_use` of `public_key`.
#[must_use]
pub fn hash_password_for_storage(
    base_password: &str,
    public_key: &PublicKey,
    key_use: u64,
) -> String {
    let inner = inner_hash(base_password, public_key, key_use);
    hex::encode(Sha256::digest(inner))
}

/// Sorted, duplicate free protected uses.
#[must_use]
pub fn normalize_protected_uses(uses: &[u64]) -> Vec<u64> {
    let mut uses = uses.to_vec();
    uses.sort_unstable();
    uses.dedup();
    uses
}

/// Builds `passwords_per_use` for a batch of keys: one list per key, one entry per protected use.
///
/// A use listed twice gets a single entry.
#[must_use]
pub fn generate_per_use_passwords(
    public_keys: &[PublicKey],
    uses: &[u64],
    base_password: &str,
) -> Vec<Vec<JsonPasswordForUse>> {
    let uses = normalize_protected_uses(uses);
    public_keys
        .iter()
        .map(|public_key| {
            uses.iter()
                .map(|&key_use| JsonPasswordForUse {
                    pw: hash_password_for_storage(base_password, public_key, key_use),
                    key_use,
                })
                .collect()
        })
        .collect()
}
