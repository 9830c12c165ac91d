//! Key derivation for linkdrops and funders.
//!
//! Deterministic keys let a funder regenerate every linkdrop it ever created from a single root
//! entropy, without storing the keys:
//!
//! ```text
//! entropy  = SHA256(root_entropy || "_" || meta_entropy)
//! mnemonic = BIP39(entropy)                       (24 words)
//! seed     = BIP39-Seed(mnemonic, passphrase = "")
//! key      = SLIP10-Ed25519(seed, m/44'/397'/0')
//! ```
//!
//! Meta entropy is conventionally `"{drop_id}_{nonce}"`, one string per key.

use std::collections::HashSet;

use bip39::Mnemonic;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use super::{KeyPair, PublicKey};
use crate::error::KeypomError;

type HmacSha512 = Hmac<Sha512>;

/// Domain key of the SLIP-10 ed25519 master node.
const SLIP10_ED25519_KEY: &[u8] = b"ed25519 seed";

/// NEAR's BIP-44 path, `m/44'/397'/0'`. Every component is hardened.
const NEAR_DERIVATION_PATH: [u32; 3] = [44, 397, 0];

const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Where the entropy of a batch of keys comes from.
#[derive(Debug)]
pub enum KeySource {
    /// Every key is drawn from the operating system's secure random source. Lost keys cannot be
    /// regenerated.
    Random,
    /// Every key is a pure function of the root entropy and its meta entropy string.
    Deterministic {
        /// Secret root entropy, usually owned by the funder.
        root_entropy: SecretString,
        /// One string per key.
        meta_entropy: Vec<String>,
    },
}

impl KeySource {
    /// Deterministic source for `num_keys` keys of a drop, with meta entropy
    /// `"{drop_id}_{nonce}"` for nonces `start_nonce..start_nonce + num_keys`.
    #[must_use]
    pub fn for_drop(
        root_entropy: &SecretString,
        drop_id: &str,
        start_nonce: u64,
        num_keys: usize,
    ) -> Self {
        let meta_entropy = (start_nonce..)
            .take(num_keys)
            .map(|nonce| format!("{drop_id}_{nonce}"))
            .collect();
        Self::Deterministic {
            root_entropy: SecretString::from(root_entropy.expose_secret().to_owned()),
            meta_entropy,
        }
    }
}

/// A batch of generated keys. All three vectors are index-aligned.
#[derive(Clone)]
pub struct GeneratedKeys {
    /// The key pairs.
    pub key_pairs: Vec<KeyPair>,
    /// The public keys, in the order of `key_pairs`.
    pub public_keys: Vec<PublicKey>,
    /// The secret keys in `ed25519:` string form, in the order of `key_pairs`.
    pub secret_keys: Vec<String>,
}

impl std::fmt::Debug for GeneratedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeys")
            .field("public_keys", &self.public_keys)
            .finish_non_exhaustive()
    }
}

impl GeneratedKeys {
    fn from_key_pairs(key_pairs: Vec<KeyPair>) -> Result<Self, KeypomError> {
        let mut seen = HashSet::with_capacity(key_pairs.len());
        let public_keys: Vec<PublicKey> = key_pairs.iter().map(KeyPair::public_key).collect();
        for public_key in &public_keys {
            if !seen.insert(*public_key) {
                return Err(KeypomError::KeyCollision {
                    public_key: public_key.to_string(),
                });
            }
        }
        let secret_keys = key_pairs.iter().map(KeyPair::secret_key).collect();
        Ok(Self {
            key_pairs,
            public_keys,
            secret_keys,
        })
    }

    /// Number of keys in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.key_pairs.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_pairs.is_empty()
    }
}

/// Generates `num_keys` key pairs from `source`.
///
/// # Errors
/// - `InvalidInput` if a deterministic source does not carry exactly `num_keys` meta entropy
///   strings.
/// - `KeyCollision` if two keys of the batch share a public key. This is never retried.
pub fn generate_keys(num_keys: usize, source: &KeySource) -> Result<GeneratedKeys, KeypomError> {
    let key_pairs = match source {
        KeySource::Random => (0..num_keys).map(|_| KeyPair::random()).collect(),
        KeySource::Deterministic {
            root_entropy,
            meta_entropy,
        } => {
            if meta_entropy.len() != num_keys {
                return Err(KeypomError::invalid_input(
                    "meta_entropy",
                    format!(
                        "expected {num_keys} entries, got {}",
                        meta_entropy.len()
                    ),
                ));
            }
            meta_entropy
                .iter()
                .map(|meta| derive_key_pair(root_entropy.expose_secret(), meta))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let keys = GeneratedKeys::from_key_pairs(key_pairs)?;
    tracing::debug!(
        num_keys,
        deterministic = matches!(source, KeySource::Deterministic { .. }),
        "generated linkdrop keys"
    );
    Ok(keys)
}

/// Derives the key pair for one `(root_entropy, meta_entropy)` pair.
///
/// # Errors
/// Returns `InvalidKey` if the intermediate mnemonic cannot be built.
pub fn derive_key_pair(root_entropy: &str, meta_entropy: &str) -> Result<KeyPair, KeypomError> {
    let mut hasher = Sha256::new();
    hasher.update(root_entropy.as_bytes());
    hasher.update(b"_");
    hasher.update(meta_entropy.as_bytes());
    let mut entropy = Zeroizing::new([0u8; 32]);
    entropy.copy_from_slice(&hasher.finalize());

    let mnemonic = Mnemonic::from_entropy(entropy.as_ref()).map_err(|e| {
        KeypomError::InvalidKey {
            reason: format!("cannot build mnemonic from entropy: {e}"),
        }
    })?;
    key_pair_from_mnemonic(&mnemonic)
}

/// Derives the key pair of a NEAR seed phrase along `m/44'/397'/0'`.
///
/// # Errors
/// Returns `InvalidKey` if the phrase is not a valid English BIP-39 mnemonic.
pub fn key_pair_from_seed_phrase(seed_phrase: &str) -> Result<KeyPair, KeypomError> {
    let normalized = seed_phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mnemonic =
        Mnemonic::parse_normalized(&normalized).map_err(|e| KeypomError::InvalidKey {
            reason: format!("invalid seed phrase: {e}"),
        })?;
    key_pair_from_mnemonic(&mnemonic)
}

/// Resolves the public key of a secret key locally. The secret never leaves the process.
///
/// # Errors
/// Returns `InvalidKey` if the secret key cannot be parsed.
pub fn get_pub_from_secret(secret_key: &str) -> Result<PublicKey, KeypomError> {
    let key_pair: KeyPair = secret_key.parse()?;
    Ok(key_pair.public_key())
}

fn key_pair_from_mnemonic(mnemonic: &Mnemonic) -> Result<KeyPair, KeypomError> {
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let key = slip10_ed25519(seed.as_ref(), &NEAR_DERIVATION_PATH)?;
    Ok(KeyPair::from_seed(&key))
}

/// SLIP-10 private key derivation for ed25519. Ed25519 only supports hardened children, so
/// every index is hardened.
fn slip10_ed25519(seed: &[u8], path: &[u32]) -> Result<Zeroizing<[u8; 32]>, KeypomError> {
    let hmac_error = |e: hmac::digest::InvalidLength| KeypomError::InvalidKey {
        reason: format!("hmac key rejected: {e}"),
    };

    let mut mac = HmacSha512::new_from_slice(SLIP10_ED25519_KEY).map_err(hmac_error)?;
    mac.update(seed);
    let mut node = Zeroizing::new([0u8; 64]);
    node.copy_from_slice(&mac.finalize().into_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&node[..32]);
    chain_code.copy_from_slice(&node[32..]);

    for index in path {
        let mut mac = HmacSha512::new_from_slice(chain_code.as_ref()).map_err(hmac_error)?;
        mac.update(&[0u8]);
        mac.update(key.as_ref());
        mac.update(&(index | HARDENED_OFFSET).to_be_bytes());
        node.copy_from_slice(&mac.finalize().into_bytes());
        key.copy_from_slice(&node[..32]);
        chain_code.copy_from_slice(&node[32..]);
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> SecretString {
        SecretString::from("funder-root-entropy".to_string())
    }

    #[test]
    fn test_deterministic_generation_is_reproducible() {
        let first = generate_keys(3, &KeySource::for_drop(&root(), "1700000000000", 0, 3))
            .unwrap();
        let second = generate_keys(3, &KeySource::for_drop(&root(), "1700000000000", 0, 3))
            .unwrap();
        assert_eq!(first.public_keys, second.public_keys);
        assert_eq!(first.secret_keys, second.secret_keys);
    }

    #[test]
    fn test_nonces_and_drops_yield_distinct_keys() {
        let drop_a = generate_keys(4, &KeySource::for_drop(&root(), "a", 0, 4)).unwrap();
        let drop_b = generate_keys(4, &KeySource::for_drop(&root(), "b", 0, 4)).unwrap();
        let all: HashSet<_> = drop_a
            .public_keys
            .iter()
            .chain(drop_b.public_keys.iter())
            .collect();
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn test_continuing_nonce_regenerates_tail() {
        let full = generate_keys(5, &KeySource::for_drop(&root(), "drop", 0, 5)).unwrap();
        let tail = generate_keys(2, &KeySource::for_drop(&root(), "drop", 3, 2)).unwrap();
        assert_eq!(&full.public_keys[3..], tail.public_keys.as_slice());
    }

    #[test]
    fn test_random_generation() {
        let keys = generate_keys(5, &KeySource::Random).unwrap();
        assert_eq!(keys.len(), 5);
        let distinct: HashSet<_> = keys.public_keys.iter().collect();
        assert_eq!(distinct.len(), 5);
    }

    #[test]
    fn test_meta_entropy_length_must_match() {
        let source = KeySource::Deterministic {
            root_entropy: root(),
            meta_entropy: vec!["x_0".to_string()],
        };
        assert!(matches!(
            generate_keys(2, &source),
            Err(KeypomError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_meta_entropy_is_a_collision() {
        let source = KeySource::Deterministic {
            root_entropy: root(),
            meta_entropy: vec!["x_0".to_string(), "x_0".to_string()],
        };
        assert!(matches!(
            generate_keys(2, &source),
            Err(KeypomError::KeyCollision { .. })
        ));
    }

    #[test]
    fn test_pub_from_secret_matches_generated_pairs() {
        let keys = generate_keys(3, &KeySource::for_drop(&root(), "drop", 0, 3)).unwrap();
        for (secret_key, public_key) in keys.secret_keys.iter().zip(&keys.public_keys) {
            assert_eq!(&get_pub_from_secret(secret_key).unwrap(), public_key);
        }
    }

    #[test]
    fn test_seed_phrase_matches_entropy_path() {
        let entropy = [0u8; 32];
        let mnemonic = Mnemonic::from_entropy(&entropy).unwrap();
        let phrase = mnemonic.to_string();
        assert!(phrase.ends_with(" art"));

        let from_phrase = key_pair_from_seed_phrase(&phrase.to_uppercase()).unwrap();
        let from_mnemonic = key_pair_from_mnemonic(&mnemonic).unwrap();
        assert_eq!(from_phrase.public_key(), from_mnemonic.public_key());

        assert!(key_pair_from_seed_phrase("not a seed phrase").is_err());
    }

    #[test]
    fn test_slip10_ed25519_vector() {
        // SLIP-0010 test vector 1 for ed25519, chain m/0H.
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key = slip10_ed25519(&seed, &[0]).unwrap();
        assert_eq!(
            hex::encode(key.as_ref()),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }
}
