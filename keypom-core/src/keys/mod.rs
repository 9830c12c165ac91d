//! Linkdrop key material.
//!
//! Keys are ed25519 and rendered the way NEAR tooling expects them: `ed25519:` followed by the
//! base58 encoding of the 32-byte public key, or of the 64-byte `seed || public key` secret.

use std::{fmt, str::FromStr};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::KeypomError;

pub mod derivation;
pub mod passwords;

pub use derivation::{
    generate_keys, get_pub_from_secret, key_pair_from_seed_phrase, GeneratedKeys, KeySource,
};

const ED25519_PREFIX: &str = "ed25519:";

fn invalid_key(reason: impl Into<String>) -> KeypomError {
    KeypomError::InvalidKey {
        reason: reason.into(),
    }
}

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = KeypomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_prefixed(s)?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            invalid_key(format!("public key must be 32 bytes, got {}", bytes.len()))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| invalid_key(format!("not an ed25519 point: {e}")))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeypomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}

/// An ed25519 key pair. The secret half is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Builds a key pair from a 32-byte ed25519 seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Draws a fresh key pair from the operating system's secure random source.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Returns the public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Returns the secret key in `ed25519:<base58(seed || public key)>` form.
    #[must_use]
    pub fn secret_key(&self) -> String {
        let mut bytes = Zeroizing::new([0u8; 64]);
        bytes[..32].copy_from_slice(&self.signing_key.to_bytes());
        bytes[32..].copy_from_slice(self.signing_key.verifying_key().as_bytes());
        format!("{ED25519_PREFIX}{}", bs58::encode(bytes.as_ref()).into_string())
    }
}

impl FromStr for KeyPair {
    type Err = KeypomError;

    /// Parses `ed25519:<base58>` where the payload is either the 64-byte `seed || public key`
    /// form or a bare 32-byte seed. In the 64-byte form the embedded public key must match the
    /// one derived from the seed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Zeroizing::new(decode_prefixed(s)?);
        let (seed, embedded_public) = match bytes.len() {
            64 => (&bytes[..32], Some(&bytes[32..])),
            32 => (&bytes[..], None),
            len => {
                return Err(invalid_key(format!(
                    "secret key must be 32 or 64 bytes, got {len}"
                )))
            }
        };

        let mut seed_bytes = Zeroizing::new([0u8; 32]);
        seed_bytes.copy_from_slice(seed);
        let key_pair = Self::from_seed(&seed_bytes);

        if let Some(embedded_public) = embedded_public {
            let derived = key_pair.public_key();
            if !bool::from(derived.as_bytes().as_slice().ct_eq(embedded_public)) {
                return Err(invalid_key(
                    "embedded public key does not match the secret seed",
                ));
            }
        }
        Ok(key_pair)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

fn decode_prefixed(s: &str) -> Result<Vec<u8>, KeypomError> {
    let encoded = s
        .trim()
        .strip_prefix(ED25519_PREFIX)
        .ok_or_else(|| invalid_key("only ed25519 keys are supported"))?;
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| invalid_key(format!("invalid base58: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_round_trip() {
        let key_pair = KeyPair::random();
        let parsed: KeyPair = key_pair.secret_key().parse().unwrap();
        assert_eq!(parsed.public_key(), key_pair.public_key());
        assert_eq!(parsed.secret_key(), key_pair.secret_key());
    }

    #[test]
    fn test_public_key_string_form() {
        let key_pair = KeyPair::from_seed(&[7u8; 32]);
        let public_key = key_pair.public_key();
        let rendered = public_key.to_string();
        assert!(rendered.starts_with("ed25519:"));
        assert_eq!(rendered.parse::<PublicKey>().unwrap(), public_key);

        let json = serde_json::to_string(&public_key).unwrap();
        assert_eq!(json, format!("\"{rendered}\""));
    }

    #[test]
    fn test_bare_seed_secret_key() {
        let seed = [9u8; 32];
        let encoded = format!("ed25519:{}", bs58::encode(seed).into_string());
        let key_pair: KeyPair = encoded.parse().unwrap();
        assert_eq!(key_pair.public_key(), KeyPair::from_seed(&seed).public_key());
    }

    #[test]
    fn test_mismatched_embedded_public_key_is_rejected() {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&[1u8; 32]);
        bytes[32..].copy_from_slice(KeyPair::from_seed(&[2u8; 32]).public_key().as_bytes());
        let encoded = format!("ed25519:{}", bs58::encode(bytes).into_string());

        match encoded.parse::<KeyPair>() {
            Err(KeypomError::InvalidKey { .. }) => {}
            other => panic!("expected InvalidKey, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_other_curves_and_bad_lengths() {
        assert!("secp256k1:abc".parse::<PublicKey>().is_err());
        assert!("ed25519:111".parse::<PublicKey>().is_err());
        assert!("ed25519:0OIl".parse::<KeyPair>().is_err());
    }
}
