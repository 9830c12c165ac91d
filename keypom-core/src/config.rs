//! Session configuration.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    defaults::{DefaultConfig, NetworkConfig},
    error::KeypomError,
    keys::{key_pair_from_seed_phrase, KeyPair},
    primitives::AccountId,
    Network,
};

/// Options recognized when opening a [`crate::Keypom`] session.
///
/// ```json
/// {
///   "network": "testnet",
///   "keypom_contract_id": "v2.keypom.testnet",
///   "funder": { "account_id": "alice.testnet", "secret_key": "ed25519:..." }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct KeypomConfig {
    /// The network to talk to.
    pub network: Network,
    /// Overrides the network's default Keypom contract.
    #[serde(default)]
    pub keypom_contract_id: Option<String>,
    /// Overrides the network's default JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// The account paying for drops. Without it, drops cannot be created or modified.
    #[serde(default)]
    pub funder: Option<FunderConfig>,
}

impl KeypomConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    /// Returns `SerializationError` if the JSON does not match the expected shape.
    pub fn from_json(json: &str) -> Result<Self, KeypomError> {
        Ok(serde_json::from_str(json)?)
    }

    /// A configuration with network defaults and no funder.
    #[must_use]
    pub const fn for_network(network: Network) -> Self {
        Self {
            network,
            keypom_contract_id: None,
            rpc_url: None,
            funder: None,
        }
    }

    pub(crate) fn network_config(&self) -> Result<NetworkConfig, KeypomError> {
        NetworkConfig::from_network(
            self.network,
            self.keypom_contract_id.clone(),
            self.rpc_url.clone(),
        )
    }
}

/// Credentials of a funder account. Exactly one of `secret_key` and `seed_phrase` must be set.
#[derive(Deserialize)]
pub struct FunderConfig {
    /// The funder's account.
    pub account_id: String,
    /// Full access secret key in `ed25519:` form.
    #[serde(default)]
    pub secret_key: Option<SecretString>,
    /// BIP-39 seed phrase of a full access key.
    #[serde(default)]
    pub seed_phrase: Option<SecretString>,
    /// Entropy deterministic linkdrop keys are derived from. Defaults to the secret key string.
    #[serde(default)]
    pub root_entropy: Option<SecretString>,
}

impl std::fmt::Debug for FunderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunderConfig")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// A resolved funder: account, signing key and root entropy for deterministic keys.
#[derive(Clone)]
pub struct Funder {
    account_id: AccountId,
    key_pair: KeyPair,
    root_entropy: SecretString,
}

impl Funder {
    /// The funder's account.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// The funder's full access key.
    #[must_use]
    pub const fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Entropy deterministic linkdrop keys are derived from.
    #[must_use]
    pub const fn root_entropy(&self) -> &SecretString {
        &self.root_entropy
    }
}

impl std::fmt::Debug for Funder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Funder")
            .field("account_id", &self.account_id)
            .field("public_key", &self.key_pair.public_key())
            .finish_non_exhaustive()
    }
}

impl TryFrom<FunderConfig> for Funder {
    type Error = KeypomError;

    fn try_from(config: FunderConfig) -> Result<Self, Self::Error> {
        let account_id: AccountId = config.account_id.parse()?;
        let key_pair = match (&config.secret_key, &config.seed_phrase) {
            (Some(secret_key), None) => secret_key.expose_secret().parse::<KeyPair>()?,
            (None, Some(seed_phrase)) => key_pair_from_seed_phrase(seed_phrase.expose_secret())?,
            (Some(_), Some(_)) => {
                return Err(KeypomError::invalid_input(
                    "funder",
                    "set either secret_key or seed_phrase, not both",
                ))
            }
            (None, None) => {
                return Err(KeypomError::MissingParameter {
                    parameter: "funder.secret_key or funder.seed_phrase".to_string(),
                })
            }
        };

        let root_entropy = config
            .root_entropy
            .unwrap_or_else(|| SecretString::from(key_pair.secret_key()));

        Ok(Self {
            account_id,
            key_pair,
            root_entropy,
        })
    }
}
