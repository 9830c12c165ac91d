//! Drops and keys as the SDK reasons about them.

use crate::{
    error::KeypomError,
    keys::PublicKey,
    primitives::{AccountId, Balance, Gas},
};

mod registry;
pub mod types;

pub use registry::{DropLookup, DropRegistry, DropWithKeys};
pub use types::{
    DropConfig, FcData, FtData, JsonAsset, JsonDrop, JsonKeyInfo, MethodData, NftData,
    SimpleData,
};

/// The asset a drop hands out on every use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetVariant {
    /// Only the NEAR `deposit_per_use`.
    None {
        /// Keys can be registered without attaching their deposit up front.
        lazy_register: bool,
    },
    /// Fungible tokens, funded with `ft_transfer_call`.
    FungibleToken(FtData),
    /// One non-fungible token per use, funded with `nft_transfer_call`.
    NonFungibleToken(NftData),
    /// Function calls executed by Keypom on claim.
    FunctionCallSet(FcData),
}

impl Default for AssetVariant {
    fn default() -> Self {
        Self::None {
            lazy_register: false,
        }
    }
}

impl AssetVariant {
    /// Whether claiming consumes an asset that must be registered with Keypom beforehand.
    #[must_use]
    pub const fn needs_registration(&self) -> bool {
        matches!(self, Self::FungibleToken(_) | Self::NonFungibleToken(_))
    }

    /// Name of the variant, for messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None { .. } => "simple",
            Self::FungibleToken(_) => "ft",
            Self::NonFungibleToken(_) => "nft",
            Self::FunctionCallSet(_) => "fc",
        }
    }
}

impl TryFrom<JsonAsset> for AssetVariant {
    type Error = KeypomError;

    fn try_from(asset: JsonAsset) -> Result<Self, Self::Error> {
        match (asset.simple, asset.ft, asset.nft, asset.fc) {
            (simple, None, None, None) => Ok(Self::None {
                lazy_register: simple.and_then(|s| s.lazy_register).unwrap_or(false),
            }),
            (None, Some(ft), None, None) => Ok(Self::FungibleToken(ft)),
            (None, None, Some(nft), None) => Ok(Self::NonFungibleToken(nft)),
            (None, None, None, Some(fc)) => Ok(Self::FunctionCallSet(fc)),
            _ => Err(KeypomError::invalid_input(
                "drop",
                "a drop carries at most one of simple, ft, nft and fc",
            )),
        }
    }
}

impl From<&AssetVariant> for JsonAsset {
    fn from(asset: &AssetVariant) -> Self {
        match asset {
            AssetVariant::None { lazy_register } => Self {
                simple: lazy_register.then_some(SimpleData {
                    lazy_register: Some(true),
                }),
                ..Self::default()
            },
            AssetVariant::FungibleToken(ft) => Self {
                ft: Some(ft.clone()),
                ..Self::default()
            },
            AssetVariant::NonFungibleToken(nft) => Self {
                nft: Some(nft.clone()),
                ..Self::default()
            },
            AssetVariant::FunctionCallSet(fc) => Self {
                fc: Some(fc.clone()),
                ..Self::default()
            },
        }
    }
}

/// A drop read from the Keypom contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drop {
    /// Drop id.
    pub drop_id: String,
    /// Funder owning the drop.
    pub owner_id: AccountId,
    /// NEAR sent on every use, in yoctoNEAR.
    pub deposit_per_use: Balance,
    /// Asset payload.
    pub asset: AssetVariant,
    /// Drop configuration.
    pub config: DropConfig,
    /// Asset uses already funded.
    pub registered_uses: u64,
    /// Gas attached to each claim.
    pub required_gas: Gas,
    /// Free form metadata.
    pub metadata: Option<String>,
    /// Id the next added key receives. Never decreases.
    pub next_key_id: u64,
}

impl Drop {
    /// Uses granted to every key. The contract defaults to one.
    #[must_use]
    pub fn uses_per_key(&self) -> u64 {
        self.config.uses_per_key.unwrap_or(1)
    }

    /// Whether `account_id` owns the drop.
    #[must_use]
    pub fn is_owned_by(&self, account_id: &AccountId) -> bool {
        &self.owner_id == account_id
    }
}

impl TryFrom<JsonDrop> for Drop {
    type Error = KeypomError;

    fn try_from(drop: JsonDrop) -> Result<Self, Self::Error> {
        Ok(Self {
            drop_id: drop.drop_id,
            owner_id: drop.owner_id,
            deposit_per_use: drop.deposit_per_use,
            asset: drop.asset.try_into()?,
            config: drop.config.unwrap_or_default(),
            registered_uses: drop.registered_uses,
            required_gas: drop.required_gas,
            metadata: drop.metadata,
            next_key_id: drop.next_key_id,
        })
    }
}

/// A linkdrop key read from the Keypom contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// The drop the key belongs to.
    pub drop_id: String,
    /// The public key.
    pub public_key: PublicKey,
    /// Index of the key within its drop.
    pub key_id: u64,
    /// The use the next claim consumes, starting at 1.
    pub cur_key_use: u64,
    /// Uses left. Keys are removed once this reaches zero.
    pub remaining_uses: u64,
    /// Last use, nanoseconds.
    pub last_used: u64,
    /// Gas allowance left on the access key, in yoctoNEAR.
    pub allowance: Balance,
    /// Gas to attach when claiming.
    pub required_gas: Option<Gas>,
}

impl From<JsonKeyInfo> for KeyInfo {
    fn from(key: JsonKeyInfo) -> Self {
        Self {
            drop_id: key.drop_id,
            public_key: key.pk,
            key_id: key.key_id,
            cur_key_use: key.cur_key_use,
            remaining_uses: key.remaining_uses,
            last_used: key.last_used,
            allowance: key.allowance,
            required_gas: key.required_gas,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_drop_with_two_payloads_is_rejected() {
        let drop: JsonDrop = serde_json::from_value(json!({
            "drop_id": "1",
            "owner_id": "alice.near",
            "deposit_per_use": "0",
            "ft": {"contract_id": "ft.near", "sender_id": "alice.near", "balance_per_use": "1"},
            "nft": {"contract_id": "nft.near", "sender_id": "alice.near"},
        }))
        .unwrap();
        assert!(matches!(
            Drop::try_from(drop),
            Err(KeypomError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_drop_without_payload_is_simple() {
        let drop: JsonDrop = serde_json::from_value(json!({
            "drop_id": "1",
            "owner_id": "alice.near",
            "deposit_per_use": "5",
            "config": {"uses_per_key": 2},
        }))
        .unwrap();
        let drop = Drop::try_from(drop).unwrap();
        assert_eq!(
            drop.asset,
            AssetVariant::None {
                lazy_register: false
            }
        );
        assert_eq!(drop.uses_per_key(), 2);
        assert!(drop.is_owned_by(&"alice.near".parse().unwrap()));
    }

    #[test]
    fn test_asset_round_trips_through_wire_payload() {
        let ft = AssetVariant::FungibleToken(FtData {
            contract_id: "ft.near".parse().unwrap(),
            sender_id: "alice.near".parse().unwrap(),
            balance_per_use: 10,
        });
        let wire = JsonAsset::from(&ft);
        assert!(wire.simple.is_none() && wire.nft.is_none() && wire.fc.is_none());
        assert_eq!(AssetVariant::try_from(wire).unwrap(), ft);
        assert!(ft.needs_registration());

        let lazy = AssetVariant::None {
            lazy_register: true,
        };
        assert_eq!(AssetVariant::try_from(JsonAsset::from(&lazy)).unwrap(), lazy);
    }
}
