//! JSON shapes exchanged with the Keypom contract.
//!
//! Amounts travel as decimal strings, counters as numbers. Gas is accepted in either form since
//! contract versions disagree on it.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr, PickFirst};

use crate::{
    keys::PublicKey,
    primitives::{AccountId, Balance, Gas},
};

/// Per-drop configuration.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropConfig {
    /// How many times each key can be used. Defaults to 1 on chain.
    pub uses_per_key: Option<u64>,
    /// Time windows in which keys can be used.
    pub time: Option<TimeConfig>,
    /// Usage restrictions.
    pub usage: Option<UsageConfig>,
    /// Public sale settings, letting anyone add keys for a price.
    pub sale: Option<PublicSaleConfig>,
    /// Account new accounts are created under.
    pub root_account_id: Option<AccountId>,
}

/// Time restrictions of a drop. All values are nanoseconds.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Keys cannot be used before this timestamp.
    pub start: Option<u64>,
    /// Keys cannot be used after this timestamp.
    pub end: Option<u64>,
    /// Minimum time between two uses of a key.
    pub throttle: Option<u64>,
    /// Each use unlocks after `start + interval * use`.
    pub interval: Option<u64>,
}

/// Which claim methods a key can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPermissions {
    /// Only `claim` into an existing account.
    Claim,
    /// Only `create_account_and_claim`.
    CreateAccountAndClaim,
}

/// Usage restrictions of a drop.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Restricts keys to one claim method.
    pub permissions: Option<ClaimPermissions>,
    /// Refund the deposit to the funder instead of sending it to the claimer.
    pub refund_deposit: Option<bool>,
    /// Delete the drop once its last key is used.
    pub auto_delete_drop: Option<bool>,
    /// Withdraw the funder's balance once the drop is deleted.
    pub auto_withdraw: Option<bool>,
    /// Argument names the contract fills in when creating an account.
    pub account_creation_fields: Option<AccountCreationFields>,
}

/// Argument names the contract injects into `create_account` calls.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreationFields {
    /// Receives the new account id.
    pub account_id_field: Option<String>,
    /// Receives the drop id.
    pub drop_id_field: Option<String>,
    /// Receives the key id.
    pub key_id_field: Option<String>,
    /// Receives the funder id.
    pub funder_id_field: Option<String>,
}

/// Public sale configuration.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSaleConfig {
    /// Cap on the number of keys sold.
    pub max_num_keys: Option<u64>,
    /// Price per key in yoctoNEAR.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub price_per_key: Option<Balance>,
    /// Accounts allowed to buy keys.
    pub allowlist: Option<Vec<AccountId>>,
    /// Accounts not allowed to buy keys.
    pub blocklist: Option<Vec<AccountId>>,
    /// Where sale proceeds go.
    pub auto_withdraw_funds_to: Option<AccountId>,
    /// Sale start, nanoseconds.
    pub start: Option<u64>,
    /// Sale end, nanoseconds.
    pub end: Option<u64>,
}

/// Payload of a drop without assets.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleData {
    /// Keys can be registered after creation without attaching a deposit up front.
    pub lazy_register: Option<bool>,
}

/// Fungible tokens sent on every use.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtData {
    /// The token contract.
    pub contract_id: AccountId,
    /// The account transferring the tokens to Keypom.
    pub sender_id: AccountId,
    /// Tokens sent per use, in the token's smallest unit.
    #[serde_as(as = "DisplayFromStr")]
    pub balance_per_use: Balance,
}

/// Non-fungible tokens sent on every use, one token per use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftData {
    /// The token contract.
    pub contract_id: AccountId,
    /// The account transferring the tokens to Keypom.
    pub sender_id: AccountId,
}

/// How user supplied arguments combine with the stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UserArgsRule {
    /// Stored arguments take precedence.
    AllUser,
    /// User arguments are merged in, user wins.
    FunderPreferred,
    /// User arguments are merged in, funder wins.
    UserPreferred,
}

/// A single method called on every use of a function call drop.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodData {
    /// Contract to call.
    pub receiver_id: AccountId,
    /// Method to call.
    pub method_name: String,
    /// Stringified JSON arguments.
    pub args: String,
    /// Deposit attached to the call, in yoctoNEAR.
    #[serde_as(as = "DisplayFromStr")]
    pub attached_deposit: Balance,
    /// Gas attached to the call.
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    pub attached_gas: Option<Gas>,
    /// Argument that receives the claiming account id.
    pub account_id_field: Option<String>,
    /// Argument that receives the drop id.
    pub drop_id_field: Option<String>,
    /// Argument that receives the key id.
    pub key_id_field: Option<String>,
    /// Argument that receives the funder id.
    pub funder_id_field: Option<String>,
    /// Call the claiming account instead of `receiver_id`.
    pub receiver_to_claimer: Option<bool>,
    /// How `fc_args` supplied on claim are merged.
    pub user_args_rule: Option<UserArgsRule>,
}

/// Function call drop configuration.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcData {
    /// One method set per use. `None` sets make the use a no-op. A single set applies to every
    /// use.
    pub methods: Vec<Option<Vec<MethodData>>>,
    /// Extra function call settings.
    pub config: Option<FcConfig>,
}

/// Extra function call settings.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcConfig {
    /// Gas attached to the claim, overriding the contract's computation.
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    pub attached_gas: Option<Gas>,
}

/// The optional asset payloads of a drop. At most one may be set.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonAsset {
    /// Set for drops without assets.
    pub simple: Option<SimpleData>,
    /// Set for fungible token drops.
    pub ft: Option<FtData>,
    /// Set for non-fungible token drops.
    pub nft: Option<NftData>,
    /// Set for function call drops.
    pub fc: Option<FcData>,
}

/// A drop as returned by `get_drop_information`.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDrop {
    /// Drop id.
    pub drop_id: String,
    /// Funder owning the drop.
    pub owner_id: AccountId,
    /// NEAR sent on every use, in yoctoNEAR.
    #[serde_as(as = "DisplayFromStr")]
    pub deposit_per_use: Balance,
    /// Asset payload.
    #[serde(flatten)]
    pub asset: JsonAsset,
    /// Drop configuration.
    #[serde(default)]
    pub config: Option<DropConfig>,
    /// Asset uses already funded (FT and NFT drops).
    #[serde(default)]
    pub registered_uses: u64,
    /// Gas attached to each claim.
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub required_gas: Gas,
    /// Free form metadata.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Id the next added key receives.
    #[serde(default)]
    pub next_key_id: u64,
}

/// A key as returned by `get_key_information`.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct JsonKeyInfo {
    /// The drop the key belongs to.
    pub drop_id: String,
    /// The public key.
    pub pk: PublicKey,
    /// Index of the key within its drop.
    #[serde(default)]
    pub key_id: u64,
    /// The use the next claim consumes, starting at 1.
    #[serde(default = "first_use")]
    pub cur_key_use: u64,
    /// Uses left.
    pub remaining_uses: u64,
    /// Last use, nanoseconds.
    #[serde(default)]
    pub last_used: u64,
    /// Gas allowance left on the access key, in yoctoNEAR.
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub allowance: Balance,
    /// Gas to attach when claiming with this key.
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    pub required_gas: Option<Gas>,
}

const fn first_use() -> u64 {
    1
}

/// Source metadata published by the contract (NEP-330).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSourceMetadata {
    /// Contract version.
    pub version: String,
    /// Link to the source.
    pub link: String,
}

/// Storage deposit bounds of a fungible token contract (NEP-145).
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBalanceBounds {
    /// Minimum storage deposit.
    #[serde_as(as = "DisplayFromStr")]
    pub min: Balance,
    /// Maximum storage deposit, if capped.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub max: Option<Balance>,
}

/// Fungible token metadata (NEP-148).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtMetadata {
    /// Metadata spec version.
    pub spec: String,
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Data url of the icon.
    #[serde(default)]
    pub icon: Option<String>,
    /// Decimals of the token's smallest unit.
    pub decimals: u8,
}
