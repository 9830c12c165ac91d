use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::{
    error::KeypomError,
    keys::{get_pub_from_secret, PublicKey},
    ledger::ViewClient,
    primitives::{AccountId, Balance},
};

use super::{
    types::{ContractSourceMetadata, FtMetadata, StorageBalanceBounds},
    Drop, JsonDrop, JsonKeyInfo, KeyInfo,
};

/// Page size used when a view walks every key of a drop.
const KEY_PAGE_SIZE: u64 = 50;

/// A `U128` JSON value: a decimal string, or a plain number on older contracts.
#[serde_as]
#[derive(Deserialize)]
struct JsonU128(#[serde_as(as = "PickFirst<(DisplayFromStr, _)>")] u128);

/// How to find a drop.
#[derive(Debug, Clone)]
pub enum DropLookup {
    /// By drop id.
    Id(String),
    /// By the public key of one of its keys.
    PublicKey(PublicKey),
    /// By the secret key of one of its keys. The public key is derived locally; the secret never
    /// leaves the process.
    SecretKey(String),
}

/// A drop with, optionally, all of its keys.
#[derive(Debug, Clone)]
pub struct DropWithKeys {
    /// The drop.
    pub drop: Drop,
    /// Its keys, when requested.
    pub keys: Option<Vec<KeyInfo>>,
}

/// Read-only queries against the Keypom contract and the token contracts drops reference.
///
/// Pages are independent snapshot reads. Keys or drops added or removed between two pages may be
/// skipped or seen twice.
#[derive(Clone)]
pub struct DropRegistry {
    view: Arc<dyn ViewClient>,
    contract_id: AccountId,
}

impl std::fmt::Debug for DropRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropRegistry")
            .field("contract_id", &self.contract_id)
            .finish_non_exhaustive()
    }
}

impl DropRegistry {
    /// A registry reading the Keypom contract `contract_id` through `view`.
    #[must_use]
    pub fn new(view: Arc<dyn ViewClient>, contract_id: AccountId) -> Self {
        Self { view, contract_id }
    }

    /// The Keypom contract queried.
    #[must_use]
    pub const fn contract_id(&self) -> &AccountId {
        &self.contract_id
    }

    async fn view_on<T: DeserializeOwned>(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: Value,
    ) -> Result<T, KeypomError> {
        let value = self
            .view
            .view_function(contract_id, method_name, args)
            .await?;
        if value.is_null() {
            return Err(KeypomError::ContractError {
                contract_id: contract_id.to_string(),
                method_name: method_name.to_string(),
                error: "not found".to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn view<T: DeserializeOwned>(
        &self,
        method_name: &str,
        args: Value,
    ) -> Result<T, KeypomError> {
        self.view_on(&self.contract_id, method_name, args).await
    }

    async fn view_u128(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: Value,
    ) -> Result<u128, KeypomError> {
        let JsonU128(value) = self.view_on(contract_id, method_name, args).await?;
        Ok(value)
    }

    /// Resolves a drop.
    ///
    /// # Errors
    /// Fails if the drop does not exist, the secret key is malformed or the view call fails.
    pub async fn get_drop_information(&self, lookup: &DropLookup) -> Result<Drop, KeypomError> {
        let args = match lookup {
            DropLookup::Id(drop_id) => json!({ "drop_id": drop_id }),
            DropLookup::PublicKey(public_key) => json!({ "key": public_key }),
            DropLookup::SecretKey(secret_key) => {
                json!({ "key": get_pub_from_secret(secret_key)? })
            }
        };
        let drop: JsonDrop = self.view("get_drop_information", args).await?;
        drop.try_into()
    }

    /// Resolves a drop and all of its keys.
    ///
    /// # Errors
    /// See [`DropRegistry::get_drop_information`] and [`DropRegistry::get_all_keys_for_drop`].
    pub async fn get_drop_with_keys(
        &self,
        lookup: &DropLookup,
    ) -> Result<DropWithKeys, KeypomError> {
        let drop = self.get_drop_information(lookup).await?;
        let keys = self.get_all_keys_for_drop(&drop.drop_id).await?;
        Ok(DropWithKeys {
            drop,
            keys: Some(keys),
        })
    }

    /// Reads a key.
    ///
    /// # Errors
    /// Fails if the key is not registered or the view call fails.
    pub async fn get_key_information(
        &self,
        public_key: &PublicKey,
    ) -> Result<KeyInfo, KeypomError> {
        let key: JsonKeyInfo = self
            .view("get_key_information", json!({ "key": public_key }))
            .await?;
        Ok(key.into())
    }

    /// Reads a key identified by its secret key, deriving the public key locally.
    ///
    /// # Errors
    /// Fails if the secret key is malformed, the key is not registered or the view call fails.
    pub async fn get_key_information_by_secret(
        &self,
        secret_key: &str,
    ) -> Result<KeyInfo, KeypomError> {
        self.get_key_information(&get_pub_from_secret(secret_key)?)
            .await
    }

    /// Reads several keys at once. Unknown keys yield `None`, in input order.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_key_information_batch(
        &self,
        public_keys: &[PublicKey],
    ) -> Result<Vec<Option<KeyInfo>>, KeypomError> {
        let keys: Vec<Option<JsonKeyInfo>> = self
            .view("get_key_information_batch", json!({ "keys": public_keys }))
            .await?;
        Ok(keys.into_iter().map(|key| key.map(Into::into)).collect())
    }

    /// NEAR a key's next claim releases, in yoctoNEAR.
    ///
    /// # Errors
    /// Fails if the key is not registered or the view call fails.
    pub async fn get_key_balance(&self, public_key: &PublicKey) -> Result<Balance, KeypomError> {
        self.view_u128(
            &self.contract_id,
            "get_key_balance",
            json!({ "key": public_key }),
        )
        .await
    }

    /// One page of the keys of a drop.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_keys_for_drop(
        &self,
        drop_id: &str,
        start: u64,
        limit: Option<u64>,
    ) -> Result<Vec<KeyInfo>, KeypomError> {
        let keys: Vec<JsonKeyInfo> = self
            .view(
                "get_keys_for_drop",
                page_args(json!({ "drop_id": drop_id }), start, limit),
            )
            .await?;
        Ok(keys.into_iter().map(Into::into).collect())
    }

    /// Every key of a drop, read page by page.
    ///
    /// # Errors
    /// Fails if any view call fails.
    pub async fn get_all_keys_for_drop(&self, drop_id: &str) -> Result<Vec<KeyInfo>, KeypomError> {
        let supply = self.get_key_supply_for_drop(drop_id).await?;
        let mut keys = Vec::new();
        let mut start = 0;
        while start < supply {
            let page = self
                .get_keys_for_drop(drop_id, start, Some(KEY_PAGE_SIZE))
                .await?;
            if page.is_empty() {
                break;
            }
            start += page.len() as u64;
            keys.extend(page);
        }
        Ok(keys)
    }

    /// One page of the drops owned by `owner_id`, optionally with all their keys.
    ///
    /// # Errors
    /// Fails if any view call fails or a drop is malformed.
    pub async fn get_drops(
        &self,
        owner_id: &AccountId,
        start: u64,
        limit: Option<u64>,
        with_keys: bool,
    ) -> Result<Vec<DropWithKeys>, KeypomError> {
        let drops: Vec<JsonDrop> = self
            .view(
                "get_drops_for_owner",
                page_args(json!({ "account_id": owner_id }), start, limit),
            )
            .await?;

        let mut result = Vec::with_capacity(drops.len());
        for drop in drops {
            let drop = Drop::try_from(drop)?;
            let keys = if with_keys {
                Some(self.get_all_keys_for_drop(&drop.drop_id).await?)
            } else {
                None
            };
            result.push(DropWithKeys { drop, keys });
        }
        Ok(result)
    }

    /// Number of drops owned by `owner_id`.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_drop_supply_for_owner(
        &self,
        owner_id: &AccountId,
    ) -> Result<u64, KeypomError> {
        self.view(
            "get_drop_supply_for_owner",
            json!({ "account_id": owner_id }),
        )
        .await
    }

    /// Number of keys in a drop.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_key_supply_for_drop(&self, drop_id: &str) -> Result<u64, KeypomError> {
        self.view("get_key_supply_for_drop", json!({ "drop_id": drop_id }))
            .await
    }

    /// Number of keys across every drop.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_key_total_supply(&self) -> Result<u128, KeypomError> {
        self.view_u128(&self.contract_id, "get_key_total_supply", json!({}))
            .await
    }

    /// One page of every key on the contract.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_keys(
        &self,
        start: u64,
        limit: Option<u64>,
    ) -> Result<Vec<KeyInfo>, KeypomError> {
        let keys: Vec<JsonKeyInfo> = self
            .view("get_keys", page_args(json!({}), start, limit))
            .await?;
        Ok(keys.into_iter().map(Into::into).collect())
    }

    /// Number of NFTs registered with an NFT drop.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_nft_supply_for_drop(&self, drop_id: &str) -> Result<u64, KeypomError> {
        self.view("get_nft_supply_for_drop", json!({ "drop_id": drop_id }))
            .await
    }

    /// One page of the NFT token ids registered with an NFT drop.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_nft_token_ids_for_drop(
        &self,
        drop_id: &str,
        start: u64,
        limit: Option<u64>,
    ) -> Result<Vec<String>, KeypomError> {
        self.view(
            "get_nft_token_ids_for_drop",
            page_args(json!({ "drop_id": drop_id }), start, limit),
        )
        .await
    }

    /// The balance `account_id` holds on the Keypom contract, in yoctoNEAR.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_user_balance(&self, account_id: &AccountId) -> Result<Balance, KeypomError> {
        self.view_u128(
            &self.contract_id,
            "get_user_balance",
            json!({ "account_id": account_id }),
        )
        .await
    }

    /// Version and source link of the deployed Keypom contract.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn get_contract_source_metadata(
        &self,
    ) -> Result<ContractSourceMetadata, KeypomError> {
        self.view("get_contract_source_metadata", json!({})).await
    }

    /// Storage deposit bounds of a fungible token contract.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn storage_balance_bounds(
        &self,
        ft_contract_id: &AccountId,
    ) -> Result<StorageBalanceBounds, KeypomError> {
        self.view_on(ft_contract_id, "storage_balance_bounds", json!({}))
            .await
    }

    /// Token balance of `account_id` on a fungible token contract.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn ft_balance_of(
        &self,
        ft_contract_id: &AccountId,
        account_id: &AccountId,
    ) -> Result<u128, KeypomError> {
        self.view_u128(
            ft_contract_id,
            "ft_balance_of",
            json!({ "account_id": account_id }),
        )
        .await
    }

    /// Metadata of a fungible token contract.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn ft_metadata(&self, ft_contract_id: &AccountId) -> Result<FtMetadata, KeypomError> {
        self.view_on(ft_contract_id, "ft_metadata", json!({})).await
    }
}

fn page_args(mut args: Value, start: u64, limit: Option<u64>) -> Value {
    if let Value::Object(map) = &mut args {
        map.insert("from_index".to_string(), Value::String(start.to_string()));
        if let Some(limit) = limit {
            map.insert("limit".to_string(), Value::from(limit));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::keys::KeyPair;

    /// Answers view calls from a fixed table and records every call.
    #[derive(Default)]
    struct TableView {
        answers: HashMap<String, Value>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ViewClient for TableView {
        async fn view_function(
            &self,
            _contract_id: &AccountId,
            method_name: &str,
            args: Value,
        ) -> Result<Value, KeypomError> {
            self.calls
                .lock()
                .unwrap()
                .push((method_name.to_string(), args));
            Ok(self
                .answers
                .get(method_name)
                .cloned()
                .unwrap_or(Value::Null))
        }

        async fn account_balance(&self, _account_id: &AccountId) -> Result<Balance, KeypomError> {
            Ok(0)
        }
    }

    fn registry(view: Arc<TableView>) -> DropRegistry {
        DropRegistry::new(view, "v2.keypom.testnet".parse().unwrap())
    }

    #[tokio::test]
    async fn test_secret_key_lookup_sends_only_public_key() {
        let key_pair = KeyPair::from_seed(&[8u8; 32]);
        let mut view = TableView::default();
        view.answers.insert(
            "get_drop_information".to_string(),
            json!({"drop_id": "9", "owner_id": "alice.testnet", "deposit_per_use": "1"}),
        );
        let view = Arc::new(view);

        let drop = registry(view.clone())
            .get_drop_information(&DropLookup::SecretKey(key_pair.secret_key()))
            .await
            .unwrap();
        assert_eq!(drop.drop_id, "9");

        let calls = view.calls.lock().unwrap();
        assert_eq!(calls[0].1, json!({"key": key_pair.public_key().to_string()}));
        assert!(!calls[0].1.to_string().contains(&key_pair.secret_key()));
    }

    #[tokio::test]
    async fn test_missing_drop_is_an_error() {
        let view = Arc::new(TableView::default());
        let err = registry(view)
            .get_drop_information(&DropLookup::Id("404".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, KeypomError::ContractError { .. }));
    }

    #[tokio::test]
    async fn test_u128_views_and_pagination_args() {
        let mut view = TableView::default();
        view.answers
            .insert("get_user_balance".to_string(), json!("2000000000000000000000000"));
        view.answers
            .insert("get_nft_token_ids_for_drop".to_string(), json!(["a", "b"]));
        let view = Arc::new(view);
        let registry = registry(view.clone());

        let balance = registry
            .get_user_balance(&"alice.testnet".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance, 2_000_000_000_000_000_000_000_000);

        let token_ids = registry
            .get_nft_token_ids_for_drop("3", 10, Some(2))
            .await
            .unwrap();
        assert_eq!(token_ids, vec!["a", "b"]);

        let calls = view.calls.lock().unwrap();
        assert_eq!(
            calls[1].1,
            json!({"drop_id": "3", "from_index": "10", "limit": 2})
        );
    }
}
