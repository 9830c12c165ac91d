use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr};

use crate::{
    config::Funder,
    drops::{AssetVariant, Drop, DropConfig, DropLookup, JsonAsset},
    error::KeypomError,
    estimator::{estimate_required_deposit, DepositRequest, DEFAULT_ATTACHED_GAS},
    keys::{
        generate_keys,
        passwords::{generate_per_use_passwords, normalize_protected_uses, JsonPasswordForUse},
        GeneratedKeys, KeySource, PublicKey,
    },
    ledger::FunctionCall,
    orchestrator::{
        BatchBuilder, ADD_KEYS_GAS, CREATE_DROP_GAS, DELETE_KEYS_GAS, MAX_KEYS_PER_CALL,
        REFUND_ASSETS_GAS,
    },
    primitives::{AccountId, Balance, Gas},
};

use super::{Keypom, OperationResult};

/// Drops are listed in pages of this size when every drop of a funder is deleted.
const DROP_PAGE_SIZE: u64 = 50;

/// Parameters of [`Keypom::create_drop`].
#[derive(Debug, Default)]
pub struct CreateDrop {
    /// Drop id. Defaults to the current UNIX time in milliseconds.
    pub drop_id: Option<String>,
    /// Keys to generate. Ignored when `public_keys` is set.
    pub num_keys: usize,
    /// Public keys to register instead of generating keys.
    pub public_keys: Option<Vec<PublicKey>>,
    /// Overrides where generated keys come from. Defaults to keys derived from the funder's root
    /// entropy with meta entropy `"{drop_id}_{nonce}"`.
    pub key_source: Option<KeySource>,
    /// NEAR released on every use, in yoctoNEAR.
    pub deposit_per_use: Balance,
    /// Drop configuration.
    pub config: DropConfig,
    /// Free form metadata.
    pub metadata: Option<String>,
    /// Asset handed out on every use. Token drops are funded in the same batch when their
    /// `sender_id` is the funder.
    pub asset: AssetVariant,
    /// NFTs transferred to the drop after it is created.
    pub nft_token_ids: Vec<String>,
    /// Protects uses with per-use passwords derived from this base password.
    pub base_password: Option<SecretString>,
    /// Uses to protect. Defaults to every use.
    pub password_protected_uses: Option<Vec<u64>>,
    /// Pay from the funder's Keypom balance instead of attaching a deposit.
    pub use_balance: bool,
    /// Added to the required deposit.
    pub extra_deposit: Balance,
    /// Build the transactions without sending them.
    pub return_transactions: bool,
}

/// Parameters of [`Keypom::add_keys`].
#[derive(Debug, Default)]
pub struct AddKeys {
    /// The drop, by id. Ignored when `drop` is set.
    pub drop_id: Option<String>,
    /// The drop, as previously read.
    pub drop: Option<Drop>,
    /// Keys to generate. Ignored when `public_keys` is set.
    pub num_keys: usize,
    /// Public keys to register instead of generating keys.
    pub public_keys: Option<Vec<PublicKey>>,
    /// Overrides where generated keys come from. Defaults to keys derived from the funder's root
    /// entropy, continuing at the drop's `next_key_id`.
    pub key_source: Option<KeySource>,
    /// NFTs transferred to the drop after the keys are added.
    pub nft_token_ids: Vec<String>,
    /// Protects uses with per-use passwords derived from this base password.
    pub base_password: Option<SecretString>,
    /// Uses to protect. Defaults to every use.
    pub password_protected_uses: Option<Vec<u64>>,
    /// Pay from the funder's Keypom balance instead of attaching a deposit.
    pub use_balance: bool,
    /// Added to the required deposit.
    pub extra_deposit: Balance,
    /// Build the transactions without sending them.
    pub return_transactions: bool,
}

/// Parameters of [`Keypom::delete_keys`].
#[derive(Debug, Default)]
pub struct DeleteKeys {
    /// The drop, by id. Ignored when `drop` is set.
    pub drop_id: Option<String>,
    /// The drop, as previously read.
    pub drop: Option<Drop>,
    /// Keys to delete. Defaults to every key of the drop, which deletes the drop.
    pub public_keys: Option<Vec<PublicKey>>,
    /// Withdraw the funder's Keypom balance afterwards.
    pub withdraw_balance: bool,
    /// Build the transactions without sending them.
    pub return_transactions: bool,
}

/// Parameters of [`Keypom::delete_drops`].
#[derive(Debug, Default)]
pub struct DeleteDrops {
    /// Drops to delete. Defaults to every drop of the funder.
    pub drop_ids: Option<Vec<String>>,
    /// Withdraw the funder's Keypom balance after the last drop.
    pub withdraw_balance: bool,
    /// Build the transactions without sending them.
    pub return_transactions: bool,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Serialize)]
struct CreateDropArgs<'a> {
    drop_id: &'a str,
    public_keys: &'a [PublicKey],
    #[serde_as(as = "DisplayFromStr")]
    deposit_per_use: Balance,
    config: Option<&'a DropConfig>,
    metadata: Option<&'a str>,
    #[serde(flatten)]
    asset: JsonAsset,
    passwords_per_use: Option<Vec<Option<Vec<JsonPasswordForUse>>>>,
}

#[skip_serializing_none]
#[derive(Serialize)]
struct AddKeysArgs<'a> {
    drop_id: &'a str,
    public_keys: &'a [PublicKey],
    passwords_per_use: Option<Vec<Option<Vec<JsonPasswordForUse>>>>,
}

#[derive(Serialize)]
struct DeleteKeysArgs<'a> {
    drop_id: &'a str,
    public_keys: &'a [PublicKey],
}

#[derive(Serialize)]
struct RefundAssetsArgs<'a> {
    drop_id: &'a str,
}

type PasswordsPerUse = Option<Vec<Option<Vec<JsonPasswordForUse>>>>;

fn default_drop_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
        .to_string()
}

const fn check_key_count(num_keys: usize) -> Result<(), KeypomError> {
    if num_keys > MAX_KEYS_PER_CALL {
        return Err(KeypomError::TooManyKeys {
            requested: num_keys,
            max: MAX_KEYS_PER_CALL,
        });
    }
    Ok(())
}

/// Supplied public keys, or keys generated from `source`.
fn resolve_keys(
    public_keys: Option<Vec<PublicKey>>,
    num_keys: usize,
    source: impl FnOnce() -> KeySource,
) -> Result<(Vec<PublicKey>, Option<GeneratedKeys>), KeypomError> {
    if let Some(public_keys) = public_keys {
        check_key_count(public_keys.len())?;
        return Ok((public_keys, None));
    }
    check_key_count(num_keys)?;
    let keys = generate_keys(num_keys, &source())?;
    Ok((keys.public_keys.clone(), Some(keys)))
}

/// Per-use password hashes of every key, and the number of protected uses per key.
fn passwords_for(
    base_password: Option<&SecretString>,
    protected_uses: Option<&[u64]>,
    uses_per_key: u64,
    public_keys: &[PublicKey],
) -> Result<(u64, PasswordsPerUse), KeypomError> {
    let Some(base_password) = base_password else {
        return Ok((0, None));
    };
    let uses: Vec<u64> = protected_uses.map_or_else(
        || (1..=uses_per_key).collect(),
        normalize_protected_uses,
    );
    if let Some(bad) = uses.iter().find(|&&u| u == 0 || u > uses_per_key) {
        return Err(KeypomError::invalid_input(
            "password_protected_uses",
            format!("use {bad} is outside 1..={uses_per_key}"),
        ));
    }

    let passwords = generate_per_use_passwords(public_keys, &uses, base_password.expose_secret())
        .into_iter()
        .map(Some)
        .collect();
    Ok((uses.len() as u64, Some(passwords)))
}

fn attached_gas(asset: &AssetVariant, required_gas: Gas) -> Gas {
    if required_gas > 0 {
        return required_gas;
    }
    match asset {
        AssetVariant::FunctionCallSet(fc) => fc
            .config
            .as_ref()
            .and_then(|config| config.attached_gas)
            .unwrap_or(DEFAULT_ATTACHED_GAS),
        _ => DEFAULT_ATTACHED_GAS,
    }
}

fn ensure_owner(drop: &Drop, funder: &Funder) -> Result<(), KeypomError> {
    if drop.is_owned_by(funder.account_id()) {
        return Ok(());
    }
    Err(KeypomError::NotDropOwner {
        drop_id: drop.drop_id.clone(),
        owner_id: drop.owner_id.to_string(),
        caller_id: funder.account_id().to_string(),
    })
}

fn multiply(values: &[u128], context: &str) -> Result<u128, KeypomError> {
    values.iter().try_fold(1u128, |acc, &value| {
        acc.checked_mul(value)
            .ok_or_else(|| KeypomError::overflow(context))
    })
}

impl Keypom {
    /// Storage bounds minimum of the token contract of a fungible token drop.
    async fn ft_storage_min(&self, asset: &AssetVariant) -> Result<Option<Balance>, KeypomError> {
        match asset {
            AssetVariant::FungibleToken(ft) => Ok(Some(
                self.registry()
                    .storage_balance_bounds(&ft.contract_id)
                    .await?
                    .min,
            )),
            _ => Ok(None),
        }
    }

    /// Checks `use_balance` and returns the deposit to attach for a `required` estimate.
    async fn deposit_to_attach(
        &self,
        funder: &Funder,
        required: Balance,
        use_balance: bool,
    ) -> Result<Balance, KeypomError> {
        if !use_balance {
            return Ok(required);
        }
        let available = self
            .registry()
            .get_user_balance(funder.account_id())
            .await?;
        if available < required {
            tracing::warn!(%required, %available, "keypom balance too low");
            return Err(KeypomError::InsufficientBalance {
                required,
                available,
            });
        }
        Ok(0)
    }

    async fn ensure_ft_balance(
        &self,
        ft_contract_id: &AccountId,
        account_id: &AccountId,
        required: u128,
    ) -> Result<(), KeypomError> {
        let available = self
            .registry()
            .ft_balance_of(ft_contract_id, account_id)
            .await?;
        if available < required {
            return Err(KeypomError::InsufficientFtBalance {
                contract_id: ft_contract_id.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }

    async fn resolve_drop(
        &self,
        drop: Option<Drop>,
        drop_id: Option<String>,
    ) -> Result<Drop, KeypomError> {
        match (drop, drop_id) {
            (Some(drop), _) => Ok(drop),
            (None, Some(drop_id)) => {
                self.registry()
                    .get_drop_information(&DropLookup::Id(drop_id))
                    .await
            }
            (None, None) => Err(KeypomError::MissingParameter {
                parameter: "drop_id or drop".to_string(),
            }),
        }
    }

    /// Creates a drop, generating its keys and funding its assets.
    ///
    /// The batch is `create_drop`, then the `ft_transfer_call` or `nft_transfer_call`s funding the
    /// drop. Nothing is sent if the funder's balances do not cover the operation.
    ///
    /// # Errors
    /// - `NoFunder`, `ReadOnlySession`, `TooManyKeys`, `InvalidInput` before any network call.
    /// - `InsufficientBalance`, `InsufficientFtBalance` before any transaction.
    /// - `TransactionFailed` if a step is rejected; earlier steps stay on chain.
    pub async fn create_drop(&self, params: CreateDrop) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("create a drop")?;
        self.require_sender("create a drop", params.return_transactions)?;

        let drop_id = params.drop_id.unwrap_or_else(default_drop_id);
        let uses_per_key = params.config.uses_per_key.unwrap_or(1);
        let num_keys = params.public_keys.as_ref().map_or(params.num_keys, Vec::len);
        let (public_keys, keys) = resolve_keys(params.public_keys, num_keys, || {
            params.key_source.unwrap_or_else(|| {
                KeySource::for_drop(funder.root_entropy(), &drop_id, 0, num_keys)
            })
        })?;
        let (protected_uses, passwords_per_use) = passwords_for(
            params.base_password.as_ref(),
            params.password_protected_uses.as_deref(),
            uses_per_key,
            &public_keys,
        )?;

        let estimate = estimate_required_deposit(
            self.estimator_config(),
            &DepositRequest {
                deposit_per_use: params.deposit_per_use,
                num_keys: num_keys as u64,
                uses_per_key,
                attached_gas: attached_gas(&params.asset, 0),
                asset: &params.asset,
                ft_storage_min: self.ft_storage_min(&params.asset).await?,
                protected_uses,
                creates_drop: true,
                extra_deposit: params.extra_deposit,
            },
        )?
        .total()?;
        let deposit = self
            .deposit_to_attach(funder, estimate, params.use_balance)
            .await?;

        let config = (params.config != DropConfig::default()).then_some(&params.config);
        let args = CreateDropArgs {
            drop_id: &drop_id,
            public_keys: &public_keys,
            deposit_per_use: params.deposit_per_use,
            config,
            metadata: params.metadata.as_deref(),
            asset: JsonAsset::from(&params.asset),
            passwords_per_use,
        };
        let mut builder = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .keypom_call(FunctionCall::new(
            "create_drop",
            &args,
            CREATE_DROP_GAS,
            deposit,
        )?)
        .required_deposit(deposit);

        match &params.asset {
            AssetVariant::FungibleToken(ft) if &ft.sender_id == funder.account_id() => {
                let amount = multiply(
                    &[ft.balance_per_use, u128::from(uses_per_key), num_keys as u128],
                    "ft amount",
                )?;
                if amount > 0 {
                    self.ensure_ft_balance(&ft.contract_id, funder.account_id(), amount)
                        .await?;
                    builder = builder.ft_transfer_call(ft.contract_id.clone(), amount, &drop_id)?;
                }
            }
            AssetVariant::NonFungibleToken(nft) => {
                builder = builder.nft_transfer_calls(
                    &nft.contract_id,
                    &params.nft_token_ids,
                    &drop_id,
                )?;
            }
            _ => {}
        }

        tracing::info!(
            drop_id = %drop_id,
            num_keys,
            uses_per_key,
            kind = params.asset.kind(),
            deposit = %deposit,
            use_balance = params.use_balance,
            "creating drop"
        );
        let batch = builder.build();
        let outcomes = self
            .dispatch("create a drop", &batch, params.return_transactions)
            .await?;

        Ok(OperationResult {
            drop_id: Some(drop_id),
            keys,
            required_deposit: deposit,
            estimated_deposit: estimate,
            batch,
            outcomes,
        })
    }

    /// Adds keys to an existing drop owned by the funder.
    ///
    /// Generated keys continue the drop's deterministic sequence at `next_key_id`. Fungible token
    /// drops are topped up to cover every use of every key.
    ///
    /// # Errors
    /// - `NoFunder`, `ReadOnlySession`, `MissingParameter`, `TooManyKeys` before any network call.
    /// - `NotDropOwner` after reading the drop, before anything is sent.
    /// - `InsufficientBalance`, `InsufficientFtBalance` before any transaction.
    /// - `TransactionFailed` if a step is rejected; earlier steps stay on chain.
    pub async fn add_keys(&self, params: AddKeys) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("add keys")?;
        self.require_sender("add keys", params.return_transactions)?;
        if params.drop.is_none() && params.drop_id.is_none() {
            return Err(KeypomError::MissingParameter {
                parameter: "drop_id or drop".to_string(),
            });
        }
        let num_keys = params.public_keys.as_ref().map_or(params.num_keys, Vec::len);
        check_key_count(num_keys)?;

        let drop = self.resolve_drop(params.drop, params.drop_id).await?;
        ensure_owner(&drop, funder)?;

        let uses_per_key = drop.uses_per_key();
        let (public_keys, keys) = resolve_keys(params.public_keys, num_keys, || {
            params.key_source.unwrap_or_else(|| {
                KeySource::for_drop(
                    funder.root_entropy(),
                    &drop.drop_id,
                    drop.next_key_id,
                    num_keys,
                )
            })
        })?;
        let (protected_uses, passwords_per_use) = passwords_for(
            params.base_password.as_ref(),
            params.password_protected_uses.as_deref(),
            uses_per_key,
            &public_keys,
        )?;

        let estimate = estimate_required_deposit(
            self.estimator_config(),
            &DepositRequest {
                deposit_per_use: drop.deposit_per_use,
                num_keys: num_keys as u64,
                uses_per_key,
                attached_gas: attached_gas(&drop.asset, drop.required_gas),
                asset: &drop.asset,
                ft_storage_min: self.ft_storage_min(&drop.asset).await?,
                protected_uses,
                creates_drop: false,
                extra_deposit: params.extra_deposit,
            },
        )?
        .total()?;
        let deposit = self
            .deposit_to_attach(funder, estimate, params.use_balance)
            .await?;

        let args = AddKeysArgs {
            drop_id: &drop.drop_id,
            public_keys: &public_keys,
            passwords_per_use,
        };
        let mut builder = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .keypom_call(FunctionCall::new("add_keys", &args, ADD_KEYS_GAS, deposit)?)
        .required_deposit(deposit);

        match &drop.asset {
            AssetVariant::FungibleToken(ft) if &ft.sender_id == funder.account_id() => {
                let key_supply = self
                    .registry()
                    .get_key_supply_for_drop(&drop.drop_id)
                    .await?;
                let needed_uses = u128::from(uses_per_key)
                    * (u128::from(key_supply) + num_keys as u128);
                let missing_uses = needed_uses.saturating_sub(u128::from(drop.registered_uses));
                let amount = multiply(&[missing_uses, ft.balance_per_use], "ft amount")?;
                if amount > 0 {
                    self.ensure_ft_balance(&ft.contract_id, funder.account_id(), amount)
                        .await?;
                    builder =
                        builder.ft_transfer_call(ft.contract_id.clone(), amount, &drop.drop_id)?;
                }
            }
            AssetVariant::NonFungibleToken(nft) => {
                builder = builder.nft_transfer_calls(
                    &nft.contract_id,
                    &params.nft_token_ids,
                    &drop.drop_id,
                )?;
            }
            _ => {}
        }

        tracing::info!(
            drop_id = %drop.drop_id,
            num_keys,
            next_key_id = drop.next_key_id,
            deposit = %deposit,
            use_balance = params.use_balance,
            "adding keys"
        );
        let batch = builder.build();
        let outcomes = self
            .dispatch("add keys", &batch, params.return_transactions)
            .await?;

        Ok(OperationResult {
            drop_id: Some(drop.drop_id),
            keys,
            required_deposit: deposit,
            estimated_deposit: estimate,
            batch,
            outcomes,
        })
    }

    /// Deletes keys of a drop owned by the funder, refunding unclaimed assets first.
    ///
    /// # Errors
    /// - `NoFunder`, `ReadOnlySession`, `MissingParameter` before any network call.
    /// - `NotDropOwner` after reading the drop, before anything is sent.
    /// - `TransactionFailed` if a step is rejected; earlier steps stay on chain.
    pub async fn delete_keys(&self, params: DeleteKeys) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("delete keys")?;
        self.require_sender("delete keys", params.return_transactions)?;
        if params.drop.is_none() && params.drop_id.is_none() {
            return Err(KeypomError::MissingParameter {
                parameter: "drop_id or drop".to_string(),
            });
        }

        let drop = self.resolve_drop(params.drop, params.drop_id).await?;
        ensure_owner(&drop, funder)?;

        let public_keys = match params.public_keys {
            Some(public_keys) => public_keys,
            None => self.all_public_keys(&drop.drop_id).await?,
        };

        let mut builder = self.delete_steps(funder, &drop, &public_keys)?;
        if params.withdraw_balance {
            builder = builder.withdraw_balance()?;
        }

        tracing::info!(
            drop_id = %drop.drop_id,
            num_keys = public_keys.len(),
            withdraw = params.withdraw_balance,
            "deleting keys"
        );
        let batch = builder.build();
        let outcomes = self
            .dispatch("delete keys", &batch, params.return_transactions)
            .await?;

        Ok(OperationResult {
            drop_id: Some(drop.drop_id),
            keys: None,
            required_deposit: 0,
            estimated_deposit: 0,
            batch,
            outcomes,
        })
    }

    /// Deletes drops of the funder with all of their keys, one batch per drop.
    ///
    /// Drops are processed in order and processing stops at the first failure.
    ///
    /// # Errors
    /// - `NoFunder`, `ReadOnlySession` before any network call.
    /// - `NotDropOwner` if a listed drop belongs to someone else; nothing is sent.
    /// - `TransactionFailed` if a step is rejected; earlier drops stay deleted.
    pub async fn delete_drops(
        &self,
        params: DeleteDrops,
    ) -> Result<Vec<OperationResult>, KeypomError> {
        let funder = self.require_funder("delete drops")?;
        self.require_sender("delete drops", params.return_transactions)?;

        let drops = match params.drop_ids {
            Some(drop_ids) => {
                let mut drops = Vec::with_capacity(drop_ids.len());
                for drop_id in drop_ids {
                    let drop = self
                        .registry()
                        .get_drop_information(&DropLookup::Id(drop_id))
                        .await?;
                    ensure_owner(&drop, funder)?;
                    drops.push(drop);
                }
                drops
            }
            None => self.all_drops(funder.account_id()).await?,
        };

        let mut batches = Vec::with_capacity(drops.len());
        for (index, drop) in drops.iter().enumerate() {
            let public_keys = self.all_public_keys(&drop.drop_id).await?;
            let mut builder = self.delete_steps(funder, drop, &public_keys)?;
            if params.withdraw_balance && index + 1 == drops.len() {
                builder = builder.withdraw_balance()?;
            }
            batches.push(builder.build());
        }

        let mut results = Vec::with_capacity(batches.len());
        for (drop, batch) in drops.into_iter().zip(batches) {
            tracing::info!(drop_id = %drop.drop_id, "deleting drop");
            let outcomes = self
                .dispatch("delete drops", &batch, params.return_transactions)
                .await?;
            results.push(OperationResult {
                drop_id: Some(drop.drop_id),
                keys: None,
                required_deposit: 0,
                estimated_deposit: 0,
                batch,
                outcomes,
            });
        }
        Ok(results)
    }

    /// `refund_assets` when registered assets remain, then `delete_keys` in chunks the contract
    /// accepts.
    fn delete_steps(
        &self,
        funder: &Funder,
        drop: &Drop,
        public_keys: &[PublicKey],
    ) -> Result<BatchBuilder, KeypomError> {
        let mut builder = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        );
        if drop.asset.needs_registration() && drop.registered_uses > 0 {
            builder = builder.keypom_call(FunctionCall::new(
                "refund_assets",
                &RefundAssetsArgs {
                    drop_id: &drop.drop_id,
                },
                REFUND_ASSETS_GAS,
                0,
            )?);
        }

        let empty: [&[PublicKey]; 1] = [&[]];
        let chunks: Vec<&[PublicKey]> = if public_keys.is_empty() {
            empty.to_vec()
        } else {
            public_keys.chunks(MAX_KEYS_PER_CALL).collect()
        };
        for chunk in chunks {
            builder = builder.keypom_call(FunctionCall::new(
                "delete_keys",
                &DeleteKeysArgs {
                    drop_id: &drop.drop_id,
                    public_keys: chunk,
                },
                DELETE_KEYS_GAS,
                0,
            )?);
        }
        Ok(builder)
    }

    async fn all_public_keys(&self, drop_id: &str) -> Result<Vec<PublicKey>, KeypomError> {
        Ok(self
            .registry()
            .get_all_keys_for_drop(drop_id)
            .await?
            .into_iter()
            .map(|key| key.public_key)
            .collect())
    }

    async fn all_drops(&self, owner_id: &AccountId) -> Result<Vec<Drop>, KeypomError> {
        let mut drops = Vec::new();
        loop {
            let page = self
                .registry()
                .get_drops(owner_id, drops.len() as u64, Some(DROP_PAGE_SIZE), false)
                .await?;
            let done = (page.len() as u64) < DROP_PAGE_SIZE;
            drops.extend(page.into_iter().map(|entry| entry.drop));
            if done {
                return Ok(drops);
            }
        }
    }
}
