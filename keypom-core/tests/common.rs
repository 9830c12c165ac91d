#![allow(dead_code)]

//! Common test utilities shared across integration tests.
//!
//! [`FakeKeypom`] stands in for both the Keypom contract and the ledger: it answers view calls
//! from an in-memory state, applies the effects of the transactions it receives and records
//! them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use keypom_core::{
    keys::KeyPair,
    ledger::{
        ExecutionOutcome, FunctionCall, InMemoryKeyStore, KeyStore, Transaction,
        TransactionSender, ViewClient,
    },
    primitives::{AccountId, Balance, ONE_NEAR},
    FunderConfig, Keypom, KeypomConfig, KeypomError, Network,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const KEYPOM: &str = "v2.keypom.testnet";
pub const FUNDER: &str = "funder.testnet";
pub const FT_STORAGE_MIN: Balance = 1_250_000_000_000_000_000_000;

pub fn account(id: &str) -> AccountId {
    id.parse().unwrap()
}

pub fn funder_key() -> KeyPair {
    KeyPair::from_seed(&[1u8; 32])
}

#[derive(Debug, Clone)]
pub struct FakeDrop {
    pub owner_id: String,
    /// `create_drop` arguments without the keys.
    pub body: Value,
    pub keys: Vec<String>,
    pub next_key_id: u64,
    pub registered_uses: u64,
}

#[derive(Debug, Clone)]
pub struct FakeKey {
    pub drop_id: String,
    pub key_id: u64,
    pub remaining_uses: u64,
    pub cur_key_use: u64,
    /// Stored password hash per protected use.
    pub passwords: HashMap<u64, String>,
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub drops: BTreeMap<String, FakeDrop>,
    pub keys: HashMap<String, FakeKey>,
    pub user_balances: HashMap<String, Balance>,
    pub ft_balances: HashMap<(String, String), u128>,
    pub trial_rules: Option<Value>,
    pub trial_exit: bool,
}

impl LedgerState {
    fn drop_json(&self, drop_id: &str) -> Value {
        let Some(drop) = self.drops.get(drop_id) else {
            return Value::Null;
        };
        let mut body = drop.body.clone();
        body["owner_id"] = json!(drop.owner_id);
        body["registered_uses"] = json!(drop.registered_uses);
        body["next_key_id"] = json!(drop.next_key_id);
        body
    }

    fn key_json(&self, public_key: &str) -> Value {
        let Some(key) = self.keys.get(public_key) else {
            return Value::Null;
        };
        json!({
            "drop_id": key.drop_id,
            "pk": public_key,
            "key_id": key.key_id,
            "cur_key_use": key.cur_key_use,
            "remaining_uses": key.remaining_uses,
            "last_used": 0,
            "allowance": "0",
        })
    }

    /// Registers `public_keys` with `drop_id`, as `create_drop` and `add_keys` do.
    pub fn insert_keys(&mut self, drop_id: &str, public_keys: &[String], passwords: Option<&Value>) {
        let Some(drop) = self.drops.get_mut(drop_id) else {
            return;
        };
        let uses = drop.body["config"]["uses_per_key"].as_u64().unwrap_or(1);
        for (index, public_key) in public_keys.iter().enumerate() {
            let passwords = passwords
                .and_then(|p| p.get(index))
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| {
                            (
                                entry["key_use"].as_u64().unwrap(),
                                entry["pw"].as_str().unwrap().to_string(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            self.keys.insert(
                public_key.clone(),
                FakeKey {
                    drop_id: drop_id.to_string(),
                    key_id: drop.next_key_id,
                    remaining_uses: uses,
                    cur_key_use: 1,
                    passwords,
                },
            );
            drop.keys.push(public_key.clone());
            drop.next_key_id += 1;
        }
    }

    /// Inserts a drop directly, bypassing `create_drop`.
    pub fn insert_drop(&mut self, drop_id: &str, owner_id: &str, body: Value) {
        let mut body = body;
        body["drop_id"] = json!(drop_id);
        if body.get("deposit_per_use").is_none() {
            body["deposit_per_use"] = json!(ONE_NEAR.to_string());
        }
        self.drops.insert(
            drop_id.to_string(),
            FakeDrop {
                owner_id: owner_id.to_string(),
                body,
                keys: Vec::new(),
                next_key_id: 0,
                registered_uses: 0,
            },
        );
    }
}

/// The Keypom contract, the token contracts and the ledger, in memory.
pub struct FakeKeypom {
    pub key_store: Arc<InMemoryKeyStore>,
    pub state: Mutex<LedgerState>,
    pub sent: Mutex<Vec<(AccountId, Transaction)>>,
    /// Transactions calling this method fail on chain.
    pub fail_method: Mutex<Option<String>>,
}

impl FakeKeypom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            key_store: Arc::new(InMemoryKeyStore::new()),
            state: Mutex::new(LedgerState::default()),
            sent: Mutex::new(Vec::new()),
            fail_method: Mutex::new(None),
        })
    }

    fn funded_config() -> KeypomConfig {
        KeypomConfig {
            funder: Some(FunderConfig {
                account_id: FUNDER.to_string(),
                secret_key: Some(SecretString::from(funder_key().secret_key())),
                seed_phrase: None,
                root_entropy: None,
            }),
            ..KeypomConfig::for_network(Network::Testnet)
        }
    }

    /// A session funded by [`FUNDER`].
    pub fn session(self: &Arc<Self>) -> Keypom {
        self.session_with(Self::funded_config())
    }

    /// A session funded by [`FUNDER`] that has no transaction sender.
    pub fn read_only_session(self: &Arc<Self>) -> Keypom {
        Keypom::new(
            Self::funded_config(),
            self.clone(),
            None,
            self.key_store.clone(),
        )
        .unwrap()
    }

    /// A session without funder.
    pub fn anonymous_session(self: &Arc<Self>) -> Keypom {
        self.session_with(KeypomConfig::for_network(Network::Testnet))
    }

    fn session_with(self: &Arc<Self>, config: KeypomConfig) -> Keypom {
        Keypom::new(
            config,
            self.clone(),
            Some(self.clone()),
            self.key_store.clone(),
        )
        .unwrap()
    }

    /// Method names of every sent transaction, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, tx)| tx.actions.iter().map(|a| a.method_name.clone()))
            .collect()
    }

    pub fn fail_on(&self, method_name: &str) {
        *self.fail_method.lock().unwrap() = Some(method_name.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_method.lock().unwrap() = None;
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        signer_id: &AccountId,
        receiver_id: &AccountId,
        action: &FunctionCall,
    ) -> Result<(), String> {
        let args = &action.args;
        let signer = signer_id.to_string();
        match action.method_name.as_str() {
            "create_drop" => {
                let drop_id = args["drop_id"].as_str().ok_or("missing drop_id")?;
                if state.drops.contains_key(drop_id) {
                    return Err(format!("drop {drop_id} exists"));
                }
                let mut body = args.clone();
                let public_keys = strings(&body["public_keys"]);
                let passwords = body.get("passwords_per_use").cloned();
                if let Value::Object(map) = &mut body {
                    map.remove("public_keys");
                    map.remove("passwords_per_use");
                }
                state.insert_drop(drop_id, &signer, body);
                state.insert_keys(drop_id, &public_keys, passwords.as_ref());
            }
            "add_keys" => {
                let drop_id = args["drop_id"].as_str().ok_or("missing drop_id")?;
                let owner = state
                    .drops
                    .get(drop_id)
                    .map(|d| d.owner_id.clone())
                    .ok_or("no drop")?;
                if owner != signer {
                    return Err("not the owner".to_string());
                }
                let public_keys = strings(&args["public_keys"]);
                state.insert_keys(drop_id, &public_keys, args.get("passwords_per_use"));
            }
            "delete_keys" => {
                let drop_id = args["drop_id"].as_str().ok_or("missing drop_id")?;
                let drop = state.drops.get_mut(drop_id).ok_or("no drop")?;
                if drop.owner_id != signer {
                    return Err("not the owner".to_string());
                }
                let public_keys = strings(&args["public_keys"]);
                drop.keys.retain(|k| !public_keys.contains(k));
                let empty = drop.keys.is_empty();
                for public_key in &public_keys {
                    state.keys.remove(public_key);
                }
                if empty {
                    state.drops.remove(drop_id);
                }
            }
            "refund_assets" => {
                let drop_id = args["drop_id"].as_str().ok_or("missing drop_id")?;
                state.drops.get_mut(drop_id).ok_or("no drop")?.registered_uses = 0;
            }
            "ft_transfer_call" => {
                let drop_id = args["msg"].as_str().ok_or("missing msg")?;
                let amount: u128 = args["amount"].as_str().ok_or("missing amount")?.parse().unwrap();
                let balance = state
                    .ft_balances
                    .entry((receiver_id.to_string(), signer))
                    .or_default();
                *balance = balance.checked_sub(amount).ok_or("not enough tokens")?;
                let drop = state.drops.get_mut(drop_id).ok_or("no drop")?;
                let per_use: u128 = drop.body["ft"]["balance_per_use"]
                    .as_str()
                    .ok_or("not an ft drop")?
                    .parse()
                    .unwrap();
                drop.registered_uses += u64::try_from(amount / per_use).unwrap();
            }
            "nft_transfer_call" => {
                let drop_id = args["msg"].as_str().ok_or("missing msg")?;
                state.drops.get_mut(drop_id).ok_or("no drop")?.registered_uses += 1;
            }
            "add_to_balance" => {
                *state.user_balances.entry(signer).or_default() += action.deposit;
            }
            "withdraw_from_balance" => {
                state.user_balances.remove(&signer);
            }
            "claim" | "create_account_and_claim" => {
                if signer != KEYPOM {
                    return Err("claims are signed by the contract".to_string());
                }
                let key_pair = self
                    .key_store
                    .get_key(Network::Testnet, signer_id)
                    .unwrap()
                    .ok_or("no signing key")?;
                let public_key = key_pair.public_key().to_string();
                let key = state.keys.get_mut(&public_key).ok_or("unknown key")?;
                if let Some(stored) = key.passwords.get(&key.cur_key_use) {
                    let sent = args["password"].as_str().ok_or("password required")?;
                    let hashed = hex::encode(Sha256::digest(hex::decode(sent).unwrap()));
                    if &hashed != stored {
                        return Err("invalid password".to_string());
                    }
                }
                key.remaining_uses -= 1;
                key.cur_key_use += 1;
                if key.remaining_uses == 0 {
                    let drop_id = key.drop_id.clone();
                    state.keys.remove(&public_key);
                    if let Some(drop) = state.drops.get_mut(&drop_id) {
                        drop.keys.retain(|k| k != &public_key);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn page(args: &Value) -> (usize, usize) {
    let start = args["from_index"]
        .as_str()
        .map_or(0, |s| s.parse().unwrap());
    let limit = args["limit"]
        .as_u64()
        .map_or(usize::MAX, |l| usize::try_from(l).unwrap());
    (start, limit)
}

#[async_trait]
impl ViewClient for FakeKeypom {
    async fn view_function(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: Value,
    ) -> Result<Value, KeypomError> {
        let state = self.state.lock().unwrap();
        let on_keypom = contract_id.as_str() == KEYPOM;
        Ok(match method_name {
            "get_drop_information" => {
                let drop_id = match args.get("drop_id") {
                    Some(drop_id) => drop_id.as_str().map(str::to_string),
                    None => args["key"]
                        .as_str()
                        .and_then(|key| state.keys.get(key))
                        .map(|key| key.drop_id.clone()),
                };
                drop_id.map_or(Value::Null, |id| state.drop_json(&id))
            }
            "get_key_information" if on_keypom => {
                state.key_json(args["key"].as_str().unwrap_or_default())
            }
            "get_key_information" => json!({ "trial_data": { "exit": state.trial_exit } }),
            "get_key_supply_for_drop" => json!(state
                .drops
                .get(args["drop_id"].as_str().unwrap_or_default())
                .map_or(0, |drop| drop.keys.len())),
            "get_keys_for_drop" => {
                let (start, limit) = page(&args);
                let keys = state
                    .drops
                    .get(args["drop_id"].as_str().unwrap_or_default())
                    .map(|drop| drop.keys.clone())
                    .unwrap_or_default();
                Value::Array(
                    keys.iter()
                        .skip(start)
                        .take(limit)
                        .map(|key| state.key_json(key))
                        .collect(),
                )
            }
            "get_drops_for_owner" => {
                let (start, limit) = page(&args);
                let owner = args["account_id"].as_str().unwrap_or_default();
                Value::Array(
                    state
                        .drops
                        .iter()
                        .filter(|(_, drop)| drop.owner_id == owner)
                        .skip(start)
                        .take(limit)
                        .map(|(drop_id, _)| state.drop_json(drop_id))
                        .collect(),
                )
            }
            "get_drop_supply_for_owner" => {
                let owner = args["account_id"].as_str().unwrap_or_default();
                json!(state.drops.values().filter(|d| d.owner_id == owner).count())
            }
            "get_user_balance" => {
                let account_id = args["account_id"].as_str().unwrap_or_default();
                json!(state
                    .user_balances
                    .get(account_id)
                    .copied()
                    .unwrap_or_default()
                    .to_string())
            }
            "storage_balance_bounds" => {
                json!({ "min": FT_STORAGE_MIN.to_string(), "max": null })
            }
            "ft_balance_of" => {
                let account_id = args["account_id"].as_str().unwrap_or_default().to_string();
                json!(state
                    .ft_balances
                    .get(&(contract_id.to_string(), account_id))
                    .copied()
                    .unwrap_or_default()
                    .to_string())
            }
            "get_rules" => state.trial_rules.clone().unwrap_or(Value::Null),
            other => {
                return Err(KeypomError::ContractError {
                    contract_id: contract_id.to_string(),
                    method_name: other.to_string(),
                    error: "MethodNotFound".to_string(),
                })
            }
        })
    }

    async fn account_balance(&self, _account_id: &AccountId) -> Result<Balance, KeypomError> {
        Ok(10 * ONE_NEAR)
    }
}

#[async_trait]
impl TransactionSender for FakeKeypom {
    async fn send_transaction(
        &self,
        signer_id: &AccountId,
        transaction: &Transaction,
    ) -> Result<ExecutionOutcome, KeypomError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((signer_id.clone(), transaction.clone()));
        let hash = format!("tx{}", sent.len());

        let fail_method = self.fail_method.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        for action in &transaction.actions {
            if fail_method.as_deref() == Some(action.method_name.as_str()) {
                return Ok(ExecutionOutcome::failure(
                    Some(hash),
                    transaction.receiver_id.clone(),
                    "Smart contract panicked",
                ));
            }
            if let Err(error) = self.apply(&mut state, signer_id, &transaction.receiver_id, action)
            {
                return Ok(ExecutionOutcome::failure(
                    Some(hash),
                    transaction.receiver_id.clone(),
                    error,
                ));
            }
        }
        Ok(ExecutionOutcome::success(
            Some(hash),
            transaction.receiver_id.clone(),
            None,
        ))
    }
}
