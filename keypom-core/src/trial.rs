//! Trial accounts.
//!
//! A trial account is a real account whose only key is restricted by an on-chain policy: the
//! contracts and methods it may call, a deposit ceiling per contract and a balance floor it must
//! keep. Every call is wrapped into an `execute` call on the trial account itself, which replays
//! it if the policy allows it.
//!
//! [`TrialAccount`] enforces the same policy locally so that a call the contract would refuse
//! never reaches the network. Once the exit condition is met the account is converted to a full
//! account with `exit_trial`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use strum::Display;

use crate::{
    error::KeypomError,
    keys::{KeyPair, PublicKey},
    ledger::{
        ExecutionOutcome, ExecutionStatus, FunctionCall, KeyStore, Transaction,
        TransactionSender, ViewClient,
    },
    primitives::{AccountId, Balance, Gas, TGAS},
    Network,
};

/// Gas attached to the `execute` call wrapping a trial call.
pub const TRIAL_EXECUTE_GAS: Gas = 300 * TGAS;
/// Gas attached to `exit_trial`.
pub const EXIT_TRIAL_GAS: Gas = 100 * TGAS;
/// Gas of the wrapped call when the caller sets none.
pub const DEFAULT_TRIAL_CALL_GAS: Gas = 100 * TGAS;
/// Gas `execute` keeps for itself.
const EXECUTE_OVERHEAD_GAS: Gas = 20 * TGAS;

/// Why the trial policy refused a call. Refused calls are never sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// The receiver is not on the allow-list.
    #[error("contract_not_allowed: {receiver_id}")]
    ContractNotAllowed {
        /// The refused receiver.
        receiver_id: String,
    },
    /// The method is not allowed on that receiver.
    #[error("method_not_allowed: {receiver_id}::{method_name}")]
    MethodNotAllowed {
        /// The receiver.
        receiver_id: String,
        /// The refused method.
        method_name: String,
    },
    /// The deposit exceeds the receiver's ceiling.
    #[error("deposit_above_limit: {deposit} attached to {receiver_id}, at most {max}")]
    DepositAboveLimit {
        /// The receiver.
        receiver_id: String,
        /// Deposit of the call, in yoctoNEAR.
        deposit: Balance,
        /// Ceiling of the receiver, in yoctoNEAR.
        max: Balance,
    },
    /// The call would take the account below its balance floor.
    #[error("below_floor: balance {balance} minus deposit {deposit} is below floor {floor}")]
    BelowFloor {
        /// Current balance, in yoctoNEAR.
        balance: Balance,
        /// Deposit of the call, in yoctoNEAR.
        deposit: Balance,
        /// Balance floor, in yoctoNEAR.
        floor: Balance,
    },
    /// The session no longer accepts calls.
    #[error("session_not_active: {state}")]
    SessionNotActive {
        /// The state of the session.
        state: TrialState,
    },
}

/// Error of [`TrialAccount::call_method`].
#[derive(Debug, thiserror::Error)]
pub enum TrialCallError {
    /// The policy refused the call. Nothing was sent.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    /// Reading the balance or sending the call failed.
    #[error(transparent)]
    Keypom(#[from] KeypomError),
}

/// Lifecycle of a trial account session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TrialState {
    /// Calls allowed by the policy are forwarded.
    Active,
    /// The exit condition was met; the account waits for conversion.
    ExitRequested,
    /// The account was converted to a full account.
    Converted,
    /// The session was discarded.
    Invalid,
}

/// Methods a rule allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodRule {
    /// Any method (`*`).
    Any,
    /// Only the listed methods.
    Only(Vec<String>),
}

impl MethodRule {
    fn allows(&self, method_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(methods) => methods.iter().any(|m| m == method_name),
        }
    }
}

/// What the trial account may do with one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRule {
    /// The contract.
    pub contract_id: AccountId,
    /// Allowed methods.
    pub methods: MethodRule,
    /// Largest deposit per call, in yoctoNEAR. `None` means no ceiling.
    pub max_deposit: Option<Balance>,
}

/// The rules as the trial account's `get_rules` view returns them.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
struct JsonTrialRules {
    contracts: String,
    methods: String,
    amounts: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    floor: Balance,
}

/// The call policy of a trial account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPolicy {
    /// One rule per allowed contract.
    pub rules: Vec<ContractRule>,
    /// Balance the account must keep, in yoctoNEAR.
    pub floor: Balance,
}

fn split_list(list: &str, separator: char) -> Vec<&str> {
    list.split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

impl TrialPolicy {
    /// Parses the comma separated lists of `get_rules`.
    ///
    /// `methods` holds one `:` separated list per contract, `*` allowing any method. `amounts`
    /// holds one ceiling per contract, `0` meaning no ceiling; it may be empty.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the lists disagree in length or hold malformed entries.
    pub fn parse(
        contracts: &str,
        methods: &str,
        amounts: &str,
        floor: Balance,
    ) -> Result<Self, KeypomError> {
        let contracts = split_list(contracts, ',');
        let methods = split_list(methods, ',');
        let amounts = split_list(amounts, ',');

        if methods.len() != contracts.len() {
            return Err(KeypomError::invalid_input(
                "methods",
                format!(
                    "{} method lists for {} contracts",
                    methods.len(),
                    contracts.len()
                ),
            ));
        }
        if !amounts.is_empty() && amounts.len() != contracts.len() {
            return Err(KeypomError::invalid_input(
                "amounts",
                format!("{} amounts for {} contracts", amounts.len(), contracts.len()),
            ));
        }

        let rules = contracts
            .iter()
            .enumerate()
            .map(|(index, contract_id)| {
                let method_names = split_list(methods[index], ':');
                let methods = if method_names.contains(&"*") {
                    MethodRule::Any
                } else {
                    MethodRule::Only(method_names.into_iter().map(str::to_string).collect())
                };
                let max_deposit = match amounts.get(index) {
                    None => None,
                    Some(amount) => {
                        let amount: Balance = amount.parse().map_err(|_| {
                            KeypomError::invalid_input(
                                "amounts",
                                format!("invalid amount {amount}"),
                            )
                        })?;
                        (amount > 0).then_some(amount)
                    }
                };
                Ok(ContractRule {
                    contract_id: contract_id.parse()?,
                    methods,
                    max_deposit,
                })
            })
            .collect::<Result<_, KeypomError>>()?;

        Ok(Self { rules, floor })
    }

    /// Checks a call against the allow-list and the deposit ceilings.
    ///
    /// # Errors
    /// Returns the first rule the call breaks.
    pub fn check_call(
        &self,
        receiver_id: &AccountId,
        method_name: &str,
        deposit: Balance,
    ) -> Result<(), PolicyViolation> {
        let rule = self
            .rules
            .iter()
            .find(|rule| &rule.contract_id == receiver_id)
            .ok_or_else(|| PolicyViolation::ContractNotAllowed {
                receiver_id: receiver_id.to_string(),
            })?;
        if !rule.methods.allows(method_name) {
            return Err(PolicyViolation::MethodNotAllowed {
                receiver_id: receiver_id.to_string(),
                method_name: method_name.to_string(),
            });
        }
        if let Some(max) = rule.max_deposit {
            if deposit > max {
                return Err(PolicyViolation::DepositAboveLimit {
                    receiver_id: receiver_id.to_string(),
                    deposit,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Checks that spending `deposit` out of `balance` keeps the floor.
    ///
    /// # Errors
    /// Returns `BelowFloor` otherwise.
    pub const fn check_floor(
        &self,
        balance: Balance,
        deposit: Balance,
    ) -> Result<(), PolicyViolation> {
        match balance.checked_sub(deposit) {
            Some(left) if left >= self.floor => Ok(()),
            _ => Err(PolicyViolation::BelowFloor {
                balance,
                deposit,
                floor: self.floor,
            }),
        }
    }
}

impl TryFrom<JsonTrialRules> for TrialPolicy {
    type Error = KeypomError;

    fn try_from(rules: JsonTrialRules) -> Result<Self, Self::Error> {
        Self::parse(&rules.contracts, &rules.methods, &rules.amounts, rules.floor)
    }
}

/// A call requested through a trial account.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialCall {
    /// Contract to call.
    pub receiver_id: AccountId,
    /// Method to call.
    pub method_name: String,
    /// JSON arguments.
    pub args: Value,
    /// Deposit, in yoctoNEAR.
    pub deposit: Balance,
    /// Gas of the call. Defaults to [`DEFAULT_TRIAL_CALL_GAS`].
    pub gas: Option<Gas>,
}

impl TrialCall {
    /// A call without deposit.
    pub fn new(receiver_id: AccountId, method_name: impl Into<String>, args: Value) -> Self {
        Self {
            receiver_id,
            method_name: method_name.into(),
            args,
            deposit: 0,
            gas: None,
        }
    }

    /// Attaches `deposit` yoctoNEAR.
    #[must_use]
    pub const fn with_deposit(mut self, deposit: Balance) -> Self {
        self.deposit = deposit;
        self
    }

    /// Attaches `gas`.
    #[must_use]
    pub const fn with_gas(mut self, gas: Gas) -> Self {
        self.gas = Some(gas);
        self
    }
}

#[derive(Serialize)]
struct ExecuteAction<'a> {
    #[serde(rename = "type")]
    action_type: &'static str,
    method_name: &'a str,
    args: String,
    deposit: String,
    gas: String,
}

#[derive(Serialize)]
struct ExecuteMessage<'a> {
    receiver_id: &'a AccountId,
    actions: [ExecuteAction<'a>; 1],
}

#[derive(Serialize)]
struct ExecuteArgs<'a> {
    msgs: [ExecuteMessage<'a>; 1],
}

#[derive(Deserialize)]
struct TrialKeyInfo {
    #[serde(default)]
    trial_data: Option<TrialData>,
}

#[derive(Deserialize)]
struct TrialData {
    #[serde(default)]
    exit: bool,
}

/// A session over a trial account.
///
/// The restricted key is placed in the key store when the session is opened, the full access key
/// replaces it on conversion.
pub struct TrialAccount {
    network: Network,
    account_id: AccountId,
    public_key: PublicKey,
    policy: TrialPolicy,
    state: TrialState,
    view: Arc<dyn ViewClient>,
    sender: Arc<dyn TransactionSender>,
    key_store: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for TrialAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialAccount")
            .field("network", &self.network)
            .field("account_id", &self.account_id)
            .field("public_key", &self.public_key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TrialAccount {
    /// Opens a session with the policy read from the account's `get_rules` view.
    ///
    /// # Errors
    /// Fails if the rules cannot be read or parsed, or the key store rejects the key.
    pub async fn load(
        network: Network,
        account_id: AccountId,
        key_pair: KeyPair,
        view: Arc<dyn ViewClient>,
        sender: Arc<dyn TransactionSender>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self, KeypomError> {
        let rules = view
            .view_function(&account_id, "get_rules", json!({}))
            .await?;
        let rules: JsonTrialRules = serde_json::from_value(rules)?;
        let policy = TrialPolicy::try_from(rules)?;
        tracing::debug!(
            %account_id,
            contracts = policy.rules.len(),
            floor = %policy.floor,
            "trial rules loaded"
        );
        Self::new(network, account_id, key_pair, policy, view, sender, key_store)
    }

    /// Opens a session with a known policy.
    ///
    /// # Errors
    /// Fails if the key store rejects the key.
    pub fn new(
        network: Network,
        account_id: AccountId,
        key_pair: KeyPair,
        policy: TrialPolicy,
        view: Arc<dyn ViewClient>,
        sender: Arc<dyn TransactionSender>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self, KeypomError> {
        let public_key = key_pair.public_key();
        key_store.set_key(network, &account_id, key_pair)?;
        Ok(Self {
            network,
            account_id,
            public_key,
            policy,
            state: TrialState::Active,
            view,
            sender,
            key_store,
        })
    }

    /// The trial account.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// The restricted key of the session.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The enforced policy.
    #[must_use]
    pub const fn policy(&self) -> &TrialPolicy {
        &self.policy
    }

    /// The session state.
    #[must_use]
    pub const fn state(&self) -> TrialState {
        self.state
    }

    /// Forwards `call` through the trial account if the policy allows it.
    ///
    /// Checks run in order: session state, allow-list, deposit ceiling, balance floor. A rejected
    /// call never reaches the network. The outcome of a sent call is returned whether or not it
    /// succeeded on chain.
    ///
    /// # Errors
    /// `TrialCallError::Policy` for a refused call, `TrialCallError::Keypom` if the balance cannot
    /// be read, the gas is out of range or sending fails.
    pub async fn call_method(&self, call: &TrialCall) -> Result<ExecutionOutcome, TrialCallError> {
        if self.state != TrialState::Active {
            return Err(PolicyViolation::SessionNotActive { state: self.state }.into());
        }
        self.policy
            .check_call(&call.receiver_id, &call.method_name, call.deposit)?;
        if self.policy.floor > 0 || call.deposit > 0 {
            let balance = self.view.account_balance(&self.account_id).await?;
            self.policy.check_floor(balance, call.deposit)?;
        }

        let gas = call.gas.unwrap_or(DEFAULT_TRIAL_CALL_GAS);
        if gas == 0 || gas > TRIAL_EXECUTE_GAS - EXECUTE_OVERHEAD_GAS {
            return Err(KeypomError::invalid_input(
                "gas",
                format!("must be between 1 and {}", TRIAL_EXECUTE_GAS - EXECUTE_OVERHEAD_GAS),
            )
            .into());
        }

        let message = ExecuteMessage {
            receiver_id: &call.receiver_id,
            actions: [ExecuteAction {
                action_type: "FunctionCall",
                method_name: &call.method_name,
                args: serde_json::to_string(&call.args).map_err(KeypomError::from)?,
                deposit: call.deposit.to_string(),
                gas: gas.to_string(),
            }],
        };
        let transaction = Transaction::single(
            self.account_id.clone(),
            FunctionCall::new(
                "execute",
                &ExecuteArgs { msgs: [message] },
                TRIAL_EXECUTE_GAS,
                0,
            )?,
        );

        tracing::debug!(
            account_id = %self.account_id,
            receiver_id = %call.receiver_id,
            method_name = call.method_name.as_str(),
            deposit = %call.deposit,
            "forwarding trial call"
        );
        Ok(self
            .sender
            .send_transaction(&self.account_id, &transaction)
            .await?)
    }

    /// Like [`Self::call_method`], with policy rejections reported as the sentinel
    /// [`ExecutionOutcome::policy_rejection`] instead of an error.
    ///
    /// # Errors
    /// Fails only if the balance cannot be read or sending fails.
    pub async fn call_method_uniform(
        &self,
        call: &TrialCall,
    ) -> Result<ExecutionOutcome, KeypomError> {
        match self.call_method(call).await {
            Ok(outcome) => Ok(outcome),
            Err(TrialCallError::Policy(violation)) => {
                tracing::warn!(
                    account_id = %self.account_id,
                    %violation,
                    "trial call rejected"
                );
                Ok(ExecutionOutcome::policy_rejection(call.receiver_id.clone()))
            }
            Err(TrialCallError::Keypom(error)) => Err(error),
        }
    }

    /// Whether the account met its exit condition.
    ///
    /// # Errors
    /// Fails if the view call fails.
    pub async fn can_exit_trial(&self) -> Result<bool, KeypomError> {
        let info = self
            .view
            .view_function(&self.account_id, "get_key_information", json!({}))
            .await?;
        let info: TrialKeyInfo = serde_json::from_value(info)?;
        Ok(info.trial_data.is_some_and(|data| data.exit))
    }

    /// Moves an active session to `ExitRequested` once the exit condition is met.
    ///
    /// Returns whether the state changed.
    ///
    /// # Errors
    /// `InvalidTrialState` unless the session is active, or a view failure.
    pub async fn request_exit(&mut self) -> Result<bool, KeypomError> {
        self.expect_state(TrialState::Active)?;
        if !self.can_exit_trial().await? {
            return Ok(false);
        }
        self.state = TrialState::ExitRequested;
        tracing::info!(account_id = %self.account_id, "trial exit requested");
        Ok(true)
    }

    /// Converts the account to a full account controlled by `full_access_key`.
    ///
    /// Calls `exit_trial` signed with the trial key, then swaps the trial key for the full access
    /// key in the key store.
    ///
    /// # Errors
    /// `InvalidTrialState` unless exit was requested, `TransactionFailed` if the contract
    /// refuses, or a send or key store failure.
    pub async fn convert(
        &mut self,
        full_access_key: &KeyPair,
    ) -> Result<ExecutionOutcome, KeypomError> {
        self.expect_state(TrialState::ExitRequested)?;

        let transaction = Transaction::single(
            self.account_id.clone(),
            FunctionCall::new(
                "exit_trial",
                &json!({ "public_key": full_access_key.public_key() }),
                EXIT_TRIAL_GAS,
                0,
            )?,
        );
        let outcome = self
            .sender
            .send_transaction(&self.account_id, &transaction)
            .await?;
        if let ExecutionStatus::Failure { message, .. } = &outcome.status {
            return Err(KeypomError::TransactionFailed {
                index: 0,
                receiver_id: self.account_id.to_string(),
                confirmed: 0,
                error: message.clone(),
            });
        }

        self.key_store.remove_key(self.network, &self.account_id)?;
        self.key_store
            .set_key(self.network, &self.account_id, full_access_key.clone())?;
        self.state = TrialState::Converted;
        tracing::info!(
            account_id = %self.account_id,
            public_key = %full_access_key.public_key(),
            "trial account converted"
        );
        Ok(outcome)
    }

    /// Discards the session and forgets the trial key. A converted account keeps its full access
    /// key.
    ///
    /// # Errors
    /// Fails if the key store cannot remove the key. The session is invalid either way.
    pub fn invalidate(&mut self) -> Result<(), KeypomError> {
        let converted = self.state == TrialState::Converted;
        self.state = TrialState::Invalid;
        if converted {
            return Ok(());
        }
        self.key_store.remove_key(self.network, &self.account_id)
    }

    fn expect_state(&self, expected: TrialState) -> Result<(), KeypomError> {
        if self.state == expected {
            return Ok(());
        }
        Err(KeypomError::InvalidTrialState {
            expected: expected.to_string(),
            found: self.state.to_string(),
        })
    }
}
