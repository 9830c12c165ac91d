//! The boundary to the NEAR ledger.
//!
//! The SDK never signs nor broadcasts anything itself. The host supplies a [`ViewClient`] for
//! reads (or uses [`RpcClient`]), a [`TransactionSender`] that signs and submits
//! [`Transaction`]s, and a [`KeyStore`] the sender looks signing keys up in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    error::KeypomError,
    keys::KeyPair,
    primitives::{AccountId, Balance, Gas},
    Network,
};

mod key_store;
mod rpc;

pub use key_store::InMemoryKeyStore;
pub use rpc::RpcClient;

/// Read-only access to contract state.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ViewClient: Send + Sync {
    /// Calls view method `method_name` of `contract_id` with JSON `args` and returns its JSON
    /// result.
    async fn view_function(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: Value,
    ) -> Result<Value, KeypomError>;

    /// Returns the liquid balance of `account_id` in yoctoNEAR.
    async fn account_balance(&self, account_id: &AccountId) -> Result<Balance, KeypomError>;
}

/// Signs and submits transactions.
///
/// Implementations look the signing key of `signer_id` up in the session's [`KeyStore`], submit
/// the transaction and wait for its final outcome. A transaction rejected on chain is reported as
/// a failed [`ExecutionOutcome`]; `Err` is reserved for transport failures.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait TransactionSender: Send + Sync {
    /// Signs `transaction` as `signer_id` and submits it.
    async fn send_transaction(
        &self,
        signer_id: &AccountId,
        transaction: &Transaction,
    ) -> Result<ExecutionOutcome, KeypomError>;
}

/// Storage for signing keys, keyed by network and account.
pub trait KeyStore: Send + Sync {
    /// Stores `key_pair` for `account_id`, replacing any previous key.
    ///
    /// # Errors
    /// Host implementations may fail to persist the key.
    fn set_key(
        &self,
        network: Network,
        account_id: &AccountId,
        key_pair: KeyPair,
    ) -> Result<(), KeypomError>;

    /// Returns the key stored for `account_id`, if any.
    ///
    /// # Errors
    /// Host implementations may fail to read their storage.
    fn get_key(
        &self,
        network: Network,
        account_id: &AccountId,
    ) -> Result<Option<KeyPair>, KeypomError>;

    /// Removes the key stored for `account_id`.
    ///
    /// # Errors
    /// Host implementations may fail to update their storage.
    fn remove_key(&self, network: Network, account_id: &AccountId) -> Result<(), KeypomError>;
}

/// A function call action.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The method to call.
    pub method_name: String,
    /// JSON arguments.
    pub args: Value,
    /// Prepaid gas.
    #[serde_as(as = "DisplayFromStr")]
    pub gas: Gas,
    /// Attached deposit in yoctoNEAR.
    #[serde_as(as = "DisplayFromStr")]
    pub deposit: Balance,
}

impl FunctionCall {
    /// Builds a function call with `args` serialized to JSON.
    ///
    /// # Errors
    /// Returns `SerializationError` if `args` cannot be represented as JSON.
    pub fn new(
        method_name: impl Into<String>,
        args: &impl Serialize,
        gas: Gas,
        deposit: Balance,
    ) -> Result<Self, KeypomError> {
        Ok(Self {
            method_name: method_name.into(),
            args: serde_json::to_value(args)?,
            gas,
            deposit,
        })
    }
}

/// An unsigned transaction: a receiver and the ordered actions executed against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The account the actions run against.
    pub receiver_id: AccountId,
    /// Actions, executed in order.
    pub actions: Vec<FunctionCall>,
}

impl Transaction {
    /// A transaction holding a single function call.
    #[must_use]
    pub fn single(receiver_id: AccountId, action: FunctionCall) -> Self {
        Self {
            receiver_id,
            actions: vec![action],
        }
    }

    /// Sum of the deposits attached to the actions.
    ///
    /// # Errors
    /// Returns `ArithmeticOverflow` if the sum exceeds `u128::MAX`.
    pub fn total_deposit(&self) -> Result<Balance, KeypomError> {
        self.actions.iter().try_fold(0u128, |acc, action| {
            acc.checked_add(action.deposit)
                .ok_or_else(|| KeypomError::overflow("transaction deposit"))
        })
    }
}

/// Who rejected a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The ledger or a contract rejected the transaction.
    Execution,
    /// The trial account policy rejected the call before it was sent.
    PolicyViolation,
}

/// Final status of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The last action returned `value` (JSON), if it returned anything.
    SuccessValue(Option<Value>),
    /// The transaction failed.
    Failure {
        /// Where the failure came from.
        kind: FailureKind,
        /// Human readable reason.
        message: String,
    },
}

/// The outcome of a submitted transaction, or the sentinel outcome of a call that was never sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Hash of the transaction, absent for calls that never reached the network.
    pub transaction_hash: Option<String>,
    /// Receiver of the transaction.
    pub receiver_id: AccountId,
    /// Final status.
    pub status: ExecutionStatus,
}

/// Message carried by every policy rejection outcome.
pub const POLICY_REJECTION_MESSAGE: &str =
    "call rejected by the trial account policy; nothing was sent";

impl ExecutionOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn success(
        transaction_hash: Option<String>,
        receiver_id: AccountId,
        value: Option<Value>,
    ) -> Self {
        Self {
            transaction_hash,
            receiver_id,
            status: ExecutionStatus::SuccessValue(value),
        }
    }

    /// An outcome rejected by the ledger.
    #[must_use]
    pub fn failure(
        transaction_hash: Option<String>,
        receiver_id: AccountId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transaction_hash,
            receiver_id,
            status: ExecutionStatus::Failure {
                kind: FailureKind::Execution,
                message: message.into(),
            },
        }
    }

    /// The fixed outcome reported for calls the trial policy refused to send.
    #[must_use]
    pub fn policy_rejection(receiver_id: AccountId) -> Self {
        Self {
            transaction_hash: None,
            receiver_id,
            status: ExecutionStatus::Failure {
                kind: FailureKind::PolicyViolation,
                message: POLICY_REJECTION_MESSAGE.to_string(),
            },
        }
    }

    /// Whether the execution succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::SuccessValue(_))
    }

    /// Whether this is the sentinel outcome of a policy rejection.
    #[must_use]
    pub const fn is_policy_rejection(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Failure {
                kind: FailureKind::PolicyViolation,
                ..
            }
        )
    }

    /// The returned JSON value of a successful execution.
    #[must_use]
    pub const fn success_value(&self) -> Option<&Value> {
        match &self.status {
            ExecutionStatus::SuccessValue(value) => value.as_ref(),
            ExecutionStatus::Failure { .. } => None,
        }
    }
}

/// An ordered, unsent batch of transactions signed by one account.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBatch {
    /// The account that signs every transaction of the batch.
    pub signer_id: AccountId,
    /// Transactions, sent strictly in order.
    pub transactions: Vec<Transaction>,
    /// NEAR deposit the Keypom contract requires for the operation, in yoctoNEAR. Zero when the
    /// operation is paid from the funder's Keypom balance.
    pub required_deposit: Balance,
}

impl TransactionBatch {
    /// Number of transactions in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the batch holds no transaction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// All actions of the batch, in execution order, with their receivers.
    pub fn actions(&self) -> impl Iterator<Item = (&AccountId, &FunctionCall)> {
        self.transactions.iter().flat_map(|transaction| {
            transaction
                .actions
                .iter()
                .map(move |action| (&transaction.receiver_id, action))
        })
    }
}
