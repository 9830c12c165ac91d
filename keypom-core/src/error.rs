use thiserror::Error;

/// Error outputs from `Keypom`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum KeypomError {
    /// The session was initialized without a funder, so drops cannot be created or modified.
    #[error("no_funder: initialize the session with a funder to {operation}")]
    NoFunder {
        /// The operation that required a funder.
        operation: String,
    },
    /// The session has no transaction sender attached; only read-only calls are possible.
    #[error("read_only_session: a transaction sender is required to {operation}")]
    ReadOnlySession {
        /// The operation that required a sender.
        operation: String,
    },
    /// A required identifying parameter was not provided.
    #[error("missing_parameter: {parameter}")]
    MissingParameter {
        /// Name of the missing parameter.
        parameter: String,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input: {attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
    /// The caller does not own the drop it tries to modify.
    #[error("not_drop_owner: drop {drop_id} is owned by {owner_id}, not {caller_id}")]
    NotDropOwner {
        /// The drop being modified.
        drop_id: String,
        /// The account that owns the drop.
        owner_id: String,
        /// The account that attempted the modification.
        caller_id: String,
    },
    /// More keys were requested in a single call than the contract accepts.
    #[error("too_many_keys: {requested} requested, at most {max} per call")]
    TooManyKeys {
        /// Number of keys requested.
        requested: usize,
        /// Maximum accepted per call.
        max: usize,
    },
    /// The funder's Keypom balance does not cover the required deposit.
    #[error("insufficient_balance: required {required} yoctoNEAR, available {available}")]
    InsufficientBalance {
        /// Required amount in yoctoNEAR.
        required: u128,
        /// Available amount in yoctoNEAR.
        available: u128,
    },
    /// The funder does not hold enough fungible tokens to fund the drop.
    #[error("insufficient_ft_balance: {contract_id} requires {required}, available {available}")]
    InsufficientFtBalance {
        /// The fungible token contract.
        contract_id: String,
        /// Required amount in the token's smallest unit.
        required: u128,
        /// Available amount in the token's smallest unit.
        available: u128,
    },
    /// Network connection error with details
    #[error("network_error: {url}: {error}")]
    NetworkError {
        /// The URL that was requested
        url: String,
        /// The HTTP status code of the response, if any
        status: Option<u16>,
        /// The error message
        error: String,
    },
    /// A view call was rejected by the contract.
    #[error("contract_error: {contract_id}::{method_name}: {error}")]
    ContractError {
        /// The contract that was called.
        contract_id: String,
        /// The method that was called.
        method_name: String,
        /// The error reported by the node.
        error: String,
    },
    /// A transaction of an orchestrated batch failed. Later transactions were not sent.
    #[error("transaction_failed: step {index} to {receiver_id} failed after {confirmed} confirmed: {error}")]
    TransactionFailed {
        /// Position of the failed transaction in the batch.
        index: usize,
        /// Receiver of the failed transaction.
        receiver_id: String,
        /// Number of transactions of the batch already confirmed on chain.
        confirmed: usize,
        /// The failure reported by the ledger.
        error: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// The error message
        error: String,
    },
    /// A key could not be parsed or derived.
    #[error("invalid_key: {reason}")]
    InvalidKey {
        /// The reason the key is invalid
        reason: String,
    },
    /// Key generation produced the same public key twice.
    #[error("key_collision: {public_key}")]
    KeyCollision {
        /// The duplicated public key.
        public_key: String,
    },
    /// An amount computation exceeded the 128-bit range.
    #[error("arithmetic_overflow: {context}")]
    ArithmeticOverflow {
        /// Which computation overflowed.
        context: String,
    },
    /// The trial account session is not in a state that allows the operation.
    #[error("invalid_trial_state: expected {expected}, found {found}")]
    InvalidTrialState {
        /// The state the operation requires.
        expected: String,
        /// The state the session is in.
        found: String,
    },
    /// HTTP request failure
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl From<serde_json::Error> for KeypomError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}

impl KeypomError {
    pub(crate) fn invalid_input(
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(context: &str) -> Self {
        Self::ArithmeticOverflow {
            context: context.to_string(),
        }
    }
}

/// Result type used throughout the crate.
pub type KeypomResult<T, E = KeypomError> = std::result::Result<T, E>;
