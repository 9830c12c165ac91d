//! The `Keypom` session handle.
//!
//! A session binds a network, a Keypom contract, the host's ledger clients and, optionally, a
//! funder. It replaces process-wide SDK state: several sessions can coexist, and the funder is
//! changed explicitly with [`Keypom::update_funder`]. A session is not synchronized; callers
//! serialize mutating calls themselves.

use std::sync::Arc;

use crate::{
    config::{Funder, FunderConfig, KeypomConfig},
    defaults::NetworkConfig,
    drops::DropRegistry,
    error::KeypomError,
    estimator::EstimatorConfig,
    keys::GeneratedKeys,
    ledger::{
        ExecutionOutcome, KeyStore, RpcClient, TransactionBatch, TransactionSender, ViewClient,
    },
    orchestrator::execute_batch,
    primitives::{AccountId, Balance},
    trial::TrialAccount,
    Network,
};

mod balance;
mod claim;
mod drop_ops;

pub use claim::{Claim, ClaimTarget};
pub use drop_ops::{AddKeys, CreateDrop, DeleteDrops, DeleteKeys};

/// What a mutating operation produced.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// The drop the operation acted on, if any.
    pub drop_id: Option<String>,
    /// Keys generated by the operation. `None` when the caller supplied public keys.
    pub keys: Option<GeneratedKeys>,
    /// NEAR attached to the Keypom call, in yoctoNEAR. Zero when paid from the Keypom balance.
    pub required_deposit: Balance,
    /// What the operation costs in yoctoNEAR, whether attached or paid from the Keypom balance.
    pub estimated_deposit: Balance,
    /// The ordered transactions of the operation.
    pub batch: TransactionBatch,
    /// One outcome per transaction. `None` when the transactions were only returned.
    pub outcomes: Option<Vec<ExecutionOutcome>>,
}

/// A Keypom client session.
pub struct Keypom {
    network: NetworkConfig,
    view: Arc<dyn ViewClient>,
    sender: Option<Arc<dyn TransactionSender>>,
    key_store: Arc<dyn KeyStore>,
    funder: Option<Funder>,
    estimator: EstimatorConfig,
    registry: DropRegistry,
}

impl std::fmt::Debug for Keypom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypom")
            .field("network", &self.network)
            .field("funder", &self.funder)
            .field("read_only", &self.sender.is_none())
            .finish_non_exhaustive()
    }
}

impl Keypom {
    /// Opens a session using the host's ledger clients.
    ///
    /// Without a `sender` the session can only read and return unsent transactions. The funder's
    /// key, if any, is placed in `key_store`.
    ///
    /// # Errors
    /// Fails if the configuration or the funder credentials are invalid.
    pub fn new(
        config: KeypomConfig,
        view: Arc<dyn ViewClient>,
        sender: Option<Arc<dyn TransactionSender>>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self, KeypomError> {
        let network = config.network_config()?;
        let registry = DropRegistry::new(view.clone(), network.keypom_contract_id.clone());

        let mut session = Self {
            network,
            view,
            sender,
            key_store,
            funder: None,
            estimator: EstimatorConfig::default(),
            registry,
        };
        if let Some(funder) = config.funder {
            session.update_funder(funder)?;
        }

        tracing::info!(
            network = %session.network.network,
            keypom_contract_id = %session.network.keypom_contract_id,
            funder = ?session.funder.as_ref().map(Funder::account_id),
            "keypom session initialized"
        );
        Ok(session)
    }

    /// Opens a session reading through the configured JSON-RPC endpoint.
    ///
    /// # Errors
    /// Fails if the configuration or the funder credentials are invalid.
    pub fn connect(
        config: KeypomConfig,
        sender: Option<Arc<dyn TransactionSender>>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self, KeypomError> {
        let rpc_url = config.network_config()?.rpc_url;
        Self::new(config, Arc::new(RpcClient::new(rpc_url)), sender, key_store)
    }

    /// Replaces the estimator constants.
    #[must_use]
    pub fn with_estimator_config(mut self, estimator: EstimatorConfig) -> Self {
        self.estimator = estimator;
        self
    }

    /// Replaces the funder. Its key is placed in the key store.
    ///
    /// # Errors
    /// Fails if the credentials are invalid or the key store rejects the key.
    pub fn update_funder(&mut self, funder: FunderConfig) -> Result<(), KeypomError> {
        let funder = Funder::try_from(funder)?;
        self.key_store.set_key(
            self.network.network,
            funder.account_id(),
            funder.key_pair().clone(),
        )?;
        tracing::info!(funder = %funder.account_id(), "funder updated");
        self.funder = Some(funder);
        Ok(())
    }

    /// The network of the session.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network.network
    }

    /// The Keypom contract every drop operation targets.
    #[must_use]
    pub const fn keypom_contract_id(&self) -> &AccountId {
        &self.network.keypom_contract_id
    }

    /// The current funder, if any.
    #[must_use]
    pub const fn funder(&self) -> Option<&Funder> {
        self.funder.as_ref()
    }

    /// Estimator constants in use.
    #[must_use]
    pub const fn estimator_config(&self) -> &EstimatorConfig {
        &self.estimator
    }

    /// Read-only views of the Keypom contract.
    #[must_use]
    pub const fn registry(&self) -> &DropRegistry {
        &self.registry
    }

    /// Opens a trial account session for `trial_account_id` with its restricted `secret_key`,
    /// loading the account's rules.
    ///
    /// # Errors
    /// Fails if the key is malformed, the session has no sender or the rules cannot be read.
    pub async fn trial_account(
        &self,
        trial_account_id: AccountId,
        secret_key: &str,
    ) -> Result<TrialAccount, KeypomError> {
        let sender = self.sender.clone().ok_or_else(|| KeypomError::ReadOnlySession {
            operation: "use a trial account".to_string(),
        })?;
        TrialAccount::load(
            self.network.network,
            trial_account_id,
            secret_key.parse()?,
            self.view.clone(),
            sender,
            self.key_store.clone(),
        )
        .await
    }

    pub(crate) fn require_funder(&self, operation: &str) -> Result<&Funder, KeypomError> {
        self.funder.as_ref().ok_or_else(|| KeypomError::NoFunder {
            operation: operation.to_string(),
        })
    }

    /// Fails early when the operation would have to send transactions but cannot.
    pub(crate) fn require_sender(
        &self,
        operation: &str,
        return_transactions: bool,
    ) -> Result<(), KeypomError> {
        if !return_transactions && self.sender.is_none() {
            return Err(KeypomError::ReadOnlySession {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Sends `batch`, or hands it back untouched when `return_transactions` is set.
    pub(crate) async fn dispatch(
        &self,
        operation: &str,
        batch: &TransactionBatch,
        return_transactions: bool,
    ) -> Result<Option<Vec<ExecutionOutcome>>, KeypomError> {
        if return_transactions {
            tracing::debug!(operation, transactions = batch.len(), "returning transactions");
            return Ok(None);
        }
        let sender = self.sender.as_deref().ok_or_else(|| KeypomError::ReadOnlySession {
            operation: operation.to_string(),
        })?;

        tracing::info!(
            operation,
            signer_id = %batch.signer_id,
            transactions = batch.len(),
            required_deposit = %batch.required_deposit,
            "dispatching batch"
        );
        execute_batch(sender, batch).await.map(Some)
    }
}
