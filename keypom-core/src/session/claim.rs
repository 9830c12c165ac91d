use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::{
    error::KeypomError,
    keys::{passwords::hash_password_for_claim, KeyPair, PublicKey},
    ledger::FunctionCall,
    orchestrator::{BatchBuilder, CLAIM_GAS},
    primitives::AccountId,
};

use super::{Keypom, OperationResult};

/// Who receives the assets of a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimTarget {
    /// An existing account.
    Existing(AccountId),
    /// A new account, created by the drop and controlled by `new_public_key`.
    NewAccount {
        /// The account to create.
        new_account_id: AccountId,
        /// Full access key of the new account.
        new_public_key: PublicKey,
    },
}

/// Parameters of [`Keypom::claim`].
#[derive(Debug)]
pub struct Claim {
    secret_key: SecretString,
    target: ClaimTarget,
    password: Option<SecretString>,
    fc_args: Option<Vec<Option<String>>>,
    return_transactions: bool,
}

impl Claim {
    /// Claims with the linkdrop `secret_key` into the existing `account_id`.
    pub fn to_account(secret_key: impl Into<String>, account_id: AccountId) -> Self {
        Self::new(secret_key, ClaimTarget::Existing(account_id))
    }

    /// Claims with the linkdrop `secret_key` into a new account.
    pub fn new_account(
        secret_key: impl Into<String>,
        new_account_id: AccountId,
        new_public_key: PublicKey,
    ) -> Self {
        Self::new(
            secret_key,
            ClaimTarget::NewAccount {
                new_account_id,
                new_public_key,
            },
        )
    }

    fn new(secret_key: impl Into<String>, target: ClaimTarget) -> Self {
        Self {
            secret_key: SecretString::from(secret_key.into()),
            target,
            password: None,
            fc_args: None,
            return_transactions: false,
        }
    }

    /// Base password of a password protected drop. The per-use hash is computed from it.
    #[must_use]
    pub fn with_password(mut self, base_password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(base_password.into()));
        self
    }

    /// User arguments for the methods of a function call drop, one entry per method.
    #[must_use]
    pub fn with_fc_args(mut self, fc_args: Vec<Option<String>>) -> Self {
        self.fc_args = Some(fc_args);
        self
    }

    /// Builds the claim transaction without sending it.
    #[must_use]
    pub const fn returning_transactions(mut self) -> Self {
        self.return_transactions = true;
        self
    }

    /// Who receives the assets.
    #[must_use]
    pub const fn target(&self) -> &ClaimTarget {
        &self.target
    }
}

#[skip_serializing_none]
#[derive(Serialize)]
struct ClaimArgs<'a> {
    account_id: Option<&'a AccountId>,
    new_account_id: Option<&'a AccountId>,
    new_public_key: Option<&'a PublicKey>,
    password: Option<String>,
    fc_args: Option<&'a [Option<String>]>,
}

impl Keypom {
    /// Claims one use of a linkdrop.
    ///
    /// The claim is signed by the Keypom contract with the linkdrop key, which is placed in the
    /// key store right before sending. A session without a funder can claim.
    ///
    /// # Errors
    /// - `ReadOnlySession` without a sender, unless transactions are only returned.
    /// - `InvalidKey` for a malformed secret key, `ContractError` if the key is not registered.
    /// - `TransactionFailed` if the contract rejects the claim.
    pub async fn claim(&self, params: Claim) -> Result<OperationResult, KeypomError> {
        self.require_sender("claim", params.return_transactions)?;

        let key_pair: KeyPair = params.secret_key.expose_secret().parse()?;
        let public_key = key_pair.public_key();
        let key_info = self.registry().get_key_information(&public_key).await?;

        let password = params.password.as_ref().map(|base_password| {
            hash_password_for_claim(
                base_password.expose_secret(),
                &public_key,
                key_info.cur_key_use,
            )
        });
        let (method_name, args) = match &params.target {
            ClaimTarget::Existing(account_id) => (
                "claim",
                ClaimArgs {
                    account_id: Some(account_id),
                    new_account_id: None,
                    new_public_key: None,
                    password,
                    fc_args: params.fc_args.as_deref(),
                },
            ),
            ClaimTarget::NewAccount {
                new_account_id,
                new_public_key,
            } => (
                "create_account_and_claim",
                ClaimArgs {
                    account_id: None,
                    new_account_id: Some(new_account_id),
                    new_public_key: Some(new_public_key),
                    password,
                    fc_args: params.fc_args.as_deref(),
                },
            ),
        };

        let gas = key_info
            .required_gas
            .filter(|&gas| gas > 0)
            .unwrap_or(CLAIM_GAS);
        let batch = BatchBuilder::new(
            self.keypom_contract_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .keypom_call(FunctionCall::new(method_name, &args, gas, 0)?)
        .build();

        if !params.return_transactions {
            self.key_store
                .set_key(self.network(), self.keypom_contract_id(), key_pair)?;
        }

        tracing::info!(
            drop_id = %key_info.drop_id,
            %public_key,
            key_use = key_info.cur_key_use,
            method_name,
            "claiming"
        );
        let outcomes = self
            .dispatch("claim", &batch, params.return_transactions)
            .await?;

        Ok(OperationResult {
            drop_id: Some(key_info.drop_id),
            keys: None,
            required_deposit: 0,
            estimated_deposit: 0,
            batch,
            outcomes,
        })
    }
}
