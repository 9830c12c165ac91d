use serde_json::json;

use crate::{
    error::KeypomError,
    ledger::FunctionCall,
    orchestrator::{BatchBuilder, ADD_TO_BALANCE_GAS},
    primitives::{AccountId, Balance},
};

use super::{Keypom, OperationResult};

impl Keypom {
    /// Deposits `amount` yoctoNEAR into the funder's Keypom balance.
    ///
    /// # Errors
    /// Fails without a funder or sender, or if the transaction fails.
    pub async fn add_to_balance(
        &self,
        amount: Balance,
        return_transactions: bool,
    ) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("add to balance")?;
        self.require_sender("add to balance", return_transactions)?;
        if amount == 0 {
            return Err(KeypomError::invalid_input("amount", "must be positive"));
        }

        let batch = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .keypom_call(FunctionCall::new(
            "add_to_balance",
            &json!({}),
            ADD_TO_BALANCE_GAS,
            amount,
        )?)
        .required_deposit(amount)
        .build();

        tracing::info!(amount = %amount, "adding to keypom balance");
        let outcomes = self
            .dispatch("add to balance", &batch, return_transactions)
            .await?;
        Ok(OperationResult {
            drop_id: None,
            keys: None,
            required_deposit: amount,
            estimated_deposit: amount,
            batch,
            outcomes,
        })
    }

    /// Withdraws the funder's whole Keypom balance.
    ///
    /// # Errors
    /// Fails without a funder or sender, or if the transaction fails.
    pub async fn withdraw_balance(
        &self,
        return_transactions: bool,
    ) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("withdraw balance")?;
        self.require_sender("withdraw balance", return_transactions)?;

        let batch = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .withdraw_balance()?
        .build();

        tracing::info!(funder = %funder.account_id(), "withdrawing keypom balance");
        let outcomes = self
            .dispatch("withdraw balance", &batch, return_transactions)
            .await?;
        Ok(OperationResult {
            drop_id: None,
            keys: None,
            required_deposit: 0,
            estimated_deposit: 0,
            batch,
            outcomes,
        })
    }

    /// Funds an existing fungible token drop with `amount` tokens.
    ///
    /// Used to finish a drop whose funding transfer failed after `create_drop` was confirmed.
    ///
    /// # Errors
    /// Fails without a funder or sender, with `InsufficientFtBalance` if the funder holds too few
    /// tokens, or if the transaction fails.
    pub async fn ft_transfer_call(
        &self,
        ft_contract_id: &AccountId,
        amount: u128,
        drop_id: &str,
        return_transactions: bool,
    ) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("transfer fungible tokens")?;
        self.require_sender("transfer fungible tokens", return_transactions)?;
        if amount == 0 {
            return Err(KeypomError::invalid_input("amount", "must be positive"));
        }

        let available = self
            .registry()
            .ft_balance_of(ft_contract_id, funder.account_id())
            .await?;
        if available < amount {
            return Err(KeypomError::InsufficientFtBalance {
                contract_id: ft_contract_id.to_string(),
                required: amount,
                available,
            });
        }

        let batch = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .ft_transfer_call(ft_contract_id.clone(), amount, drop_id)?
        .build();

        tracing::info!(%ft_contract_id, amount = %amount, drop_id, "funding ft drop");
        let outcomes = self
            .dispatch("transfer fungible tokens", &batch, return_transactions)
            .await?;
        Ok(OperationResult {
            drop_id: Some(drop_id.to_string()),
            keys: None,
            required_deposit: 0,
            estimated_deposit: 0,
            batch,
            outcomes,
        })
    }

    /// Sends `token_ids` of `nft_contract_id` to an existing non-fungible token drop, one
    /// transaction per token.
    ///
    /// # Errors
    /// Fails without a funder or sender, or if a transfer fails. Earlier transfers stay on chain.
    pub async fn nft_transfer_call(
        &self,
        nft_contract_id: &AccountId,
        token_ids: &[String],
        drop_id: &str,
        return_transactions: bool,
    ) -> Result<OperationResult, KeypomError> {
        let funder = self.require_funder("transfer non-fungible tokens")?;
        self.require_sender("transfer non-fungible tokens", return_transactions)?;
        if token_ids.is_empty() {
            return Err(KeypomError::MissingParameter {
                parameter: "token_ids".to_string(),
            });
        }

        let batch = BatchBuilder::new(
            funder.account_id().clone(),
            self.keypom_contract_id().clone(),
        )
        .nft_transfer_calls(nft_contract_id, token_ids, drop_id)?
        .build();

        tracing::info!(%nft_contract_id, tokens = token_ids.len(), drop_id, "funding nft drop");
        let outcomes = self
            .dispatch("transfer non-fungible tokens", &batch, return_transactions)
            .await?;
        Ok(OperationResult {
            drop_id: Some(drop_id.to_string()),
            keys: None,
            required_deposit: 0,
            estimated_deposit: 0,
            batch,
            outcomes,
        })
    }
}
