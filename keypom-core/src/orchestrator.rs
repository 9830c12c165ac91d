//! Ordered transaction batches and their fail-fast execution.
//!
//! A batch is a saga: every step is confirmed on chain before the next one is sent, and nothing
//! is rolled back when a step fails. Every step is keyed by the drop id, so a caller recovers by
//! replaying the missing steps (for instance [`crate::Keypom::ft_transfer_call`] after a failed
//! token transfer) or by deleting the orphaned drop.
//!
//! Steps always run in this order:
//!
//! 1. the Keypom calls establishing state (`create_drop`, `add_keys`, `refund_assets` then
//!    `delete_keys`, ...), one transaction each,
//! 2. asset transfers (`ft_transfer_call`, `nft_transfer_call`), each carrying the drop id as
//!    `msg`,
//! 3. `withdraw_from_balance`.
//!
//! Each step is its own transaction so that no transaction exceeds the 300 TGas a transaction
//! can carry.

use serde_json::json;

use crate::{
    error::KeypomError,
    ledger::{
        ExecutionOutcome, ExecutionStatus, FunctionCall, Transaction, TransactionBatch,
        TransactionSender,
    },
    primitives::{AccountId, Balance, Gas, ONE_YOCTO, TGAS},
};

/// Gas attached to `create_drop`.
pub const CREATE_DROP_GAS: Gas = 250 * TGAS;
/// Gas attached to `add_keys`.
pub const ADD_KEYS_GAS: Gas = 250 * TGAS;
/// Gas attached to `delete_keys`.
pub const DELETE_KEYS_GAS: Gas = 300 * TGAS;
/// Gas attached to `refund_assets`.
pub const REFUND_ASSETS_GAS: Gas = 50 * TGAS;
/// Gas attached to `withdraw_from_balance`.
pub const WITHDRAW_GAS: Gas = 50 * TGAS;
/// Gas attached to `add_to_balance`.
pub const ADD_TO_BALANCE_GAS: Gas = 100 * TGAS;
/// Gas attached to `ft_transfer_call`.
pub const FT_TRANSFER_CALL_GAS: Gas = 50 * TGAS;
/// Gas attached to `nft_transfer_call`.
pub const NFT_TRANSFER_CALL_GAS: Gas = 50 * TGAS;
/// Gas attached to a claim when the key does not require more.
pub const CLAIM_GAS: Gas = 100 * TGAS;
/// Keys the contract accepts in one `create_drop`, `add_keys` or `delete_keys` call.
pub const MAX_KEYS_PER_CALL: usize = 100;

/// Builds a [`TransactionBatch`] in the fixed step order, whatever order steps are added in.
#[derive(Debug)]
pub struct BatchBuilder {
    signer_id: AccountId,
    keypom_contract_id: AccountId,
    keypom_actions: Vec<FunctionCall>,
    transfers: Vec<Transaction>,
    withdraw: Option<FunctionCall>,
    required_deposit: Balance,
}

impl BatchBuilder {
    /// An empty batch signed by `signer_id` against the Keypom contract `keypom_contract_id`.
    #[must_use]
    pub const fn new(signer_id: AccountId, keypom_contract_id: AccountId) -> Self {
        Self {
            signer_id,
            keypom_contract_id,
            keypom_actions: Vec::new(),
            transfers: Vec::new(),
            withdraw: None,
            required_deposit: 0,
        }
    }

    /// Appends a Keypom call. Keypom calls run first, in the order they were added.
    #[must_use]
    pub fn keypom_call(mut self, action: FunctionCall) -> Self {
        self.keypom_actions.push(action);
        self
    }

    /// Adds an `ft_transfer_call` of `amount` tokens to Keypom, attributed to `drop_id`.
    ///
    /// # Errors
    /// Returns `SerializationError` if the arguments cannot be encoded.
    pub fn ft_transfer_call(
        mut self,
        ft_contract_id: AccountId,
        amount: u128,
        drop_id: &str,
    ) -> Result<Self, KeypomError> {
        let action = FunctionCall::new(
            "ft_transfer_call",
            &json!({
                "receiver_id": self.keypom_contract_id,
                "amount": amount.to_string(),
                "msg": drop_id,
            }),
            FT_TRANSFER_CALL_GAS,
            ONE_YOCTO,
        )?;
        self.transfers.push(Transaction::single(ft_contract_id, action));
        Ok(self)
    }

    /// Adds one `nft_transfer_call` per token to Keypom, attributed to `drop_id`.
    ///
    /// # Errors
    /// Returns `SerializationError` if the arguments cannot be encoded.
    pub fn nft_transfer_calls(
        mut self,
        nft_contract_id: &AccountId,
        token_ids: &[String],
        drop_id: &str,
    ) -> Result<Self, KeypomError> {
        for token_id in token_ids {
            let action = FunctionCall::new(
                "nft_transfer_call",
                &json!({
                    "receiver_id": self.keypom_contract_id,
                    "token_id": token_id,
                    "msg": drop_id,
                }),
                NFT_TRANSFER_CALL_GAS,
                ONE_YOCTO,
            )?;
            self.transfers
                .push(Transaction::single(nft_contract_id.clone(), action));
        }
        Ok(self)
    }

    /// Withdraws the signer's Keypom balance as the last step.
    ///
    /// # Errors
    /// Returns `SerializationError` if the arguments cannot be encoded.
    pub fn withdraw_balance(mut self) -> Result<Self, KeypomError> {
        self.withdraw = Some(FunctionCall::new(
            "withdraw_from_balance",
            &json!({}),
            WITHDRAW_GAS,
            0,
        )?);
        Ok(self)
    }

    /// Records the NEAR deposit the operation requires.
    #[must_use]
    pub const fn required_deposit(mut self, required_deposit: Balance) -> Self {
        self.required_deposit = required_deposit;
        self
    }

    /// Assembles the batch.
    #[must_use]
    pub fn build(self) -> TransactionBatch {
        let keypom_contract_id = self.keypom_contract_id;
        let transactions = self
            .keypom_actions
            .into_iter()
            .map(|action| Transaction::single(keypom_contract_id.clone(), action))
            .chain(self.transfers)
            .chain(
                self.withdraw
                    .map(|action| Transaction::single(keypom_contract_id.clone(), action)),
            )
            .collect();

        TransactionBatch {
            signer_id: self.signer_id,
            transactions,
            required_deposit: self.required_deposit,
        }
    }
}

/// Sends every transaction of `batch` in order, waiting for each outcome before the next.
///
/// Stops at the first failure. Transactions confirmed before it stay on chain.
///
/// # Errors
/// Returns `TransactionFailed` with the failing index and the number of confirmed steps.
pub async fn execute_batch(
    sender: &dyn TransactionSender,
    batch: &TransactionBatch,
) -> Result<Vec<ExecutionOutcome>, KeypomError> {
    let mut outcomes = Vec::with_capacity(batch.len());

    for (index, transaction) in batch.transactions.iter().enumerate() {
        tracing::debug!(
            index,
            receiver_id = %transaction.receiver_id,
            actions = transaction.actions.len(),
            "sending transaction"
        );

        let failed = |error: String| KeypomError::TransactionFailed {
            index,
            receiver_id: transaction.receiver_id.to_string(),
            confirmed: index,
            error,
        };

        let outcome = sender
            .send_transaction(&batch.signer_id, transaction)
            .await
            .map_err(|err| failed(err.to_string()))?;

        if let ExecutionStatus::Failure { message, .. } = &outcome.status {
            tracing::warn!(
                index,
                receiver_id = %transaction.receiver_id,
                confirmed = index,
                "transaction failed, stopping batch"
            );
            return Err(failed(message.clone()));
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    fn account(id: &str) -> AccountId {
        id.parse().unwrap()
    }

    fn keypom_call(method: &str) -> FunctionCall {
        FunctionCall::new(method, &json!({}), TGAS, 0).unwrap()
    }

    fn order(batch: &TransactionBatch) -> Vec<(String, String)> {
        batch
            .actions()
            .map(|(receiver, action)| (receiver.to_string(), action.method_name.clone()))
            .collect()
    }

    #[test]
    fn test_keypom_calls_keep_their_order_and_withdraw_is_last() {
        let batch = BatchBuilder::new(account("alice.near"), account("v2.keypom.near"))
            .withdraw_balance()
            .unwrap()
            .keypom_call(keypom_call("refund_assets"))
            .keypom_call(keypom_call("delete_keys"))
            .build();

        assert_eq!(batch.len(), 3);
        assert!(batch.transactions.iter().all(|tx| tx.actions.len() == 1));
        assert_eq!(
            order(&batch)
                .into_iter()
                .map(|(_, method)| method)
                .collect::<Vec<_>>(),
            vec!["refund_assets", "delete_keys", "withdraw_from_balance"]
        );
    }

    #[test]
    fn test_transfers_follow_keypom_call_and_precede_withdraw() {
        let batch = BatchBuilder::new(account("alice.near"), account("v2.keypom.near"))
            .withdraw_balance()
            .unwrap()
            .nft_transfer_calls(
                &account("nft.near"),
                &["1".to_string(), "2".to_string()],
                "42",
            )
            .unwrap()
            .keypom_call(keypom_call("create_drop"))
            .build();

        assert_eq!(
            order(&batch),
            vec![
                ("v2.keypom.near".to_string(), "create_drop".to_string()),
                ("nft.near".to_string(), "nft_transfer_call".to_string()),
                ("nft.near".to_string(), "nft_transfer_call".to_string()),
                (
                    "v2.keypom.near".to_string(),
                    "withdraw_from_balance".to_string()
                ),
            ]
        );
        let transfer = &batch.transactions[1].actions[0];
        assert_eq!(transfer.deposit, ONE_YOCTO);
        assert_eq!(
            transfer.args,
            json!({"receiver_id": "v2.keypom.near", "token_id": "1", "msg": "42"})
        );
    }

    #[test]
    fn test_ft_transfer_call_args() {
        let batch = BatchBuilder::new(account("alice.near"), account("v2.keypom.near"))
            .ft_transfer_call(account("ft.near"), 1_000, "7")
            .unwrap()
            .build();
        let action = &batch.transactions[0].actions[0];
        assert_eq!(action.method_name, "ft_transfer_call");
        assert_eq!(action.gas, FT_TRANSFER_CALL_GAS);
        assert_eq!(
            action.args,
            json!({"receiver_id": "v2.keypom.near", "amount": "1000", "msg": "7"})
        );
    }

    /// Fails the transaction at `fail_at`, records everything it receives.
    struct ScriptedSender {
        fail_at: usize,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransactionSender for ScriptedSender {
        async fn send_transaction(
            &self,
            _signer_id: &AccountId,
            transaction: &Transaction,
        ) -> Result<ExecutionOutcome, KeypomError> {
            let mut sent = self.sent.lock().unwrap();
            let index = sent.len();
            sent.push(transaction.actions[0].method_name.clone());
            if index == self.fail_at {
                return Ok(ExecutionOutcome::failure(
                    None,
                    transaction.receiver_id.clone(),
                    "Smart contract panicked",
                ));
            }
            Ok(ExecutionOutcome::success(
                Some(format!("hash{index}")),
                transaction.receiver_id.clone(),
                None,
            ))
        }
    }

    #[tokio::test]
    async fn test_execution_stops_at_first_failure() {
        let batch = BatchBuilder::new(account("alice.near"), account("v2.keypom.near"))
            .keypom_call(keypom_call("create_drop"))
            .nft_transfer_calls(
                &account("nft.near"),
                &["1".to_string(), "2".to_string()],
                "42",
            )
            .unwrap()
            .build();
        let sender = ScriptedSender {
            fail_at: 1,
            sent: Mutex::new(Vec::new()),
        };

        let err = execute_batch(&sender, &batch).await.unwrap_err();
        match err {
            KeypomError::TransactionFailed {
                index, confirmed, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(confirmed, 1);
            }
            other => panic!("expected TransactionFailed, got {other:?}"),
        }
        assert_eq!(
            *sender.sent.lock().unwrap(),
            vec!["create_drop", "nft_transfer_call"]
        );
    }

    #[tokio::test]
    async fn test_execution_returns_all_outcomes() {
        let batch = BatchBuilder::new(account("alice.near"), account("v2.keypom.near"))
            .keypom_call(keypom_call("add_keys"))
            .ft_transfer_call(account("ft.near"), 5, "1")
            .unwrap()
            .build();
        let sender = ScriptedSender {
            fail_at: usize::MAX,
            sent: Mutex::new(Vec::new()),
        };
        let outcomes = execute_batch(&sender, &batch).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(ExecutionOutcome::is_success));
    }
}
