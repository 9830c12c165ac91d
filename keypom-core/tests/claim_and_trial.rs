mod common;

use common::{account, FakeKeypom, KEYPOM};
use keypom_core::{
    drops::DropConfig,
    keys::{passwords::hash_password_for_claim, KeyPair},
    ledger::KeyStore,
    primitives::ONE_NEAR,
    trial::{TrialCall, TrialState},
    Claim, CreateDrop, KeypomError, Network,
};
use secrecy::SecretString;
use serde_json::json;

async fn drop_with_one_key(fake: &std::sync::Arc<FakeKeypom>, params: CreateDrop) -> KeyPair {
    let keypom = fake.session();
    let result = keypom.create_drop(params).await.unwrap();
    fake.sent.lock().unwrap().clear();
    result.keys.unwrap().key_pairs.remove(0)
}

#[tokio::test]
async fn test_claim_to_existing_account() {
    let fake = FakeKeypom::new();
    let linkdrop = drop_with_one_key(
        &fake,
        CreateDrop {
            drop_id: Some("c".to_string()),
            num_keys: 1,
            deposit_per_use: ONE_NEAR,
            config: DropConfig {
                uses_per_key: Some(2),
                ..DropConfig::default()
            },
            ..CreateDrop::default()
        },
    )
    .await;

    // Claims do not need a funder.
    let keypom = fake.anonymous_session();
    let result = keypom
        .claim(Claim::to_account(
            linkdrop.secret_key(),
            account("bob.testnet"),
        ))
        .await
        .unwrap();

    assert_eq!(result.drop_id.as_deref(), Some("c"));
    let sent = fake.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (signer, tx) = &sent[0];
    assert_eq!(signer, &account(KEYPOM));
    assert_eq!(tx.receiver_id, account(KEYPOM));
    assert_eq!(tx.actions[0].method_name, "claim");
    assert_eq!(tx.actions[0].args, json!({ "account_id": "bob.testnet" }));
    drop(sent);

    let stored = fake
        .key_store
        .get_key(Network::Testnet, &account(KEYPOM))
        .unwrap()
        .unwrap();
    assert_eq!(stored.public_key(), linkdrop.public_key());

    let key = keypom
        .registry()
        .get_key_information(&linkdrop.public_key())
        .await
        .unwrap();
    assert_eq!(key.remaining_uses, 1);
    assert_eq!(key.cur_key_use, 2);
}

#[tokio::test]
async fn test_claim_into_new_account_with_password() {
    let fake = FakeKeypom::new();
    let linkdrop = drop_with_one_key(
        &fake,
        CreateDrop {
            drop_id: Some("pw".to_string()),
            num_keys: 1,
            deposit_per_use: ONE_NEAR,
            base_password: Some(SecretString::from("open sesame".to_string())),
            ..CreateDrop::default()
        },
    )
    .await;
    let keypom = fake.session();
    let new_key = KeyPair::from_seed(&[8u8; 32]).public_key();

    let wrong = keypom
        .claim(
            Claim::new_account(linkdrop.secret_key(), account("carol.testnet"), new_key)
                .with_password("guess"),
        )
        .await
        .unwrap_err();
    assert!(matches!(wrong, KeypomError::TransactionFailed { .. }));

    keypom
        .claim(
            Claim::new_account(linkdrop.secret_key(), account("carol.testnet"), new_key)
                .with_password("open sesame"),
        )
        .await
        .unwrap();

    let sent = fake.sent.lock().unwrap();
    let args = &sent.last().unwrap().1.actions[0].args;
    assert_eq!(sent.last().unwrap().1.actions[0].method_name, "create_account_and_claim");
    assert_eq!(
        args["password"],
        json!(hash_password_for_claim("open sesame", &linkdrop.public_key(), 1))
    );
    assert_eq!(args["new_public_key"], json!(new_key.to_string()));
    drop(sent);

    // The single use is spent, so the key is gone.
    assert!(keypom
        .registry()
        .get_key_information(&linkdrop.public_key())
        .await
        .is_err());
}

#[tokio::test]
async fn test_returned_claim_touches_nothing() {
    let fake = FakeKeypom::new();
    let linkdrop = drop_with_one_key(
        &fake,
        CreateDrop {
            drop_id: Some("r".to_string()),
            num_keys: 1,
            deposit_per_use: ONE_NEAR,
            ..CreateDrop::default()
        },
    )
    .await;
    let keypom = fake.anonymous_session();

    let result = keypom
        .claim(
            Claim::to_account(linkdrop.secret_key(), account("bob.testnet"))
                .returning_transactions(),
        )
        .await
        .unwrap();

    assert!(result.outcomes.is_none());
    assert_eq!(result.batch.transactions[0].actions[0].method_name, "claim");
    assert!(fake.sent.lock().unwrap().is_empty());
    assert!(fake
        .key_store
        .get_key(Network::Testnet, &account(KEYPOM))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_trial_account_session() {
    let fake = FakeKeypom::new();
    {
        let mut state = fake.state.lock().unwrap();
        state.trial_rules = Some(json!({
            "contracts": "guest-book.testnet",
            "methods": "add_message",
            "amounts": "0",
            "floor": (ONE_NEAR / 10).to_string(),
        }));
        state.trial_exit = true;
    }
    let keypom = fake.anonymous_session();
    let trial_key = KeyPair::from_seed(&[6u8; 32]);

    let mut trial = keypom
        .trial_account(account("trial.testnet"), &trial_key.secret_key())
        .await
        .unwrap();

    let refused = trial
        .call_method_uniform(&TrialCall::new(
            account("guest-book.testnet"),
            "delete_everything",
            json!({}),
        ))
        .await
        .unwrap();
    assert!(refused.is_policy_rejection());
    assert!(fake.sent.lock().unwrap().is_empty());

    let allowed = trial
        .call_method(
            &TrialCall::new(
                account("guest-book.testnet"),
                "add_message",
                json!({ "text": "gm" }),
            )
            .with_deposit(ONE_NEAR),
        )
        .await
        .unwrap();
    assert!(allowed.is_success());
    assert_eq!(fake.sent_methods(), vec!["execute"]);

    assert!(trial.request_exit().await.unwrap());
    let full = KeyPair::from_seed(&[7u8; 32]);
    trial.convert(&full).await.unwrap();
    assert_eq!(trial.state(), TrialState::Converted);
    assert_eq!(
        fake.key_store
            .get_key(Network::Testnet, &account("trial.testnet"))
            .unwrap()
            .unwrap()
            .public_key(),
        full.public_key()
    );
}
