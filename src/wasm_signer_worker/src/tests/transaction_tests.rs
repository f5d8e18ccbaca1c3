use ed25519_dalek::{Signer as _, SigningKey, Verifier};
use sha2::{Digest, Sha256};

use crate::actions::ActionParams;
use crate::transaction::{
    build_transaction_with_actions, calculate_transaction_hash, sign_transaction,
};
use crate::types::{NearAction, SignedTransaction};

fn test_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

fn transfer_actions() -> Vec<NearAction> {
    vec![NearAction::Transfer {
        deposit: 1_000_000_000_000_000_000_000_000,
    }]
}

#[test]
fn builds_transaction_with_expected_fields() {
    let key = test_signing_key();
    let tx = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        42,
        &[7u8; 32],
        &key,
        transfer_actions(),
    )
    .unwrap();

    assert_eq!(tx.signer_id.0, "alice.testnet");
    assert_eq!(tx.receiver_id.0, "bob.testnet");
    assert_eq!(tx.nonce, 42);
    assert_eq!(tx.block_hash.0, [7u8; 32]);
    assert_eq!(tx.public_key.key_data, key.verifying_key().to_bytes());
    assert_eq!(tx.actions.len(), 1);
}

#[test]
fn rejects_wrong_block_hash_length() {
    let key = test_signing_key();
    let err = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        1,
        &[7u8; 31],
        &key,
        transfer_actions(),
    )
    .unwrap_err();
    assert!(err.contains("32 bytes"));
}

#[test]
fn signature_verifies_against_transaction_hash() {
    let key = test_signing_key();
    let tx = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        1,
        &[9u8; 32],
        &key,
        transfer_actions(),
    )
    .unwrap();

    let (tx_hash, _) = tx.get_hash_and_size();
    let signed_bytes = sign_transaction(tx, &key).unwrap();

    let signed_tx = SignedTransaction::from_borsh_bytes(&signed_bytes).unwrap();
    let signature = ed25519_dalek::Signature::from_bytes(&signed_tx.signature.signature_data);
    key.verifying_key().verify(&tx_hash.0, &signature).unwrap();
}

#[test]
fn borsh_round_trip_preserves_signed_transaction() {
    let key = test_signing_key();
    let tx = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        7,
        &[3u8; 32],
        &key,
        transfer_actions(),
    )
    .unwrap();

    let signed_bytes = sign_transaction(tx.clone(), &key).unwrap();
    let signed_tx = SignedTransaction::from_borsh_bytes(&signed_bytes).unwrap();

    assert_eq!(signed_tx.transaction, tx);
    assert_eq!(signed_tx.to_borsh_bytes().unwrap(), signed_bytes);
}

#[test]
fn transaction_hash_is_base58_sha256_of_signed_bytes() {
    let key = test_signing_key();
    let tx = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        7,
        &[3u8; 32],
        &key,
        transfer_actions(),
    )
    .unwrap();
    let signed_bytes = sign_transaction(tx, &key).unwrap();

    let hash = calculate_transaction_hash(&signed_bytes);
    let expected = bs58::encode(Sha256::digest(&signed_bytes)).into_string();
    assert_eq!(hash, expected);
}

#[test]
fn transaction_hash_is_sha256_prehash_signing() {
    // The signed message must be SHA-256(borsh(tx)), not the raw bytes.
    let key = test_signing_key();
    let tx = build_transaction_with_actions(
        "alice.testnet",
        "bob.testnet",
        1,
        &[5u8; 32],
        &key,
        transfer_actions(),
    )
    .unwrap();

    let tx_bytes = borsh::to_vec(&tx).unwrap();
    let expected_hash: [u8; 32] = Sha256::digest(&tx_bytes).into();
    let (hash, size) = tx.get_hash_and_size();

    assert_eq!(hash.0, expected_hash);
    assert_eq!(size, tx_bytes.len() as u64);

    let signed_bytes = sign_transaction(tx, &key).unwrap();
    let signed_tx = SignedTransaction::from_borsh_bytes(&signed_bytes).unwrap();
    let expected_sig = key.sign(&expected_hash);
    assert_eq!(signed_tx.signature.signature_data, expected_sig.to_bytes());
}

#[test]
fn batched_nonces_are_contiguous_in_input_order() {
    let key = test_signing_key();
    let base_nonce = 100u64;

    let mut nonces = Vec::new();
    for i in 0..3 {
        let tx = build_transaction_with_actions(
            "alice.testnet",
            "bob.testnet",
            base_nonce + i,
            &[1u8; 32],
            &key,
            transfer_actions(),
        )
        .unwrap();
        nonces.push(tx.nonce);
    }

    assert_eq!(nonces, vec![100, 101, 102]);
}

#[test]
fn action_params_convert_into_borsh_compatible_actions() {
    let params = vec![ActionParams::FunctionCall {
        method_name: "register".to_string(),
        args: "{}".to_string(),
        gas: "30000000000000".to_string(),
        deposit: "1".to_string(),
    }];
    let actions = crate::actions::build_actions_from_params(&params).unwrap();
    let encoded = borsh::to_vec(&actions).unwrap();
    let decoded: Vec<NearAction> = borsh::from_slice(&encoded).unwrap();
    assert_eq!(decoded, actions);
}
