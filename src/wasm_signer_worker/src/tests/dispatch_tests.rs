use futures::executor::block_on;
use serde_json::json;

use crate::dispatch_request;
use crate::encoders::base64_url_encode;
use crate::types::worker_messages::WorkerRequestType;

fn dual_prf_json() -> serde_json::Value {
    json!({
        "chacha20PrfOutput": base64_url_encode(b"dispatch-prf-first"),
        "ed25519PrfOutput": base64_url_encode(b"dispatch-prf-second"),
    })
}

fn registration_credential_json() -> serde_json::Value {
    json!({
        "id": "cred-id",
        "rawId": "cred-raw-id",
        "type": "public-key",
        "authenticatorAttachment": "platform",
        "response": {
            "clientDataJSON": "e30",
            "attestationObject": "e30",
            "transports": ["internal"],
        },
    })
}

#[test]
fn health_check_returns_true() {
    let result = block_on(dispatch_request(
        WorkerRequestType::HealthCheck,
        serde_json::Value::Null,
    ))
    .unwrap();
    assert_eq!(result, serde_json::Value::Bool(true));
}

#[test]
fn invalid_payload_error_names_the_request_type() {
    let err = block_on(dispatch_request(
        WorkerRequestType::SignNep413Message,
        json!({"wrong": "shape"}),
    ))
    .unwrap_err();
    assert!(err.contains("SIGN_NEP413_MESSAGE"), "got: {}", err);
}

#[test]
fn derive_then_sign_batch_through_dispatch() {
    // Registration: derive and encrypt.
    let derive_payload = json!({
        "dualPrfOutputs": dual_prf_json(),
        "nearAccountId": "alice.testnet",
        "deviceIndex": 1,
        "credential": registration_credential_json(),
    });
    let derived = block_on(dispatch_request(
        WorkerRequestType::DeriveNearKeypairAndEncrypt,
        derive_payload,
    ))
    .unwrap();

    let public_key = derived["publicKey"].as_str().unwrap().to_string();
    assert!(public_key.starts_with("ed25519:"));
    assert_eq!(derived["deviceIndex"], 1);

    // Signing: two transfers, nonces assigned from nextNonce upward.
    let sign_payload = json!({
        "decryption": {
            "encryptedPrivateKeyData": derived["encryptedData"],
            "encryptedPrivateKeyChacha20NonceB64u": derived["iv"],
            "chacha20PrfOutput": dual_prf_json()["chacha20PrfOutput"],
        },
        "transactionContext": {
            "nearPublicKeyStr": public_key,
            "nextNonce": "101",
            "txBlockHeight": "12345",
            "txBlockHash": bs58::encode([8u8; 32]).into_string(),
        },
        "txSigningRequests": [
            {
                "nearAccountId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"type": "Transfer", "amount": "1000000000000000000000000"}],
            },
            {
                "nearAccountId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"type": "Transfer", "amount": "2000000000000000000000000"}],
            },
        ],
    });

    let result = block_on(dispatch_request(
        WorkerRequestType::SignTransactionsWithActions,
        sign_payload,
    ))
    .unwrap();

    assert_eq!(result["success"], true);
    let signed = result["signedTransactions"].as_array().unwrap();
    assert_eq!(signed.len(), 2);
    assert_eq!(signed[0]["nonce"], 101);
    assert_eq!(signed[1]["nonce"], 102);
    assert_ne!(signed[0]["hash"], signed[1]["hash"]);
}

#[test]
fn signing_with_wrong_prf_fails_with_decryption_error() {
    let derive_payload = json!({
        "dualPrfOutputs": dual_prf_json(),
        "nearAccountId": "alice.testnet",
        "deviceIndex": 1,
        "credential": registration_credential_json(),
    });
    let derived = block_on(dispatch_request(
        WorkerRequestType::DeriveNearKeypairAndEncrypt,
        derive_payload,
    ))
    .unwrap();

    let sign_payload = json!({
        "decryption": {
            "encryptedPrivateKeyData": derived["encryptedData"],
            "encryptedPrivateKeyChacha20NonceB64u": derived["iv"],
            "chacha20PrfOutput": base64_url_encode(b"wrong-prf-output"),
        },
        "transactionContext": {
            "nearPublicKeyStr": derived["publicKey"],
            "nextNonce": "1",
            "txBlockHeight": "1",
            "txBlockHash": bs58::encode([8u8; 32]).into_string(),
        },
        "txSigningRequests": [{
            "nearAccountId": "alice.testnet",
            "receiverId": "bob.testnet",
            "actions": [{"type": "Transfer", "amount": "1"}],
        }],
    });

    let err = block_on(dispatch_request(
        WorkerRequestType::SignTransactionsWithActions,
        sign_payload,
    ))
    .unwrap_err();
    assert!(err.contains("Decryption failed"), "got: {}", err);
}

#[test]
fn batch_rejects_mixed_signer_accounts() {
    let derive_payload = json!({
        "dualPrfOutputs": dual_prf_json(),
        "nearAccountId": "alice.testnet",
        "deviceIndex": 1,
        "credential": registration_credential_json(),
    });
    let derived = block_on(dispatch_request(
        WorkerRequestType::DeriveNearKeypairAndEncrypt,
        derive_payload,
    ))
    .unwrap();

    let sign_payload = json!({
        "decryption": {
            "encryptedPrivateKeyData": derived["encryptedData"],
            "encryptedPrivateKeyChacha20NonceB64u": derived["iv"],
            "chacha20PrfOutput": dual_prf_json()["chacha20PrfOutput"],
        },
        "transactionContext": {
            "nearPublicKeyStr": derived["publicKey"],
            "nextNonce": "1",
            "txBlockHeight": "1",
            "txBlockHash": bs58::encode([8u8; 32]).into_string(),
        },
        "txSigningRequests": [
            {
                "nearAccountId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"type": "Transfer", "amount": "1"}],
            },
            {
                "nearAccountId": "mallory.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"type": "Transfer", "amount": "1"}],
            },
        ],
    });

    let result = block_on(dispatch_request(
        WorkerRequestType::SignTransactionsWithActions,
        sign_payload,
    ))
    .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("same NEAR account"));
}

#[test]
fn sign_with_raw_keypair_round_trips() {
    // Derive a key, export the plaintext, then sign via the raw-key path.
    let (private_key, _public_key) = crate::crypto::derive_ed25519_key_from_prf_output(
        &base64_url_encode(b"raw-keypair-prf"),
        "device2.testnet",
    )
    .unwrap();

    let payload = json!({
        "nearPrivateKey": private_key,
        "signerId": "device2.testnet",
        "receiverId": "device2.testnet",
        "nonce": "55",
        "blockHash": bs58::encode([4u8; 32]).into_string(),
        "actions": [{
            "type": "AddKey",
            "public_key": format!("ed25519:{}", bs58::encode([9u8; 32]).into_string()),
            "access_key": r#"{"nonce":0,"permission":{"FullAccess":{}}}"#,
        }],
    });

    let result = block_on(dispatch_request(
        WorkerRequestType::SignTransactionWithKeyPair,
        payload,
    ))
    .unwrap();

    assert_eq!(result["nonce"], 55);
    assert_eq!(result["signerId"], "device2.testnet");
    assert!(!result["borshBase64"].as_str().unwrap().is_empty());
}
