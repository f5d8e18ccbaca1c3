use ed25519_dalek::Verifier;
use futures::executor::block_on;
use sha2::{Digest, Sha256};

use crate::config::NEP413_PREFIX;
use crate::crypto::derive_and_encrypt_keypair_from_dual_prf;
use crate::encoders::{base64_standard_decode, base64_standard_encode, base64_url_encode};
use crate::handlers::{handle_sign_nep413_message, SignNep413Request};
use crate::types::{DecryptionPayload, DualPrfOutputs};

fn dual_prf() -> DualPrfOutputs {
    DualPrfOutputs {
        chacha20_prf_output: base64_url_encode(b"nep413-prf-first"),
        ed25519_prf_output: base64_url_encode(b"nep413-prf-second"),
    }
}

fn request_for(account_id: &str, nonce: [u8; 32]) -> SignNep413Request {
    let (_public_key, encrypted) =
        derive_and_encrypt_keypair_from_dual_prf(&dual_prf(), account_id).unwrap();
    SignNep413Request {
        account_id: account_id.to_string(),
        message: "Authorize my session".to_string(),
        recipient: "app.example.com".to_string(),
        nonce: base64_standard_encode(&nonce),
        state: Some("state-token".to_string()),
        decryption: DecryptionPayload {
            encrypted_private_key_data: encrypted.encrypted_near_key_data_b64u,
            encrypted_private_key_chacha20_nonce_b64u: encrypted.chacha20_nonce_b64u,
            chacha20_prf_output: dual_prf().chacha20_prf_output,
        },
    }
}

#[test]
fn nep413_signature_verifies_over_prefixed_hash() {
    let request = request_for("alice.testnet", [5u8; 32]);
    let result = block_on(handle_sign_nep413_message(request)).unwrap();

    assert_eq!(result.account_id, "alice.testnet");
    assert_eq!(result.state.as_deref(), Some("state-token"));
    assert!(result.public_key.starts_with("ed25519:"));

    // Rebuild the signed payload and verify independently.
    #[derive(borsh::BorshSerialize)]
    struct Nep413Payload {
        message: String,
        recipient: String,
        nonce: [u8; 32],
        state: Option<String>,
    }

    let payload = Nep413Payload {
        message: "Authorize my session".to_string(),
        recipient: "app.example.com".to_string(),
        nonce: [5u8; 32],
        state: Some("state-token".to_string()),
    };

    let mut prefixed = NEP413_PREFIX.to_le_bytes().to_vec();
    prefixed.extend_from_slice(&borsh::to_vec(&payload).unwrap());
    let hash = Sha256::digest(&prefixed);

    let public_key_bytes: [u8; 32] = bs58::decode(&result.public_key[8..])
        .into_vec()
        .unwrap()
        .try_into()
        .unwrap();
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public_key_bytes).unwrap();

    let signature_bytes: [u8; 64] = base64_standard_decode(&result.signature)
        .unwrap()
        .try_into()
        .unwrap();
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);

    verifying_key.verify(hash.as_slice(), &signature).unwrap();
}

#[test]
fn nep413_rejects_non_32_byte_nonce() {
    let mut request = request_for("alice.testnet", [5u8; 32]);
    request.nonce = base64_standard_encode(&[1u8; 16]);
    let err = block_on(handle_sign_nep413_message(request)).unwrap_err();
    assert!(err.contains("32 bytes"));
}

#[test]
fn nep413_prefix_value_matches_spec() {
    // 2^31 + 413
    assert_eq!(NEP413_PREFIX, 2u32.pow(31) + 413);
}
