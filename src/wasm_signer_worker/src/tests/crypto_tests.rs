use crate::config::CHACHA20_KEY_SIZE;
use crate::crypto::{
    decrypt_data_chacha20, decrypt_private_key_with_prf, derive_and_encrypt_keypair_from_dual_prf,
    derive_chacha20_key_from_prf, derive_ed25519_key_from_prf_output, encrypt_data_chacha20,
    signing_key_from_near_private_key,
};
use crate::encoders::base64_url_encode;
use crate::types::{DecryptionPayload, DualPrfOutputs};

fn prf_first() -> String {
    base64_url_encode(b"test-prf-output-first-chacha20-key")
}

fn prf_second() -> String {
    base64_url_encode(b"test-prf-output-second-ed25519-key")
}

fn dual_prf() -> DualPrfOutputs {
    DualPrfOutputs {
        chacha20_prf_output: prf_first(),
        ed25519_prf_output: prf_second(),
    }
}

#[test]
fn chacha20_encrypt_then_decrypt_round_trip() {
    let key = vec![42u8; CHACHA20_KEY_SIZE];
    let plaintext = "hello chacha20 round-trip";

    let encrypted = encrypt_data_chacha20(plaintext, &key).unwrap();
    assert!(!encrypted.encrypted_near_key_data_b64u.is_empty());
    assert!(!encrypted.chacha20_nonce_b64u.is_empty());

    let decrypted = decrypt_data_chacha20(
        &encrypted.encrypted_near_key_data_b64u,
        &encrypted.chacha20_nonce_b64u,
        &key,
    )
    .unwrap();

    assert_eq!(decrypted, plaintext);
}

#[test]
fn chacha20_rejects_wrong_key_size() {
    assert!(encrypt_data_chacha20("data", &[0u8; 16]).is_err());
    assert!(decrypt_data_chacha20("AAAA", "AAAA", &[0u8; 16]).is_err());
}

#[test]
fn ed25519_derivation_is_deterministic_and_near_formatted() {
    let (priv1, pub1) = derive_ed25519_key_from_prf_output(&prf_second(), "alice.near").unwrap();
    let (priv2, pub2) = derive_ed25519_key_from_prf_output(&prf_second(), "alice.near").unwrap();

    assert_eq!(priv1, priv2);
    assert_eq!(pub1, pub2);

    assert!(priv1.starts_with("ed25519:"));
    assert!(pub1.starts_with("ed25519:"));

    let priv_bytes = bs58::decode(&priv1[8..]).into_vec().unwrap();
    let pub_bytes = bs58::decode(&pub1[8..]).into_vec().unwrap();

    // 64-byte private key (seed + public key), 32-byte public key
    assert_eq!(priv_bytes.len(), 64);
    assert_eq!(pub_bytes.len(), 32);
    assert_eq!(&priv_bytes[32..], pub_bytes.as_slice());
}

#[test]
fn ed25519_derivation_differs_across_accounts() {
    let (_, pub_alice) = derive_ed25519_key_from_prf_output(&prf_second(), "alice.near").unwrap();
    let (_, pub_bob) = derive_ed25519_key_from_prf_output(&prf_second(), "bob.near").unwrap();
    assert_ne!(pub_alice, pub_bob);
}

#[test]
fn chacha20_key_derivation_is_account_scoped() {
    let key_alice = derive_chacha20_key_from_prf(&prf_first(), "alice.near").unwrap();
    let key_bob = derive_chacha20_key_from_prf(&prf_first(), "bob.near").unwrap();
    assert_ne!(key_alice, key_bob);
}

#[test]
fn derive_encrypt_decrypt_round_trip_restores_public_key() {
    let account_id = "alice.testnet";
    let (public_key, encrypted) =
        derive_and_encrypt_keypair_from_dual_prf(&dual_prf(), account_id).unwrap();

    let decryption = DecryptionPayload {
        encrypted_private_key_data: encrypted.encrypted_near_key_data_b64u,
        encrypted_private_key_chacha20_nonce_b64u: encrypted.chacha20_nonce_b64u,
        chacha20_prf_output: prf_first(),
    };

    let private_key = decrypt_private_key_with_prf(&decryption, account_id).unwrap();
    let signing_key = signing_key_from_near_private_key(&private_key).unwrap();
    let derived_public = format!(
        "ed25519:{}",
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
    );

    assert_eq!(derived_public, public_key);
}

#[test]
fn decrypt_with_wrong_prf_output_fails() {
    let account_id = "alice.testnet";
    let (_public_key, encrypted) =
        derive_and_encrypt_keypair_from_dual_prf(&dual_prf(), account_id).unwrap();

    let decryption = DecryptionPayload {
        encrypted_private_key_data: encrypted.encrypted_near_key_data_b64u,
        encrypted_private_key_chacha20_nonce_b64u: encrypted.chacha20_nonce_b64u,
        chacha20_prf_output: base64_url_encode(b"a-different-prf-output-entirely"),
    };

    assert!(decrypt_private_key_with_prf(&decryption, account_id).is_err());
}

#[test]
fn decrypt_with_wrong_account_salt_fails() {
    let (_public_key, encrypted) =
        derive_and_encrypt_keypair_from_dual_prf(&dual_prf(), "alice.testnet").unwrap();

    let decryption = DecryptionPayload {
        encrypted_private_key_data: encrypted.encrypted_near_key_data_b64u,
        encrypted_private_key_chacha20_nonce_b64u: encrypted.chacha20_nonce_b64u,
        chacha20_prf_output: prf_first(),
    };

    // Same PRF output, different account: the account-scoped salt yields a
    // different ChaCha20 key, so AEAD open must fail.
    assert!(decrypt_private_key_with_prf(&decryption, "mallory.testnet").is_err());
}

#[test]
fn signing_key_parser_rejects_malformed_keys() {
    assert!(signing_key_from_near_private_key("not-prefixed").is_err());
    assert!(signing_key_from_near_private_key("ed25519:!!!").is_err());
    // 32 bytes instead of 64
    let short = format!("ed25519:{}", bs58::encode([7u8; 32]).into_string());
    assert!(signing_key_from_near_private_key(&short).is_err());
}

#[test]
fn derived_public_key_parses_as_near_crypto_key() {
    let (_, public_key) = derive_ed25519_key_from_prf_output(&prf_second(), "alice.near").unwrap();
    let parsed: near_crypto::PublicKey = public_key.parse().unwrap();
    assert!(matches!(parsed.key_type(), near_crypto::KeyType::ED25519));
}
