use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use getrandom::getrandom;
use hkdf::Hkdf;
use log::debug;
use sha2::Sha256;

use crate::config::{
    chacha20_salt_for_account, ed25519_salt_for_account, CHACHA20_HKDF_KEY_INFO, CHACHA20_KEY_SIZE,
    CHACHA20_NONCE_SIZE, ED25519_HKDF_KEY_INFO, ED25519_PRIVATE_KEY_SIZE, ERROR_INVALID_KEY_SIZE,
};
use crate::encoders::base64_url_decode;
use crate::error::KdfError;
use crate::types::{DualPrfOutputs, EncryptedDataChaCha20};

// === KEY DERIVATION ===

/// Derive the ChaCha20 encryption key from PRF output `first` with the
/// account-scoped salt. Deterministic per (PRF output, account).
pub(crate) fn derive_chacha20_key_from_prf(
    prf_output_b64u: &str,
    account_id: &str,
) -> Result<[u8; CHACHA20_KEY_SIZE], KdfError> {
    let prf_output = base64_url_decode(prf_output_b64u)?;
    if prf_output.is_empty() {
        return Err(KdfError::InvalidInput("Empty PRF output".to_string()));
    }

    let salt = chacha20_salt_for_account(account_id);
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), &prf_output);
    let mut key = [0u8; CHACHA20_KEY_SIZE];
    hk.expand(CHACHA20_HKDF_KEY_INFO.as_bytes(), &mut key)
        .map_err(|_| KdfError::HkdfError)?;
    Ok(key)
}

/// Derive the Ed25519 signing key from PRF output `second` with the
/// account-scoped salt. Returns NEAR-format `(private_key, public_key)`
/// strings: `ed25519:<base58>`, private key 64 bytes (seed + public key).
pub(crate) fn derive_ed25519_key_from_prf_output(
    prf_output_b64u: &str,
    account_id: &str,
) -> Result<(String, String), KdfError> {
    let prf_output = base64_url_decode(prf_output_b64u)?;
    if prf_output.is_empty() {
        return Err(KdfError::InvalidInput("Empty PRF output".to_string()));
    }

    let salt = ed25519_salt_for_account(account_id);
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), &prf_output);
    let mut seed = [0u8; ED25519_PRIVATE_KEY_SIZE];
    hk.expand(ED25519_HKDF_KEY_INFO.as_bytes(), &mut seed)
        .map_err(|_| KdfError::HkdfError)?;

    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();

    // NEAR private key format: 32-byte seed + 32-byte public key
    let mut near_private_key_bytes = Vec::with_capacity(64);
    near_private_key_bytes.extend_from_slice(&signing_key.to_bytes());
    near_private_key_bytes.extend_from_slice(&verifying_key.to_bytes());

    let near_private_key = format!(
        "ed25519:{}",
        bs58::encode(&near_private_key_bytes).into_string()
    );
    let near_public_key = format!(
        "ed25519:{}",
        bs58::encode(verifying_key.to_bytes()).into_string()
    );

    debug!("Derived Ed25519 key for account: {}", account_id);
    Ok((near_private_key, near_public_key))
}

/// Derive the NEAR keypair from PRF `second` and encrypt the private key
/// under the ChaCha20 key from PRF `first`. The registration path.
pub(crate) fn derive_and_encrypt_keypair_from_dual_prf(
    dual_prf: &DualPrfOutputs,
    account_id: &str,
) -> Result<(String, EncryptedDataChaCha20), KdfError> {
    let (private_key, public_key) =
        derive_ed25519_key_from_prf_output(&dual_prf.ed25519_prf_output, account_id)?;

    let chacha20_key = derive_chacha20_key_from_prf(&dual_prf.chacha20_prf_output, account_id)?;
    let encrypted = encrypt_data_chacha20(&private_key, &chacha20_key)
        .map_err(KdfError::EncryptionError)?;

    Ok((public_key, encrypted))
}

/// Decrypt an encrypted private key record with a fresh PRF `first` output.
pub(crate) fn decrypt_private_key_with_prf(
    decryption: &crate::types::DecryptionPayload,
    account_id: &str,
) -> Result<String, String> {
    let chacha20_key = derive_chacha20_key_from_prf(&decryption.chacha20_prf_output, account_id)
        .map_err(|e| format!("Failed to derive decryption key: {}", e))?;

    decrypt_data_chacha20(
        &decryption.encrypted_private_key_data,
        &decryption.encrypted_private_key_chacha20_nonce_b64u,
        &chacha20_key,
    )
}

/// Parse a NEAR-format private key into an Ed25519 signing key.
pub(crate) fn signing_key_from_near_private_key(
    private_key: &str,
) -> Result<ed25519_dalek::SigningKey, String> {
    let b58 = private_key
        .strip_prefix("ed25519:")
        .ok_or_else(|| "Private key must be in ed25519: format".to_string())?;

    let bytes = bs58::decode(b58)
        .into_vec()
        .map_err(|e| format!("Failed to decode private key: {}", e))?;

    if bytes.len() != 64 {
        return Err(format!(
            "Invalid private key length: expected 64 bytes, got {}",
            bytes.len()
        ));
    }

    let seed: [u8; 32] = bytes[0..32]
        .try_into()
        .map_err(|_| "Failed to extract seed from private key".to_string())?;

    Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
}

// === CHACHA20POLY1305 ENCRYPTION/DECRYPTION ===

/// Encrypt data using ChaCha20Poly1305 with a random 12-byte nonce.
pub(crate) fn encrypt_data_chacha20(
    plaintext: &str,
    key_bytes: &[u8],
) -> Result<EncryptedDataChaCha20, String> {
    if key_bytes.len() != CHACHA20_KEY_SIZE {
        return Err(ERROR_INVALID_KEY_SIZE.to_string());
    }

    let key = chacha20poly1305::Key::from_slice(key_bytes);
    let cipher = ChaCha20Poly1305::new(key);

    let mut nonce_bytes = [0u8; CHACHA20_NONCE_SIZE];
    getrandom(&mut nonce_bytes).map_err(|e| format!("Failed to generate nonce: {}", e))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption error: {}", e))?;

    Ok(EncryptedDataChaCha20 {
        encrypted_near_key_data_b64u: crate::encoders::base64_url_encode(&ciphertext),
        chacha20_nonce_b64u: crate::encoders::base64_url_encode(&nonce_bytes),
    })
}

/// Decrypt data using ChaCha20Poly1305.
pub(crate) fn decrypt_data_chacha20(
    encrypted_data_b64u: &str,
    chacha20_nonce_b64u: &str,
    key_bytes: &[u8],
) -> Result<String, String> {
    if key_bytes.len() != CHACHA20_KEY_SIZE {
        return Err(ERROR_INVALID_KEY_SIZE.to_string());
    }

    let key = chacha20poly1305::Key::from_slice(key_bytes);
    let cipher = ChaCha20Poly1305::new(key);

    let nonce_bytes = base64_url_decode(chacha20_nonce_b64u)
        .map_err(|e| format!("Base64 decode error for ChaCha20 nonce: {}", e))?;
    if nonce_bytes.len() != CHACHA20_NONCE_SIZE {
        return Err(format!(
            "Decryption ChaCha20 nonce must be {} bytes.",
            CHACHA20_NONCE_SIZE
        ));
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let encrypted_data = base64_url_decode(encrypted_data_b64u)
        .map_err(|e| format!("Base64 decode error for encrypted data: {}", e))?;

    let decrypted = cipher
        .decrypt(nonce, encrypted_data.as_slice())
        .map_err(|e| format!("Decryption error: {}", e))?;

    String::from_utf8(decrypted).map_err(|e| format!("UTF-8 decoding error: {}", e))
}
