// ******************************************************************************
// *                                                                            *
// *               HANDLER: DERIVE NEAR KEYPAIR AND ENCRYPT                     *
// *                                                                            *
// ******************************************************************************

use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::{DualPrfOutputs, SerializedRegistrationCredential};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeriveNearKeypairAndEncryptRequest {
    pub dual_prf_outputs: DualPrfOutputs,
    pub near_account_id: String,
    /// Device index the wallet host will file the record under (1-based).
    pub device_index: u32,
    pub credential: SerializedRegistrationCredential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveNearKeypairAndEncryptResult {
    pub near_account_id: String,
    pub device_index: u32,
    pub public_key: String,
    /// AEAD ciphertext of the NEAR private key (base64url)
    pub encrypted_data: String,
    /// AEAD nonce (base64url)
    pub iv: String,
}

/// **Handles:** `WorkerRequestType::DeriveNearKeypairAndEncrypt`
///
/// The registration path: derives the Ed25519 keypair from PRF `second` with
/// the account-scoped salt, then encrypts the private key under the ChaCha20
/// key derived from PRF `first`. Only the encrypted form leaves the worker;
/// the wallet host persists it keyed by `(accountId, deviceIndex)`.
pub async fn handle_derive_near_keypair_and_encrypt(
    request: DeriveNearKeypairAndEncryptRequest,
) -> Result<DeriveNearKeypairAndEncryptResult, String> {
    if request.device_index == 0 {
        return Err("deviceIndex must be >= 1".to_string());
    }

    let (public_key, encrypted) = crate::crypto::derive_and_encrypt_keypair_from_dual_prf(
        &request.dual_prf_outputs,
        &request.near_account_id,
    )
    .map_err(|e| format!("Failed to derive and encrypt keypair: {}", e))?;

    debug!(
        "Derived NEAR keypair for {} (device {}), credential {}",
        request.near_account_id, request.device_index, request.credential.id
    );

    Ok(DeriveNearKeypairAndEncryptResult {
        near_account_id: request.near_account_id,
        device_index: request.device_index,
        public_key,
        encrypted_data: encrypted.encrypted_near_key_data_b64u,
        iv: encrypted.chacha20_nonce_b64u,
    })
}
