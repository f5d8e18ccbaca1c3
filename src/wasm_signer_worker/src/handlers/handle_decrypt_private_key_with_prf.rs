// ******************************************************************************
// *                                                                            *
// *                HANDLER: DECRYPT PRIVATE KEY WITH PRF                       *
// *                                                                            *
// ******************************************************************************

use serde::{Deserialize, Serialize};

use crate::types::DecryptionPayload;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DecryptPrivateKeyRequest {
    pub near_account_id: String,
    pub decryption: DecryptionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptPrivateKeyResult {
    pub near_account_id: String,
    pub private_key: String,
    pub public_key: String,
}

/// **Handles:** `WorkerRequestType::DecryptPrivateKeyWithPrf`
///
/// Key-export path. The wallet host only routes here for an explicit user
/// export request; the plaintext key goes back over the port once and is
/// never retained.
pub async fn handle_decrypt_private_key_with_prf(
    request: DecryptPrivateKeyRequest,
) -> Result<DecryptPrivateKeyResult, String> {
    let private_key =
        crate::crypto::decrypt_private_key_with_prf(&request.decryption, &request.near_account_id)
            .map_err(|e| format!("Decryption failed: {}", e))?;

    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)?;
    let public_key = format!(
        "ed25519:{}",
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
    );

    Ok(DecryptPrivateKeyResult {
        near_account_id: request.near_account_id,
        private_key,
        public_key,
    })
}
