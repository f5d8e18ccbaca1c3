// ******************************************************************************
// *                                                                            *
// *                     HANDLER: SIGN NEP-413 MESSAGE                          *
// *                                                                            *
// ******************************************************************************

use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::NEP413_PREFIX;
use crate::encoders::{base64_standard_decode, base64_standard_encode};
use crate::types::DecryptionPayload;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignNep413Request {
    pub account_id: String,
    pub message: String,
    pub recipient: String,
    /// Base64-encoded 32-byte nonce
    pub nonce: String,
    pub state: Option<String>,
    pub decryption: DecryptionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignNep413Result {
    pub account_id: String,
    pub public_key: String,
    /// Base64-encoded signature
    pub signature: String,
    pub state: Option<String>,
}

/// **Handles:** `WorkerRequestType::SignNep413Message`
///
/// NEP-413 off-chain message signing: borsh-serialize `{message, recipient,
/// nonce, state}`, prepend the NEP-413 prefix, SHA-256, Ed25519-sign. The
/// prefix keeps signed messages from ever being valid transactions.
pub async fn handle_sign_nep413_message(
    request: SignNep413Request,
) -> Result<SignNep413Result, String> {
    let nonce_bytes = base64_standard_decode(&request.nonce)
        .map_err(|e| format!("Failed to decode nonce from base64: {}", e))?;

    if nonce_bytes.len() != 32 {
        return Err(format!(
            "Invalid nonce length: expected 32 bytes, got {}",
            nonce_bytes.len()
        ));
    }

    let private_key =
        crate::crypto::decrypt_private_key_with_prf(&request.decryption, &request.account_id)
            .map_err(|e| format!("Decryption failed: {}", e))?;
    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)?;

    #[derive(borsh::BorshSerialize)]
    struct Nep413Payload {
        message: String,
        recipient: String,
        nonce: [u8; 32],
        state: Option<String>,
    }

    let nonce_array: [u8; 32] = nonce_bytes
        .try_into()
        .map_err(|_| "Failed to convert nonce to 32-byte array")?;

    let payload = Nep413Payload {
        message: request.message,
        recipient: request.recipient,
        nonce: nonce_array,
        state: request.state.clone(),
    };

    let serialized =
        borsh::to_vec(&payload).map_err(|e| format!("Borsh serialization failed: {}", e))?;

    let mut prefixed_data = NEP413_PREFIX.to_le_bytes().to_vec();
    prefixed_data.extend_from_slice(&serialized);

    let hash = Sha256::digest(&prefixed_data);
    let signature = signing_key.sign(hash.as_slice());

    let public_key = format!(
        "ed25519:{}",
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
    );

    Ok(SignNep413Result {
        account_id: request.account_id,
        public_key,
        signature: base64_standard_encode(&signature.to_bytes()),
        state: request.state,
    })
}
