// ******************************************************************************
// *                                                                            *
// *                HANDLER: RECOVER KEYPAIR FROM PASSKEY                       *
// *                                                                            *
// ******************************************************************************

use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::{DualPrfOutputs, SerializedCredential};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecoverKeypairRequest {
    pub credential: SerializedCredential,
    pub account_id_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverKeypairResult {
    pub public_key: String,
    pub encrypted_data: String,
    pub iv: String,
    pub account_id_hint: Option<String>,
}

/// **Handles:** `WorkerRequestType::RecoverKeypairFromPasskey`
///
/// Account recovery: an authentication ceremony on the existing passkey
/// reproduces the PRF outputs, which regenerate the exact keypair from
/// registration. The key is immediately re-encrypted for storage; plaintext
/// never leaves the worker.
pub async fn handle_recover_keypair_from_passkey(
    request: RecoverKeypairRequest,
) -> Result<RecoverKeypairResult, String> {
    let prf_results = &request.credential.client_extension_results.prf.results;
    let chacha20_prf_output = prf_results
        .first
        .clone()
        .ok_or_else(|| "Missing PRF output (first) in credential".to_string())?;
    let ed25519_prf_output = prf_results
        .second
        .clone()
        .ok_or_else(|| "Missing PRF output (second) in credential".to_string())?;

    debug!(
        "Recovering keypair from credential: {}",
        request.credential.id
    );

    let account_id = request
        .account_id_hint
        .as_deref()
        .unwrap_or("recovery-account.testnet");

    let dual_prf = DualPrfOutputs {
        chacha20_prf_output,
        ed25519_prf_output,
    };

    let (public_key, encrypted) =
        crate::crypto::derive_and_encrypt_keypair_from_dual_prf(&dual_prf, account_id)
            .map_err(|e| format!("Failed to derive and encrypt keypair: {}", e))?;

    Ok(RecoverKeypairResult {
        public_key,
        encrypted_data: encrypted.encrypted_near_key_data_b64u,
        iv: encrypted.chacha20_nonce_b64u,
        account_id_hint: Some(account_id.to_string()),
    })
}
