// ******************************************************************************
// *                                                                            *
// *               HANDLER: SIGN TRANSACTION WITH KEYPAIR                       *
// *                                                                            *
// ******************************************************************************

use serde::Deserialize;

use crate::actions::{build_actions_from_params, ActionParams};
use crate::handlers::handle_sign_transactions_with_actions::SignedTransactionOutput;
use crate::transaction::{
    build_transaction_with_actions, calculate_transaction_hash, sign_transaction,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionWithKeyPairRequest {
    /// NEAR-format private key (`ed25519:<base58 64 bytes>`). Used only in
    /// the device-linking hand-off where the key has just been derived and
    /// no encrypted record exists yet.
    pub near_private_key: String,
    pub signer_id: String,
    pub receiver_id: String,
    pub nonce: String,
    pub block_hash: String,
    pub actions: Vec<ActionParams>,
}

/// **Handles:** `WorkerRequestType::SignTransactionWithKeyPair`
///
/// The one signing path that takes a raw key instead of an encrypted record:
/// device linking signs an AddKey for the new device before the new device
/// has any stored state. No VRF challenge or confirmation is involved.
pub async fn handle_sign_transaction_with_keypair(
    request: SignTransactionWithKeyPairRequest,
) -> Result<SignedTransactionOutput, String> {
    let signing_key = crate::crypto::signing_key_from_near_private_key(&request.near_private_key)?;

    let nonce = request
        .nonce
        .parse::<u64>()
        .map_err(|e| format!("Invalid nonce format: {}", e))?;

    let block_hash_bytes = bs58::decode(&request.block_hash)
        .into_vec()
        .map_err(|e| format!("Invalid block hash: {}", e))?;

    let actions = build_actions_from_params(&request.actions)?;

    let transaction = build_transaction_with_actions(
        &request.signer_id,
        &request.receiver_id,
        nonce,
        &block_hash_bytes,
        &signing_key,
        actions,
    )?;

    let signed_tx_bytes = sign_transaction(transaction, &signing_key)?;
    let hash = calculate_transaction_hash(&signed_tx_bytes);

    Ok(SignedTransactionOutput {
        signer_id: request.signer_id,
        receiver_id: request.receiver_id,
        nonce,
        hash,
        borsh_base64: crate::encoders::base64_standard_encode(&signed_tx_bytes),
    })
}
