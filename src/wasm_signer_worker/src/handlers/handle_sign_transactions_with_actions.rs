// ******************************************************************************
// *                                                                            *
// *                HANDLER: SIGN TRANSACTIONS WITH ACTIONS                     *
// *                                                                            *
// ******************************************************************************

use serde::{Deserialize, Serialize};

use crate::actions::{build_actions_from_params, ActionParams};
use crate::transaction::{
    build_transaction_with_actions, calculate_transaction_hash, sign_transaction,
};
use crate::types::{
    progress::{
        send_completion_message, send_progress_message, ProgressData, ProgressMessageType,
        ProgressStep,
    },
    DecryptionPayload, SignedTransaction, TransactionContext,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionsWithActionsRequest {
    pub decryption: DecryptionPayload,
    pub transaction_context: TransactionContext,
    pub tx_signing_requests: Vec<TransactionPayload>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub near_account_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
}

/// One signed transaction ready for broadcast: the borsh bytes in base64
/// (what `send_tx` wants) plus the fields callers log and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransactionOutput {
    pub signer_id: String,
    pub receiver_id: String,
    pub nonce: u64,
    /// base58 SHA-256 of the signed transaction bytes
    pub hash: String,
    /// base64 borsh `SignedTransaction`, the `signed_tx_base64` RPC param
    pub borsh_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSignResult {
    pub success: bool,
    pub signed_transactions: Vec<SignedTransactionOutput>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

impl TransactionSignResult {
    pub fn failed(logs: Vec<String>, error: String) -> Self {
        TransactionSignResult {
            success: false,
            signed_transactions: vec![],
            logs,
            error: Some(error),
        }
    }
}

/// **Handles:** `WorkerRequestType::SignTransactionsWithActions`
///
/// Signs a batch of transactions with one decrypted key. Nonces come from
/// the reserved run starting at `transaction_context.next_nonce`, assigned
/// in input order; the worker emits a step-6 progress message per
/// transaction and a step-7 completion at the end. Broadcast (if any) is the
/// wallet host's job.
pub async fn handle_sign_transactions_with_actions(
    request: SignTransactionsWithActionsRequest,
) -> Result<TransactionSignResult, String> {
    if request.tx_signing_requests.is_empty() {
        return Err("No transactions provided".to_string());
    }

    let mut logs: Vec<String> = Vec::new();
    logs.push(format!(
        "Processing {} transactions",
        request.tx_signing_requests.len()
    ));

    // All transactions in a batch share one signer account.
    let signer_account = request.tx_signing_requests[0].near_account_id.clone();
    for tx in &request.tx_signing_requests {
        if tx.near_account_id != signer_account {
            let error = "All transactions must use the same NEAR account ID".to_string();
            return Ok(TransactionSignResult::failed(logs, error));
        }
    }

    // Decrypt once, sign many.
    let private_key =
        crate::crypto::decrypt_private_key_with_prf(&request.decryption, &signer_account)
            .map_err(|e| format!("Decryption failed: {}", e))?;
    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)?;
    logs.push("Private key decrypted successfully".to_string());

    let mut current_nonce: u64 = request
        .transaction_context
        .next_nonce
        .parse()
        .map_err(|e| format!("Invalid nonce: {}", e))?;

    let block_hash_bytes = bs58::decode(&request.transaction_context.tx_block_hash)
        .into_vec()
        .map_err(|e| format!("Invalid block hash: {}", e))?;

    let total = request.tx_signing_requests.len();
    let mut signed_outputs = Vec::with_capacity(total);

    for (index, tx_data) in request.tx_signing_requests.iter().enumerate() {
        send_progress_message(
            ProgressMessageType::ExecuteActionsProgress,
            ProgressStep::TransactionSigningProgress,
            &format!("Signing transaction {} of {}", index + 1, total),
            Some(&ProgressData::new(index as u32 + 1, total as u32).with_transaction_count(total)),
        );

        let actions = match build_actions_from_params(&tx_data.actions) {
            Ok(actions) => actions,
            Err(e) => {
                let error = format!("Transaction {}: {}", index + 1, e);
                logs.push(error.clone());
                return Ok(TransactionSignResult::failed(logs, error));
            }
        };

        let transaction = match build_transaction_with_actions(
            &tx_data.near_account_id,
            &tx_data.receiver_id,
            current_nonce,
            &block_hash_bytes,
            &signing_key,
            actions,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                let error = format!("Transaction {}: failed to build: {}", index + 1, e);
                logs.push(error.clone());
                return Ok(TransactionSignResult::failed(logs, error));
            }
        };

        let signed_tx_bytes = match sign_transaction(transaction, &signing_key) {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = format!("Transaction {}: failed to sign: {}", index + 1, e);
                logs.push(error.clone());
                return Ok(TransactionSignResult::failed(logs, error));
            }
        };

        let hash = calculate_transaction_hash(&signed_tx_bytes);
        logs.push(format!(
            "Transaction {}: signed (nonce {}, hash {})",
            index + 1,
            current_nonce,
            hash
        ));

        // Round-trip through borsh to surface serialization bugs here, not
        // at broadcast time.
        let signed_tx = SignedTransaction::from_borsh_bytes(&signed_tx_bytes)
            .map_err(|e| format!("Transaction {}: {}", index + 1, e))?;

        signed_outputs.push(SignedTransactionOutput {
            signer_id: signed_tx.transaction.signer_id.0.clone(),
            receiver_id: signed_tx.transaction.receiver_id.0.clone(),
            nonce: signed_tx.transaction.nonce,
            hash,
            borsh_base64: crate::encoders::base64_standard_encode(&signed_tx_bytes),
        });

        current_nonce = current_nonce.saturating_add(1);
    }

    logs.push(format!("All {} transactions signed successfully", total));

    send_completion_message(
        ProgressMessageType::ExecuteActionsComplete,
        ProgressStep::TransactionSigningComplete,
        &format!("{} transactions signed successfully", total),
        Some(
            &ProgressData::new(total as u32, total as u32)
                .with_success(true)
                .with_transaction_count(total),
        ),
    );

    Ok(TransactionSignResult {
        success: true,
        signed_transactions: signed_outputs,
        logs,
        error: None,
    })
}
