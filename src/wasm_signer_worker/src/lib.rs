mod actions;
mod config;
mod cose;
mod crypto;
mod encoders;
mod error;
#[cfg(target_arch = "wasm32")]
mod fetch;
mod handlers;
mod logger;
mod rpc_calls;
#[cfg(test)]
mod tests;
mod transaction;
mod types;

use log::debug;
use wasm_bindgen::prelude::*;

use crate::error::scrub_js_error_value;
use crate::types::worker_messages::{
    parse_typed_payload, SignerWorkerMessage, SignerWorkerResponse, WorkerRequestType,
    worker_response_type_name,
};

pub use crate::error::scrub_error_message;
pub use handlers::{
    CheckCanRegisterUserRequest, CoseExtractionResult, DecryptPrivateKeyRequest,
    DecryptPrivateKeyResult, DeriveNearKeypairAndEncryptRequest,
    DeriveNearKeypairAndEncryptResult, ExtractCoseRequest, RecoverKeypairRequest,
    RecoverKeypairResult, SignNep413Request, SignNep413Result,
    SignTransactionWithKeyPairRequest, SignTransactionsWithActionsRequest,
    SignedTransactionOutput, TransactionPayload, TransactionSignResult,
};
pub use actions::ActionParams;
pub use rpc_calls::{RegistrationCheckResult, VrfChallenge, VrfData};
pub use types::near::{
    AccessKey, AccessKeyPermission, AccountId, CryptoHash, FunctionCallPermission, NearAction,
    PublicKey, Signature, SignedTransaction, Transaction,
};
pub use types::progress::{
    progress_step_phase, ProgressData, ProgressMessageType, ProgressStep,
};
pub use types::{
    ConfirmationBehavior, ConfirmationConfig, ConfirmationUIMode, DecryptionPayload,
    DualPrfOutputs, SerializedCredential, SerializedRegistrationCredential, TransactionContext,
    WebAuthnAuthenticationCredential, WebAuthnAuthenticationResponse,
    WebAuthnRegistrationCredential, WebAuthnRegistrationResponse,
};
pub use types::worker_messages::{WorkerResponseType, WorkerRequestType as SignerRequestType};

#[wasm_bindgen]
pub fn init_worker() {
    logger::init(config::CURRENT_LOG_LEVEL);
}

// === PROGRESS MESSAGING ===

/// Send a progress message to the host. The wallet host installs a global
/// `sendProgressMessage` in the worker scope before loading this module; it
/// tags the message with the active request id and forwards it to the
/// parent as a `PROGRESS` envelope.
pub fn send_progress_message_raw(
    message_type: u32,
    step: u32,
    message: &str,
    data_json: Option<&str>,
) {
    let step_phase = match ProgressStep::try_from(step) {
        Ok(s) => progress_step_phase(s),
        Err(_) => "unknown-step",
    };

    #[cfg(target_arch = "wasm32")]
    {
        #[wasm_bindgen]
        extern "C" {
            #[wasm_bindgen(js_name = sendProgressMessage)]
            fn send_progress_message_js(
                message_type: u32,
                step: u32,
                step_phase: &str,
                message: &str,
                data_json: Option<&str>,
            );
        }

        send_progress_message_js(message_type, step, step_phase, message, data_json);
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        debug!(
            "Progress: type={} step={} ({}) - {} {}",
            message_type,
            step,
            step_phase,
            message,
            data_json.unwrap_or("")
        );
    }
}

// === MESSAGE HANDLING ===

/// Unified message handler for all signer worker operations. Parses the
/// `{type, payload}` envelope, routes to the handler, and wraps the result
/// in the paired success response type. Errors are scrubbed of secret
/// material before crossing the JS boundary.
#[wasm_bindgen]
pub async fn handle_signer_message(message_val: JsValue) -> Result<JsValue, JsValue> {
    init_worker();

    let message: SignerWorkerMessage = serde_wasm_bindgen::from_value(message_val)
        .map_err(|e| scrub_js_error_value(JsValue::from_str(&format!("Invalid message: {}", e))))?;

    let request_type = WorkerRequestType::try_from(message.request_type)
        .map_err(|e| JsValue::from_str(&e))?;

    debug!("Signer worker received: {}", request_type.name());

    let response_payload = dispatch_request(request_type, message.payload)
        .await
        .map_err(|e| scrub_js_error_value(JsValue::from_str(&e)))?;

    let response_type = request_type.success_response();
    debug!(
        "Signer worker responding: {}",
        worker_response_type_name(response_type)
    );

    let response = SignerWorkerResponse {
        response_type: u32::from(response_type),
        payload: response_payload,
    };

    serde_wasm_bindgen::to_value(&response)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize response: {:?}", e)))
}

/// Route one typed request to its handler. Target-independent so native
/// tests can drive the full dispatch path.
pub async fn dispatch_request(
    request_type: WorkerRequestType,
    payload: serde_json::Value,
) -> Result<serde_json::Value, String> {
    let result = match request_type {
        WorkerRequestType::DeriveNearKeypairAndEncrypt => {
            let request: DeriveNearKeypairAndEncryptRequest =
                parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_derive_near_keypair_and_encrypt(request).await?)?
        }
        WorkerRequestType::RecoverKeypairFromPasskey => {
            let request: RecoverKeypairRequest = parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_recover_keypair_from_passkey(request).await?)?
        }
        WorkerRequestType::DecryptPrivateKeyWithPrf => {
            let request: DecryptPrivateKeyRequest = parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_decrypt_private_key_with_prf(request).await?)?
        }
        WorkerRequestType::SignTransactionsWithActions => {
            let request: SignTransactionsWithActionsRequest =
                parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_sign_transactions_with_actions(request).await?)?
        }
        WorkerRequestType::SignNep413Message => {
            let request: SignNep413Request = parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_sign_nep413_message(request).await?)?
        }
        WorkerRequestType::SignTransactionWithKeyPair => {
            let request: SignTransactionWithKeyPairRequest =
                parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_sign_transaction_with_keypair(request).await?)?
        }
        WorkerRequestType::ExtractCosePublicKey => {
            let request: ExtractCoseRequest = parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_extract_cose_public_key(request).await?)?
        }
        WorkerRequestType::CheckCanRegisterUser => {
            let request: CheckCanRegisterUserRequest = parse_typed_payload(&payload, request_type)?;
            to_json(handlers::handle_check_can_register_user(request).await?)?
        }
        WorkerRequestType::HealthCheck => serde_json::Value::Bool(true),
    };

    Ok(result)
}

fn to_json<T: serde::Serialize>(value: T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to serialize result: {}", e))
}
