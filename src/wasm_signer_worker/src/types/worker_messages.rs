// === WORKER MESSAGES: REQUEST & RESPONSE TYPES ===
// Numeric request/response enums shared with the wallet host. Success and
// failure response codes are paired per request type, in the same order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkerRequestType {
    DeriveNearKeypairAndEncrypt = 0,
    RecoverKeypairFromPasskey = 1,
    DecryptPrivateKeyWithPrf = 2,
    SignTransactionsWithActions = 3,
    SignNep413Message = 4,
    SignTransactionWithKeyPair = 5,
    ExtractCosePublicKey = 6,
    CheckCanRegisterUser = 7,
    HealthCheck = 8,
}

impl TryFrom<u32> for WorkerRequestType {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, <Self as TryFrom<u32>>::Error> {
        match value {
            0 => Ok(WorkerRequestType::DeriveNearKeypairAndEncrypt),
            1 => Ok(WorkerRequestType::RecoverKeypairFromPasskey),
            2 => Ok(WorkerRequestType::DecryptPrivateKeyWithPrf),
            3 => Ok(WorkerRequestType::SignTransactionsWithActions),
            4 => Ok(WorkerRequestType::SignNep413Message),
            5 => Ok(WorkerRequestType::SignTransactionWithKeyPair),
            6 => Ok(WorkerRequestType::ExtractCosePublicKey),
            7 => Ok(WorkerRequestType::CheckCanRegisterUser),
            8 => Ok(WorkerRequestType::HealthCheck),
            _ => Err(format!("Invalid WorkerRequestType value: {}", value)),
        }
    }
}

impl WorkerRequestType {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequestType::DeriveNearKeypairAndEncrypt => "DERIVE_NEAR_KEYPAIR_AND_ENCRYPT",
            WorkerRequestType::RecoverKeypairFromPasskey => "RECOVER_KEYPAIR_FROM_PASSKEY",
            WorkerRequestType::DecryptPrivateKeyWithPrf => "DECRYPT_PRIVATE_KEY_WITH_PRF",
            WorkerRequestType::SignTransactionsWithActions => "SIGN_TRANSACTIONS_WITH_ACTIONS",
            WorkerRequestType::SignNep413Message => "SIGN_NEP413_MESSAGE",
            WorkerRequestType::SignTransactionWithKeyPair => "SIGN_TRANSACTION_WITH_KEYPAIR",
            WorkerRequestType::ExtractCosePublicKey => "EXTRACT_COSE_PUBLIC_KEY",
            WorkerRequestType::CheckCanRegisterUser => "CHECK_CAN_REGISTER_USER",
            WorkerRequestType::HealthCheck => "HEALTH_CHECK",
        }
    }

    /// The paired success response code for this request.
    pub fn success_response(&self) -> WorkerResponseType {
        match self {
            WorkerRequestType::DeriveNearKeypairAndEncrypt => {
                WorkerResponseType::DeriveNearKeypairAndEncryptSuccess
            }
            WorkerRequestType::RecoverKeypairFromPasskey => {
                WorkerResponseType::RecoverKeypairFromPasskeySuccess
            }
            WorkerRequestType::DecryptPrivateKeyWithPrf => {
                WorkerResponseType::DecryptPrivateKeyWithPrfSuccess
            }
            WorkerRequestType::SignTransactionsWithActions => {
                WorkerResponseType::SignTransactionsWithActionsSuccess
            }
            WorkerRequestType::SignNep413Message => WorkerResponseType::SignNep413MessageSuccess,
            WorkerRequestType::SignTransactionWithKeyPair => {
                WorkerResponseType::SignTransactionWithKeyPairSuccess
            }
            WorkerRequestType::ExtractCosePublicKey => {
                WorkerResponseType::ExtractCosePublicKeySuccess
            }
            WorkerRequestType::CheckCanRegisterUser => {
                WorkerResponseType::CheckCanRegisterUserSuccess
            }
            WorkerRequestType::HealthCheck => WorkerResponseType::HealthCheckSuccess,
        }
    }

    /// The paired failure response code for this request.
    pub fn failure_response(&self) -> WorkerResponseType {
        match self {
            WorkerRequestType::DeriveNearKeypairAndEncrypt => {
                WorkerResponseType::DeriveNearKeypairAndEncryptFailure
            }
            WorkerRequestType::RecoverKeypairFromPasskey => {
                WorkerResponseType::RecoverKeypairFromPasskeyFailure
            }
            WorkerRequestType::DecryptPrivateKeyWithPrf => {
                WorkerResponseType::DecryptPrivateKeyWithPrfFailure
            }
            WorkerRequestType::SignTransactionsWithActions => {
                WorkerResponseType::SignTransactionsWithActionsFailure
            }
            WorkerRequestType::SignNep413Message => WorkerResponseType::SignNep413MessageFailure,
            WorkerRequestType::SignTransactionWithKeyPair => {
                WorkerResponseType::SignTransactionWithKeyPairFailure
            }
            WorkerRequestType::ExtractCosePublicKey => {
                WorkerResponseType::ExtractCosePublicKeyFailure
            }
            WorkerRequestType::CheckCanRegisterUser => {
                WorkerResponseType::CheckCanRegisterUserFailure
            }
            WorkerRequestType::HealthCheck => WorkerResponseType::HealthCheckFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkerResponseType {
    // Success responses, one per request type (same order)
    DeriveNearKeypairAndEncryptSuccess = 0,
    RecoverKeypairFromPasskeySuccess = 1,
    DecryptPrivateKeyWithPrfSuccess = 2,
    SignTransactionsWithActionsSuccess = 3,
    SignNep413MessageSuccess = 4,
    SignTransactionWithKeyPairSuccess = 5,
    ExtractCosePublicKeySuccess = 6,
    CheckCanRegisterUserSuccess = 7,
    HealthCheckSuccess = 8,

    // Failure responses, one per request type (same order)
    DeriveNearKeypairAndEncryptFailure = 9,
    RecoverKeypairFromPasskeyFailure = 10,
    DecryptPrivateKeyWithPrfFailure = 11,
    SignTransactionsWithActionsFailure = 12,
    SignNep413MessageFailure = 13,
    SignTransactionWithKeyPairFailure = 14,
    ExtractCosePublicKeyFailure = 15,
    CheckCanRegisterUserFailure = 16,
    HealthCheckFailure = 17,
}

impl From<WorkerResponseType> for u32 {
    fn from(value: WorkerResponseType) -> Self {
        value as u32
    }
}

pub fn worker_response_type_name(response_type: WorkerResponseType) -> &'static str {
    match response_type {
        WorkerResponseType::DeriveNearKeypairAndEncryptSuccess => {
            "DERIVE_NEAR_KEYPAIR_AND_ENCRYPT_SUCCESS"
        }
        WorkerResponseType::RecoverKeypairFromPasskeySuccess => {
            "RECOVER_KEYPAIR_FROM_PASSKEY_SUCCESS"
        }
        WorkerResponseType::DecryptPrivateKeyWithPrfSuccess => {
            "DECRYPT_PRIVATE_KEY_WITH_PRF_SUCCESS"
        }
        WorkerResponseType::SignTransactionsWithActionsSuccess => {
            "SIGN_TRANSACTIONS_WITH_ACTIONS_SUCCESS"
        }
        WorkerResponseType::SignNep413MessageSuccess => "SIGN_NEP413_MESSAGE_SUCCESS",
        WorkerResponseType::SignTransactionWithKeyPairSuccess => {
            "SIGN_TRANSACTION_WITH_KEYPAIR_SUCCESS"
        }
        WorkerResponseType::ExtractCosePublicKeySuccess => "EXTRACT_COSE_PUBLIC_KEY_SUCCESS",
        WorkerResponseType::CheckCanRegisterUserSuccess => "CHECK_CAN_REGISTER_USER_SUCCESS",
        WorkerResponseType::HealthCheckSuccess => "HEALTH_CHECK_SUCCESS",
        WorkerResponseType::DeriveNearKeypairAndEncryptFailure => {
            "DERIVE_NEAR_KEYPAIR_AND_ENCRYPT_FAILURE"
        }
        WorkerResponseType::RecoverKeypairFromPasskeyFailure => {
            "RECOVER_KEYPAIR_FROM_PASSKEY_FAILURE"
        }
        WorkerResponseType::DecryptPrivateKeyWithPrfFailure => {
            "DECRYPT_PRIVATE_KEY_WITH_PRF_FAILURE"
        }
        WorkerResponseType::SignTransactionsWithActionsFailure => {
            "SIGN_TRANSACTIONS_WITH_ACTIONS_FAILURE"
        }
        WorkerResponseType::SignNep413MessageFailure => "SIGN_NEP413_MESSAGE_FAILURE",
        WorkerResponseType::SignTransactionWithKeyPairFailure => {
            "SIGN_TRANSACTION_WITH_KEYPAIR_FAILURE"
        }
        WorkerResponseType::ExtractCosePublicKeyFailure => "EXTRACT_COSE_PUBLIC_KEY_FAILURE",
        WorkerResponseType::CheckCanRegisterUserFailure => "CHECK_CAN_REGISTER_USER_FAILURE",
        WorkerResponseType::HealthCheckFailure => "HEALTH_CHECK_FAILURE",
    }
}

/// Outer request envelope: `{ type, payload }`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignerWorkerMessage {
    #[serde(rename = "type")]
    pub request_type: u32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outer response envelope: `{ type, payload }`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignerWorkerResponse {
    #[serde(rename = "type")]
    pub response_type: u32,
    pub payload: serde_json::Value,
}

/// Deserialize a typed payload, keeping the request name in the error so the
/// host can surface `"Invalid payload for <MESSAGE_TYPE>: ..."`.
pub fn parse_typed_payload<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
    request_type: WorkerRequestType,
) -> Result<T, String> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        crate::error::scrub_error_message(&format!(
            "Invalid payload for {}: {}",
            request_type.name(),
            e
        ))
    })
}
