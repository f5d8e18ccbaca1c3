//! Typed payloads for the PM_* request envelopes.

use serde::{Deserialize, Serialize};

use wasm_signer_worker::{ActionParams, ConfirmationBehavior, ConfirmationConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub near_account_id: String,
    #[serde(default)]
    pub device_index: Option<u32>,
    #[serde(default)]
    pub confirmation_config: Option<ConfirmationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub near_account_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    #[serde(default)]
    pub confirmation_config: Option<ConfirmationConfig>,
    /// Sequential is the default; parallel broadcast gives up on-chain
    /// ordering guarantees.
    #[serde(default)]
    pub execute_sequentially: Option<bool>,
    #[serde(default)]
    pub wait_until: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionsPayload {
    pub near_account_id: String,
    pub transactions: Vec<TransactionInput>,
    #[serde(default)]
    pub options: Option<SignOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteActionPayload {
    pub near_account_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
    #[serde(default)]
    pub options: Option<SignOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionPayload {
    /// base64 borsh `SignedTransaction`
    pub signed_tx_base64: String,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub wait_until: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignNep413Payload {
    pub near_account_id: String,
    pub message: String,
    pub recipient: String,
    /// Base64-encoded 32-byte nonce
    pub nonce: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub confirmation_config: Option<ConfirmationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportKeypairPayload {
    pub near_account_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountScopedPayload {
    pub near_account_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfirmBehaviorPayload {
    pub near_account_id: String,
    pub behavior: ConfirmationBehavior,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfirmationConfigPayload {
    pub near_account_id: String,
    pub config: ConfirmationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetThemePayload {
    #[serde(default)]
    pub near_account_id: Option<String>,
    pub theme: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDeviceKeyPayload {
    pub near_account_id: String,
    pub device_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverAccountPayload {
    #[serde(default)]
    pub account_id_hint: Option<String>,
}

/// Payload scanned from the new device's QR code (Device-1 side).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceQrPayload {
    pub near_account_id: String,
    /// The new device's derived public key, NEAR format.
    pub device_public_key: String,
    pub device_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceWithQrPayload {
    pub qr_data: LinkDeviceQrPayload,
    #[serde(default)]
    pub options: Option<SignOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDevice2LinkingPayload {
    pub near_account_id: String,
    /// How often to poll the chain for the AddKey to land.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}
