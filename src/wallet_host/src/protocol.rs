//! Wire protocol between the parent page and the wallet iframe: typed
//! request tags, the request/response envelopes, and progress payloads.

use crate::error::HostError;
use serde::{Deserialize, Serialize};

/// Request tags the dispatcher honors. Unknown tags are rejected with
/// `HOST_ERROR` rather than ignored, so protocol drift is loud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTag {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PM_SET_CONFIG")]
    SetConfig,
    #[serde(rename = "PM_CANCEL")]
    Cancel,
    #[serde(rename = "PM_REGISTER")]
    Register,
    #[serde(rename = "PM_LOGIN")]
    Login,
    #[serde(rename = "PM_LOGOUT")]
    Logout,
    #[serde(rename = "PM_GET_LOGIN_STATE")]
    GetLoginState,
    #[serde(rename = "PM_SIGN_TXS_WITH_ACTIONS")]
    SignTxsWithActions,
    #[serde(rename = "PM_SIGN_AND_SEND_TXS")]
    SignAndSendTxs,
    #[serde(rename = "PM_SEND_TRANSACTION")]
    SendTransaction,
    #[serde(rename = "PM_EXECUTE_ACTION")]
    ExecuteAction,
    #[serde(rename = "PM_SIGN_NEP413")]
    SignNep413,
    #[serde(rename = "PM_EXPORT_NEAR_KEYPAIR")]
    ExportNearKeypair,
    #[serde(rename = "PM_GET_RECENT_LOGINS")]
    GetRecentLogins,
    #[serde(rename = "PM_PREFETCH_BLOCKHEIGHT")]
    PrefetchBlockheight,
    #[serde(rename = "PM_SET_CONFIRM_BEHAVIOR")]
    SetConfirmBehavior,
    #[serde(rename = "PM_SET_CONFIRMATION_CONFIG")]
    SetConfirmationConfig,
    #[serde(rename = "PM_GET_CONFIRMATION_CONFIG")]
    GetConfirmationConfig,
    #[serde(rename = "PM_SET_THEME")]
    SetTheme,
    #[serde(rename = "PM_HAS_PASSKEY")]
    HasPasskey,
    #[serde(rename = "PM_VIEW_ACCESS_KEYS")]
    ViewAccessKeys,
    #[serde(rename = "PM_DELETE_DEVICE_KEY")]
    DeleteDeviceKey,
    #[serde(rename = "PM_RECOVER_ACCOUNT_FLOW")]
    RecoverAccountFlow,
    #[serde(rename = "PM_LINK_DEVICE_WITH_SCANNED_QR_DATA")]
    LinkDeviceWithScannedQrData,
    #[serde(rename = "PM_START_DEVICE2_LINKING_FLOW")]
    StartDevice2LinkingFlow,
    #[serde(rename = "PM_STOP_DEVICE2_LINKING_FLOW")]
    StopDevice2LinkingFlow,
}

impl RequestTag {
    pub fn parse(tag: &str) -> Option<RequestTag> {
        serde_json::from_value(serde_json::Value::String(tag.to_string())).ok()
    }
}

/// Inbound envelope from the parent port.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outbound envelope types.
pub const TYPE_READY: &str = "READY";
pub const TYPE_PONG: &str = "PONG";
pub const TYPE_PROGRESS: &str = "PROGRESS";
pub const TYPE_RESULT: &str = "PM_RESULT";
pub const TYPE_ERROR: &str = "ERROR";

/// Outbound envelope to the parent port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub payload: serde_json::Value,
}

impl ChildEnvelope {
    pub fn ready(protocol_version: u32) -> Self {
        ChildEnvelope {
            request_id: None,
            envelope_type: TYPE_READY.to_string(),
            payload: serde_json::json!({ "protocolVersion": protocol_version }),
        }
    }

    pub fn pong(request_id: Option<String>) -> Self {
        ChildEnvelope {
            request_id,
            envelope_type: TYPE_PONG.to_string(),
            payload: serde_json::json!({ "alive": true }),
        }
    }

    pub fn result(request_id: &str, payload: serde_json::Value) -> Self {
        ChildEnvelope {
            request_id: Some(request_id.to_string()),
            envelope_type: TYPE_RESULT.to_string(),
            payload,
        }
    }

    pub fn error(request_id: &str, error: &HostError) -> Self {
        ChildEnvelope {
            request_id: Some(request_id.to_string()),
            envelope_type: TYPE_ERROR.to_string(),
            payload: serde_json::to_value(error)
                .unwrap_or_else(|_| serde_json::json!({ "code": "HOST_ERROR" })),
        }
    }

    pub fn progress(request_id: &str, payload: &ProgressPayload) -> Self {
        ChildEnvelope {
            request_id: Some(request_id.to_string()),
            envelope_type: TYPE_PROGRESS.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Progress payload: `{step: 0..9, phase, status, message?, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub step: u32,
    pub phase: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

impl ProgressPayload {
    pub fn step(step: u32, phase: &str, message: impl Into<String>) -> Self {
        ProgressPayload {
            step,
            phase: phase.to_string(),
            status: ProgressStatus::Progress,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn success(step: u32, phase: &str, message: impl Into<String>) -> Self {
        ProgressPayload {
            step,
            phase: phase.to_string(),
            status: ProgressStatus::Success,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(phase: &str, message: impl Into<String>) -> Self {
        ProgressPayload {
            step: 0,
            phase: phase.to_string(),
            status: ProgressStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

// === PHASES ===
// Phase strings shared with the parent router's overlay heuristic.

pub mod phases {
    pub const PREPARATION: &str = "preparation";
    pub const USER_CONFIRMATION: &str = "user-confirmation";
    pub const CONTRACT_VERIFICATION: &str = "contract-verification";
    pub const WEBAUTHN_AUTHENTICATION: &str = "webauthn-authentication";
    pub const AUTHENTICATION_COMPLETE: &str = "authentication-complete";
    pub const TRANSACTION_SIGNING_PROGRESS: &str = "transaction-signing-progress";
    pub const TRANSACTION_SIGNING_COMPLETE: &str = "transaction-signing-complete";
    pub const BROADCASTING: &str = "broadcasting";
    pub const ACTION_COMPLETE: &str = "action-complete";
    pub const ACTION_ERROR: &str = "error";
    pub const DEVICE_LINK_AUTHORIZATION: &str = "device-link-authorization";
    pub const DEVICE_LINK_REGISTRATION: &str = "device-link-registration";
    pub const DEVICE_LINK_ERROR: &str = "device-link-error";
    pub const RECOVERY_AUTHENTICATION: &str = "recovery-authentication";
}

/// Sink for outbound envelopes. The wasm runtime posts to the adopted
/// `MessagePort`; tests collect into a buffer.
pub trait ReplySink {
    fn send(&self, envelope: ChildEnvelope);
}
