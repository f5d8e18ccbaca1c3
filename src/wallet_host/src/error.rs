use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried on `ERROR.payload.code`. This is the complete set a
/// parent can observe; `READY_TIMEOUT` is transport-local on the parent side
/// and never crosses the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "NOT_CONFIGURED")]
    NotConfigured,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "PRF_UNAVAILABLE")]
    PrfUnavailable,
    #[serde(rename = "DECRYPTION_FAILED")]
    DecryptionFailed,
    #[serde(rename = "SIGNING_FAILED")]
    SigningFailed,
    #[serde(rename = "INVALID_NONCE")]
    InvalidNonce,
    #[serde(rename = "RPC_TIMEOUT")]
    RpcTimeout,
    #[serde(rename = "RPC_TRANSIENT")]
    RpcTransient,
    #[serde(rename = "BROADCAST_FAILED")]
    BroadcastFailed,
    #[serde(rename = "LINK_DEVICE_INIT_FAILED")]
    LinkDeviceInitFailed,
    #[serde(rename = "RECOVERY_FAILED")]
    RecoveryFailed,
    #[serde(rename = "HOST_ERROR")]
    HostError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::NotConfigured => "NOT_CONFIGURED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::PrfUnavailable => "PRF_UNAVAILABLE",
            ErrorCode::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorCode::SigningFailed => "SIGNING_FAILED",
            ErrorCode::InvalidNonce => "INVALID_NONCE",
            ErrorCode::RpcTimeout => "RPC_TIMEOUT",
            ErrorCode::RpcTransient => "RPC_TRANSIENT",
            ErrorCode::BroadcastFailed => "BROADCAST_FAILED",
            ErrorCode::LinkDeviceInitFailed => "LINK_DEVICE_INIT_FAILED",
            ErrorCode::RecoveryFailed => "RECOVERY_FAILED",
            ErrorCode::HostError => "HOST_ERROR",
        }
    }
}

/// Structured error as it travels to the parent. `details` is optional
/// payload for debugging; secrets are scrubbed upstream by the workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HostError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_configured() -> Self {
        Self::new(
            ErrorCode::NotConfigured,
            "Wallet service is not configured - send PM_SET_CONFIG first",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request was cancelled")
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HostError, message)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for HostError {}

/// WebAuthn abort/NotAllowedError detection. This is the single place that
/// decides whether a ceremony failure counts as a user cancellation.
pub fn is_user_cancellation(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("notallowederror")
        || lower.contains("abort")
        || lower.contains("operation either timed out or was not allowed")
        || lower.contains("cancelled by the user")
}

/// Map a WebAuthn ceremony failure onto the public taxonomy.
pub fn webauthn_error(message: String) -> HostError {
    if is_user_cancellation(&message) {
        HostError::new(ErrorCode::Cancelled, message)
    } else {
        HostError::new(ErrorCode::AuthFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_to_screaming_snake() {
        let err = HostError::new(ErrorCode::PrfUnavailable, "no prf");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "PRF_UNAVAILABLE");
    }

    #[test]
    fn not_allowed_errors_count_as_cancellation() {
        assert!(is_user_cancellation("NotAllowedError: ceremony dismissed"));
        assert!(is_user_cancellation("The operation was aborted"));
        assert!(!is_user_cancellation("InvalidStateError: already registered"));
    }

    #[test]
    fn webauthn_error_splits_cancel_from_auth_failure() {
        assert_eq!(
            webauthn_error("NotAllowedError".to_string()).code,
            ErrorCode::Cancelled
        );
        assert_eq!(
            webauthn_error("SecurityError: bad rpId".to_string()).code,
            ErrorCode::AuthFailed
        );
    }
}
