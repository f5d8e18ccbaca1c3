use serde_json::Value;
use std::fmt;

/// Structured rejection surfaced to the relying page. `code` mirrors the
/// host's error taxonomy, plus the transport-local `READY_TIMEOUT`.
#[derive(Debug, Clone)]
pub struct WalletSdkError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

/// Transport-local code: the iframe never acknowledged CONNECT in budget.
/// Never crosses the port.
pub const READY_TIMEOUT: &str = "READY_TIMEOUT";

/// Router-local code: no PROGRESS or terminal arrived within the request
/// timeout window.
pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// Router-local code: posting on the adopted port failed.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";

impl WalletSdkError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Build from an inbound `ERROR.payload`.
    pub fn from_error_payload(payload: &Value) -> Self {
        Self {
            code: payload
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("HOST_ERROR")
                .to_string(),
            message: payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Wallet host error")
                .to_string(),
            details: payload.get("details").cloned(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == "CANCELLED"
    }
}

impl fmt::Display for WalletSdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WalletSdkError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_payload_round_trip() {
        let err = WalletSdkError::from_error_payload(&json!({
            "code": "CANCELLED",
            "message": "Request was cancelled",
            "details": {"requestId": "1-2"},
        }));
        assert_eq!(err.code, "CANCELLED");
        assert!(err.is_cancelled());
        assert_eq!(err.details.unwrap()["requestId"], "1-2");
    }

    #[test]
    fn missing_fields_default_to_host_error() {
        let err = WalletSdkError::from_error_payload(&json!({}));
        assert_eq!(err.code, "HOST_ERROR");
    }
}
