use serde::{Deserialize, Serialize};

// === SHAMIR 3-PASS RELAY HTTP TYPES ===

/// POST body for the relay's apply-server-lock route.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShamirApplyServerLockHttpRequest {
    pub kek_c_b64u: String,
}

/// Reply from apply-server-lock: the doubly-locked KEK and the server key id
/// the relay wants echoed back at unlock time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShamirApplyServerLockHttpResponse {
    pub kek_cs_b64u: String,
    #[serde(default)]
    pub key_id: Option<String>,
}

/// POST body for the relay's remove-server-lock route.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShamirRemoveServerLockHttpRequest {
    pub kek_cs_b64u: String,
    pub key_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShamirRemoveServerLockHttpResponse {
    pub kek_c_b64u: String,
}

impl ShamirApplyServerLockHttpResponse {
    pub fn from_str(s: &str) -> Result<Self, String> {
        serde_json::from_str(s).map_err(|e| format!("Invalid apply-server-lock response: {}", e))
    }
}

impl ShamirRemoveServerLockHttpResponse {
    pub fn from_str(s: &str) -> Result<Self, String> {
        serde_json::from_str(s).map_err(|e| format!("Invalid remove-server-lock response: {}", e))
    }
}
