use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CHECK_CAN_REGISTER_USER_METHOD;
use crate::encoders::{base64_standard_encode, base64_url_decode};
use crate::types::WebAuthnRegistrationCredential;

/// Registration pre-check outcome from the web-authn contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCheckResult {
    pub success: bool,
    pub verified: bool,
    pub user_exists: bool,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

/// VRF challenge data in the byte-array form the contract consumes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VrfData {
    pub vrf_input_data: Vec<u8>,
    pub vrf_output: Vec<u8>,
    pub vrf_proof: Vec<u8>,
    pub public_key: Vec<u8>,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: u64,
    pub block_hash: Vec<u8>,
}

/// Base64url-string challenge bundle as the VRF worker emits it.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VrfChallenge {
    pub vrf_input: String,
    pub vrf_output: String,
    pub vrf_proof: String,
    pub vrf_public_key: String,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: String,
    pub block_hash: String,
}

impl TryFrom<&VrfChallenge> for VrfData {
    type Error = String;

    fn try_from(challenge: &VrfChallenge) -> Result<Self, Self::Error> {
        Ok(VrfData {
            vrf_input_data: base64_url_decode(&challenge.vrf_input)
                .map_err(|e| format!("Failed to decode VRF input: {}", e))?,
            vrf_output: base64_url_decode(&challenge.vrf_output)
                .map_err(|e| format!("Failed to decode VRF output: {}", e))?,
            vrf_proof: base64_url_decode(&challenge.vrf_proof)
                .map_err(|e| format!("Failed to decode VRF proof: {}", e))?,
            public_key: base64_url_decode(&challenge.vrf_public_key)
                .map_err(|e| format!("Failed to decode VRF public key: {}", e))?,
            user_id: challenge.user_id.clone(),
            rp_id: challenge.rp_id.clone(),
            block_height: challenge
                .block_height
                .parse::<u64>()
                .map_err(|e| format!("Failed to parse block height: {}", e))?,
            block_hash: base64_url_decode(&challenge.block_hash)
                .map_err(|e| format!("Failed to decode block hash: {}", e))?,
        })
    }
}

/// Check whether the account/credential pair may register (view call, no
/// state change).
pub async fn check_can_register_user_rpc_call(
    contract_id: &str,
    rpc_url: &str,
    vrf_data: VrfData,
    webauthn_registration: WebAuthnRegistrationCredential,
) -> Result<RegistrationCheckResult, String> {
    let contract_args = serde_json::json!({
        "vrf_data": vrf_data,
        "webauthn_registration": webauthn_registration,
    });
    let rpc_body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": "check_register_from_wasm",
        "method": "query",
        "params": {
            "request_type": "call_function",
            "account_id": contract_id,
            "method_name": CHECK_CAN_REGISTER_USER_METHOD,
            "args_base64": base64_standard_encode(contract_args.to_string().as_bytes()),
            "finality": "optimistic"
        }
    });

    debug!("Registration check RPC call to: {}", rpc_url);
    let response = execute_rpc_request(rpc_url, &rpc_body).await?;
    parse_check_can_register_response(response)
}

/// Iterate comma/whitespace-separated endpoints in order, trying each until
/// one answers.
#[cfg(target_arch = "wasm32")]
async fn execute_rpc_request(rpc_url: &str, rpc_body: &Value) -> Result<Value, String> {
    use crate::fetch::{fetch_json_post, response_ok, response_status, response_text};

    let endpoints: Vec<&str> = rpc_url
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if endpoints.is_empty() {
        return Err("NEAR RPC URL cannot be empty".to_string());
    }

    let body = rpc_body.to_string();
    let mut last_error: Option<String> = None;

    for (index, endpoint) in endpoints.iter().enumerate() {
        let resp = match fetch_json_post(endpoint, &body).await {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        match response_ok(&resp) {
            Ok(true) => {}
            Ok(false) => {
                last_error = Some(format!(
                    "HTTP error from {}: {}",
                    endpoint,
                    response_status(&resp).unwrap_or(0)
                ));
                continue;
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }

        let text = match response_text(&resp).await {
            Ok(t) => t,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        let result: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                last_error = Some(format!("Failed to parse JSON: {}", e));
                continue;
            }
        };

        if index > 0 {
            warn!("RPC call succeeded using fallback endpoint: {}", endpoint);
        }

        return Ok(result);
    }

    Err(last_error.unwrap_or_else(|| "RPC request failed".to_string()))
}

#[cfg(not(target_arch = "wasm32"))]
async fn execute_rpc_request(_rpc_url: &str, _rpc_body: &Value) -> Result<Value, String> {
    Err("fetch is not available outside the browser".to_string())
}

/// Parse the view-call response for the registration pre-check.
pub fn parse_check_can_register_response(result: Value) -> Result<RegistrationCheckResult, String> {
    if let Some(error) = result.get("error") {
        let error_msg = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown RPC error");
        warn!("RPC error: {}", error_msg);
        return Ok(RegistrationCheckResult {
            success: false,
            verified: false,
            user_exists: false,
            error: Some(error_msg.to_string()),
            logs: vec![],
        });
    }

    let contract_result = result
        .get("result")
        .ok_or("Missing result in RPC response")?;

    if let Some(error) = contract_result.get("error") {
        let error_msg = match error.as_str() {
            Some(s) => s.to_string(),
            None => serde_json::to_string(error)
                .unwrap_or_else(|_| "Unknown contract error".to_string()),
        };
        warn!("Contract execution error: {}", error_msg);
        return Ok(RegistrationCheckResult {
            success: false,
            verified: false,
            user_exists: false,
            error: Some(error_msg),
            logs: vec![],
        });
    }

    let result_bytes = contract_result
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or("Missing or invalid result.result array")?;

    let result_u8: Vec<u8> = result_bytes
        .iter()
        .map(|v| v.as_u64().unwrap_or(0) as u8)
        .collect();

    let result_string =
        String::from_utf8(result_u8).map_err(|e| format!("Failed to decode result string: {}", e))?;

    let contract_response: Value = serde_json::from_str(&result_string)
        .map_err(|e| format!("Failed to parse contract response: {}", e))?;

    let verified = contract_response
        .get("verified")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let user_exists = contract_response
        .get("user_exists")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let logs = contract_result
        .get("logs")
        .and_then(|l| l.as_array())
        .map(|logs_array| {
            logs_array
                .iter()
                .filter_map(|log| log.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    debug!(
        "Registration check result: verified={}, user_exists={}",
        verified, user_exists
    );

    Ok(RegistrationCheckResult {
        success: true,
        verified,
        user_exists,
        error: if verified {
            None
        } else {
            Some("Contract registration check failed".to_string())
        },
        logs,
    })
}
