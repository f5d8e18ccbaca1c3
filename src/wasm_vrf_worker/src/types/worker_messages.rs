// === WORKER MESSAGES: REQUEST & RESPONSE TYPES ===

use crate::errors::VrfWorkerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// String-tagged request types accepted by the VRF worker. The wallet host
/// sends these tags verbatim over `postMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRequestType {
    Ping,
    GenerateVrfKeypairBootstrap,
    GenerateVrfChallenge,
    UnlockVrfKeypair,
    CheckVrfStatus,
    Logout,
    DeriveVrfKeypairFromPrf,
    Shamir3PassClientEncryptCurrentVrfKeypair,
    Shamir3PassClientDecryptVrfKeypair,
    Shamir3PassApplyServerLock,
    Shamir3PassRemoveServerLock,
    Shamir3PassConfigP,
    Shamir3PassConfigServerUrls,
}

impl TryFrom<&str> for WorkerRequestType {
    type Error = VrfWorkerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PING" => Ok(WorkerRequestType::Ping),
            "GENERATE_VRF_KEYPAIR_BOOTSTRAP" => Ok(WorkerRequestType::GenerateVrfKeypairBootstrap),
            "GENERATE_VRF_CHALLENGE" => Ok(WorkerRequestType::GenerateVrfChallenge),
            "UNLOCK_VRF_KEYPAIR" => Ok(WorkerRequestType::UnlockVrfKeypair),
            "CHECK_VRF_STATUS" => Ok(WorkerRequestType::CheckVrfStatus),
            "LOGOUT" => Ok(WorkerRequestType::Logout),
            "DERIVE_VRF_KEYPAIR_FROM_PRF" => Ok(WorkerRequestType::DeriveVrfKeypairFromPrf),
            "SHAMIR3PASS_CLIENT_ENCRYPT_CURRENT_VRF_KEYPAIR" => {
                Ok(WorkerRequestType::Shamir3PassClientEncryptCurrentVrfKeypair)
            }
            "SHAMIR3PASS_CLIENT_DECRYPT_VRF_KEYPAIR" => {
                Ok(WorkerRequestType::Shamir3PassClientDecryptVrfKeypair)
            }
            "SHAMIR3PASS_APPLY_SERVER_LOCK_KEK" => {
                Ok(WorkerRequestType::Shamir3PassApplyServerLock)
            }
            "SHAMIR3PASS_REMOVE_SERVER_LOCK_KEK" => {
                Ok(WorkerRequestType::Shamir3PassRemoveServerLock)
            }
            "SHAMIR3PASS_CONFIG_P" => Ok(WorkerRequestType::Shamir3PassConfigP),
            "SHAMIR3PASS_CONFIG_SERVER_URLS" => Ok(WorkerRequestType::Shamir3PassConfigServerUrls),
            other => Err(VrfWorkerError::InvalidMessageFormat(format!(
                "Unknown VRF worker request type: {}",
                other
            ))),
        }
    }
}

impl WorkerRequestType {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequestType::Ping => "PING",
            WorkerRequestType::GenerateVrfKeypairBootstrap => "GENERATE_VRF_KEYPAIR_BOOTSTRAP",
            WorkerRequestType::GenerateVrfChallenge => "GENERATE_VRF_CHALLENGE",
            WorkerRequestType::UnlockVrfKeypair => "UNLOCK_VRF_KEYPAIR",
            WorkerRequestType::CheckVrfStatus => "CHECK_VRF_STATUS",
            WorkerRequestType::Logout => "LOGOUT",
            WorkerRequestType::DeriveVrfKeypairFromPrf => "DERIVE_VRF_KEYPAIR_FROM_PRF",
            WorkerRequestType::Shamir3PassClientEncryptCurrentVrfKeypair => {
                "SHAMIR3PASS_CLIENT_ENCRYPT_CURRENT_VRF_KEYPAIR"
            }
            WorkerRequestType::Shamir3PassClientDecryptVrfKeypair => {
                "SHAMIR3PASS_CLIENT_DECRYPT_VRF_KEYPAIR"
            }
            WorkerRequestType::Shamir3PassApplyServerLock => "SHAMIR3PASS_APPLY_SERVER_LOCK_KEK",
            WorkerRequestType::Shamir3PassRemoveServerLock => "SHAMIR3PASS_REMOVE_SERVER_LOCK_KEK",
            WorkerRequestType::Shamir3PassConfigP => "SHAMIR3PASS_CONFIG_P",
            WorkerRequestType::Shamir3PassConfigServerUrls => "SHAMIR3PASS_CONFIG_SERVER_URLS",
        }
    }
}

/// Inbound worker message envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VrfWorkerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl VrfWorkerMessage {
    pub fn parse_payload<T: DeserializeOwned>(
        &self,
        request_type: WorkerRequestType,
    ) -> Result<T, VrfWorkerError> {
        let payload = self.payload.as_ref().ok_or_else(|| {
            VrfWorkerError::MissingRequiredData(format!("{}: Missing payload", request_type.name()))
        })?;

        serde_json::from_value(payload.clone()).map_err(|e| {
            VrfWorkerError::MessageParsingError(format!("{}: {}", request_type.name(), e))
        })
    }
}

/// Outbound worker response envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VrfWorkerResponse {
    pub id: Option<String>,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl VrfWorkerResponse {
    pub fn success(id: Option<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Convenience for handlers that return a serializable payload.
    pub fn success_from<T: Serialize>(id: Option<String>, data: Option<T>) -> Self {
        let data = data.and_then(|d| serde_json::to_value(d).ok());
        Self::success(id, data)
    }

    pub fn fail(id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
