use crate::manager::VrfSessionManager;
use crate::types::{EncryptedVrfKeypair, VrfWorkerResponse};
use log::error;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnlockVrfKeypairRequest {
    pub near_account_id: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    /// base64url PRF output from the WebAuthn assertion
    pub prf_key: String,
}

/// Handle UNLOCK_VRF_KEYPAIR. Installs the decrypted keypair as the single
/// active session on success.
pub fn handle_unlock_vrf_keypair(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: UnlockVrfKeypairRequest,
) -> VrfWorkerResponse {
    let prf_key = match crate::utils::base64_url_decode(&payload.prf_key) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return VrfWorkerResponse::fail(message_id, "Missing PRF key"),
        Err(_) => return VrfWorkerResponse::fail(message_id, "Missing or invalid PRF key"),
    };

    if payload.near_account_id.is_empty() {
        return VrfWorkerResponse::fail(message_id, "Missing nearAccountId");
    }

    let result = manager.borrow_mut().unlock_keypair(
        payload.near_account_id,
        payload.encrypted_vrf_keypair,
        &prf_key,
    );

    match result {
        Ok(_) => VrfWorkerResponse::success(message_id, None),
        Err(e) => {
            error!("VRF keypair unlock failed: {}", e);
            VrfWorkerResponse::fail(message_id, e.to_string())
        }
    }
}
