use crate::manager::VrfSessionManager;
use crate::types::{VrfChallengeInput, VrfWorkerResponse};
use log::error;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeriveVrfKeypairFromPrfRequest {
    pub near_account_id: String,
    /// base64url PRF output (the VRF-derivation salt's eval)
    pub prf_output: String,
    #[serde(default)]
    pub vrf_input_params: Option<VrfChallengeInput>,
    /// When true the derived keypair is installed as the active session
    /// (recovery path); otherwise it is only derived and re-encrypted.
    #[serde(default)]
    pub save_in_memory: bool,
}

/// Handle DERIVE_VRF_KEYPAIR_FROM_PRF. Deterministic derivation lets a
/// recovered passkey rebuild the exact VRF identity it registered with.
pub async fn handle_derive_vrf_keypair_from_prf(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: DeriveVrfKeypairFromPrfRequest,
) -> VrfWorkerResponse {
    let prf_output = match crate::utils::base64_url_decode(&payload.prf_output) {
        Ok(bytes) => bytes,
        Err(e) => {
            return VrfWorkerResponse::fail(message_id, format!("Invalid prfOutput: {}", e))
        }
    };

    let derived = {
        let mgr = manager.borrow();
        mgr.derive_keypair_from_prf(&prf_output, &payload.near_account_id, payload.vrf_input_params)
    };

    match derived {
        Ok((response, keypair)) => {
            if payload.save_in_memory {
                manager
                    .borrow_mut()
                    .store_keypair_in_memory(keypair, payload.near_account_id);
            }
            VrfWorkerResponse::success_from(message_id, Some(response))
        }
        Err(e) => {
            error!("Deterministic VRF derivation failed: {}", e);
            VrfWorkerResponse::fail(message_id, e.to_string())
        }
    }
}
