use crate::manager::VrfSessionManager;
use crate::types::{VrfChallengeInput, VrfWorkerResponse};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVrfKeypairBootstrapRequest {
    pub near_account_id: String,
    #[serde(default)]
    pub vrf_input_params: Option<VrfChallengeInput>,
}

/// Handle GENERATE_VRF_KEYPAIR_BOOTSTRAP.
/// Registration-only: the fresh keypair stays unencrypted in worker memory
/// until the WebAuthn ceremony yields a PRF output to seal it with.
pub fn handle_generate_vrf_keypair_bootstrap(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: GenerateVrfKeypairBootstrapRequest,
) -> VrfWorkerResponse {
    if payload.near_account_id.is_empty() {
        return VrfWorkerResponse::fail(message_id, "Missing nearAccountId");
    }

    let result = manager
        .borrow_mut()
        .generate_keypair_bootstrap(payload.near_account_id, payload.vrf_input_params);

    match result {
        Ok(response) => VrfWorkerResponse::success_from(message_id, Some(response)),
        Err(e) => VrfWorkerResponse::fail(message_id, e.to_string()),
    }
}
