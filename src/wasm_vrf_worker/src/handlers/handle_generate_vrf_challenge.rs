use crate::manager::VrfSessionManager;
use crate::types::{VrfChallengeInput, VrfWorkerResponse};
use log::error;
use std::cell::RefCell;
use std::rc::Rc;

pub type GenerateVrfChallengeRequest = VrfChallengeInput;

/// Handle GENERATE_VRF_CHALLENGE. Requires an unlocked session; the challenge
/// binds `{userId, rpId, blockHeight, blockHash}` and its output prefix
/// becomes the WebAuthn challenge.
pub fn handle_generate_vrf_challenge(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: GenerateVrfChallengeRequest,
) -> VrfWorkerResponse {
    match manager.borrow().generate_challenge(payload) {
        Ok(challenge) => VrfWorkerResponse::success_from(message_id, Some(challenge)),
        Err(e) => {
            error!("VRF challenge generation failed: {}", e);
            VrfWorkerResponse::fail(message_id, e.to_string())
        }
    }
}
