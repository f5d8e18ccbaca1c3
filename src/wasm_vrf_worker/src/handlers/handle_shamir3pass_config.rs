use crate::manager::VrfSessionManager;
use crate::shamir3pass::Shamir3Pass;
use crate::types::VrfWorkerResponse;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Shamir3PassConfigPRequest {
    pub p_b64u: String,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Shamir3PassConfigServerUrlsRequest {
    pub relay_server_url: String,
    pub apply_lock_route: String,
    pub remove_lock_route: String,
}

/// Handle SHAMIR3PASS_CONFIG_P: swap the commutative-cipher modulus.
/// Changing the prime invalidates any session state tied to the old one.
pub fn handle_shamir3pass_config_p(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: Shamir3PassConfigPRequest,
) -> VrfWorkerResponse {
    match Shamir3Pass::new(&payload.p_b64u) {
        Ok(sp) => {
            manager.borrow_mut().shamir3pass = sp;
            VrfWorkerResponse::success(message_id, None)
        }
        Err(e) => VrfWorkerResponse::fail(message_id, format!("Invalid Shamir prime: {:?}", e)),
    }
}

/// Handle SHAMIR3PASS_CONFIG_SERVER_URLS.
pub fn handle_shamir3pass_config_server_urls(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: Shamir3PassConfigServerUrlsRequest,
) -> VrfWorkerResponse {
    let mut mgr = manager.borrow_mut();
    mgr.relay_server_url = Some(payload.relay_server_url);
    mgr.apply_lock_route = Some(payload.apply_lock_route);
    mgr.remove_lock_route = Some(payload.remove_lock_route);
    VrfWorkerResponse::success(message_id, None)
}
