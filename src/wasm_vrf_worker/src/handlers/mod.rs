pub mod handle_derive_vrf_keypair_from_prf;
pub mod handle_generate_vrf_challenge;
pub mod handle_generate_vrf_keypair_bootstrap;
pub mod handle_shamir3pass_client;
pub mod handle_shamir3pass_config;
pub mod handle_shamir3pass_server;
pub mod handle_unlock_vrf_keypair;

pub use handle_derive_vrf_keypair_from_prf::*;
pub use handle_generate_vrf_challenge::*;
pub use handle_generate_vrf_keypair_bootstrap::*;
pub use handle_shamir3pass_client::*;
pub use handle_shamir3pass_config::*;
pub use handle_shamir3pass_server::*;
pub use handle_unlock_vrf_keypair::*;

use crate::manager::VrfSessionManager;
use crate::types::VrfWorkerResponse;
use crate::utils::now_ms;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Handle PING
pub fn handle_ping(message_id: Option<String>) -> VrfWorkerResponse {
    #[derive(Serialize)]
    struct PingStatus {
        status: &'static str,
        timestamp: f64,
    }

    VrfWorkerResponse::success_from(
        message_id,
        Some(PingStatus {
            status: "alive",
            timestamp: now_ms(),
        }),
    )
}

/// Handle CHECK_VRF_STATUS
pub fn handle_check_vrf_status(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
) -> VrfWorkerResponse {
    let status = manager.borrow().status();
    VrfWorkerResponse::success_from(message_id, Some(status))
}

/// Handle LOGOUT
pub fn handle_logout(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
) -> VrfWorkerResponse {
    match manager.borrow_mut().logout() {
        Ok(_) => VrfWorkerResponse::success(message_id, None),
        Err(e) => VrfWorkerResponse::fail(message_id, e.to_string()),
    }
}
