use crate::manager::VrfSessionManager;
use crate::shamir3pass::{decode_biguint_b64u, encode_biguint_b64u};
use crate::types::VrfWorkerResponse;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

// Server-side KEK lock helpers. These run inside the relay server's own copy
// of this worker; the browser never holds the server exponents.

#[derive(Serialize, Deserialize, Clone)]
pub struct Shamir3PassApplyServerLockRequest {
    pub e_s_b64u: String,
    pub kek_c_b64u: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Shamir3PassRemoveServerLockRequest {
    pub d_s_b64u: String,
    pub kek_cs_b64u: String,
}

/// Handle SHAMIR3PASS_APPLY_SERVER_LOCK_KEK: KEK_c → KEK_cs.
pub fn handle_shamir3pass_apply_server_lock_kek(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: Shamir3PassApplyServerLockRequest,
) -> VrfWorkerResponse {
    let shamir3pass = manager.borrow().shamir3pass().clone();

    let e_s = match decode_biguint_b64u(&payload.e_s_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid e_s_b64u"),
    };
    let kek_c = match decode_biguint_b64u(&payload.kek_c_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid kek_c_b64u"),
    };

    let kek_cs = shamir3pass.add_lock(&kek_c, &e_s);
    VrfWorkerResponse::success(
        message_id,
        Some(serde_json::json!({ "kek_cs_b64u": encode_biguint_b64u(&kek_cs) })),
    )
}

/// Handle SHAMIR3PASS_REMOVE_SERVER_LOCK_KEK: KEK_cs → KEK_c.
pub fn handle_shamir3pass_remove_server_lock_kek(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: Shamir3PassRemoveServerLockRequest,
) -> VrfWorkerResponse {
    let shamir3pass = manager.borrow().shamir3pass().clone();

    let d_s = match decode_biguint_b64u(&payload.d_s_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid d_s_b64u"),
    };
    let kek_cs = match decode_biguint_b64u(&payload.kek_cs_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid kek_cs_b64u"),
    };

    let kek_c = shamir3pass.remove_lock(&kek_cs, &d_s);
    VrfWorkerResponse::success(
        message_id,
        Some(serde_json::json!({ "kek_c_b64u": encode_biguint_b64u(&kek_c) })),
    )
}
