use log::debug;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsValue;

mod config;
mod errors;
#[cfg(target_arch = "wasm32")]
mod fetch;
mod handlers;
mod http;
mod manager;
mod shamir3pass;
mod types;
mod utils;

#[cfg(test)]
mod tests;

pub use config::*;
pub use errors::*;
pub use manager::*;
pub use shamir3pass::{decode_biguint_b64u, encode_biguint_b64u, Shamir3Pass, Shamir3PassError};
pub use utils::*;

pub use types::{
    EncryptedVrfKeypair, ServerEncryptedVrfKeypair, VrfChallenge, VrfChallengeInput, VrfStatus,
    VrfWorkerMessage, VrfWorkerResponse, WorkerRequestType,
};

pub use handlers::handle_derive_vrf_keypair_from_prf::DeriveVrfKeypairFromPrfRequest;
pub use handlers::handle_generate_vrf_challenge::GenerateVrfChallengeRequest;
pub use handlers::handle_generate_vrf_keypair_bootstrap::GenerateVrfKeypairBootstrapRequest;
pub use handlers::handle_shamir3pass_client::{
    Shamir3PassClientDecryptVrfKeypairRequest, Shamir3PassClientEncryptCurrentVrfKeypairRequest,
};
pub use handlers::handle_shamir3pass_config::{
    Shamir3PassConfigPRequest, Shamir3PassConfigServerUrlsRequest,
};
pub use handlers::handle_shamir3pass_server::{
    Shamir3PassApplyServerLockRequest, Shamir3PassRemoveServerLockRequest,
};
pub use handlers::handle_unlock_vrf_keypair::UnlockVrfKeypairRequest;

/// Worker startup: logging + panic hook.
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(config::CURRENT_LOG_LEVEL));
    debug!("VRF worker starting up");
}

// === GLOBAL STATE ===

thread_local! {
    static VRF_MANAGER: Rc<RefCell<VrfSessionManager>> =
        Rc::new(RefCell::new(VrfSessionManager::new(None, None, None, None)));
}

/// Configure the Shamir prime at boot, before the first message arrives.
#[wasm_bindgen]
pub fn configure_shamir_p(p_b64u: String) -> Result<(), JsValue> {
    VRF_MANAGER.with(|m| {
        let mut mgr = m.borrow_mut();
        mgr.shamir3pass = Shamir3Pass::new(&p_b64u)
            .map_err(|e| JsValue::from_str(&format!("Failed to create Shamir3Pass: {:?}", e)))?;
        Ok(())
    })
}

#[wasm_bindgen]
pub fn configure_shamir_server_urls(
    relay_server_url: String,
    apply_lock_route: String,
    remove_lock_route: String,
) {
    VRF_MANAGER.with(|m| {
        let mut mgr = m.borrow_mut();
        mgr.relay_server_url = Some(relay_server_url);
        mgr.apply_lock_route = Some(apply_lock_route);
        mgr.remove_lock_route = Some(remove_lock_route);
    });
}

// === WASM EXPORTS ===

/// Unified message handler: `{type, id, payload}` in, `{id, success, data, error}` out.
#[wasm_bindgen]
pub async fn handle_message(message: JsValue) -> Result<JsValue, JsValue> {
    let message: VrfWorkerMessage = serde_wasm_bindgen::from_value(message)
        .map_err(|e| JsValue::from_str(&format!("Failed to parse message: {}", e)))?;

    let manager_rc = VRF_MANAGER.with(|m| m.clone());
    let response = dispatch_message(manager_rc, message).await;

    serde_wasm_bindgen::to_value(&response)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize response: {}", e)))
}

/// Route one parsed message to its handler. Unknown or malformed requests
/// become failure responses rather than worker-level errors, so the host can
/// always correlate a reply by id.
pub async fn dispatch_message(
    manager: Rc<RefCell<VrfSessionManager>>,
    message: VrfWorkerMessage,
) -> VrfWorkerResponse {
    debug!("Received message: {}", message.msg_type);

    let request_type = match WorkerRequestType::try_from(message.msg_type.as_str()) {
        Ok(t) => t,
        Err(e) => return VrfWorkerResponse::fail(message.id, e.to_string()),
    };

    macro_rules! parse_or_fail {
        ($msg:expr, $ty:expr) => {
            match $msg.parse_payload($ty) {
                Ok(payload) => payload,
                Err(e) => return VrfWorkerResponse::fail($msg.id.clone(), e.to_string()),
            }
        };
    }

    match request_type {
        WorkerRequestType::Ping => handlers::handle_ping(message.id),
        WorkerRequestType::GenerateVrfKeypairBootstrap => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_generate_vrf_keypair_bootstrap(manager, message.id, payload)
        }
        WorkerRequestType::GenerateVrfChallenge => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_generate_vrf_challenge(manager, message.id, payload)
        }
        WorkerRequestType::UnlockVrfKeypair => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_unlock_vrf_keypair(manager, message.id, payload)
        }
        WorkerRequestType::CheckVrfStatus => {
            handlers::handle_check_vrf_status(manager, message.id)
        }
        WorkerRequestType::Logout => handlers::handle_logout(manager, message.id),
        WorkerRequestType::DeriveVrfKeypairFromPrf => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_derive_vrf_keypair_from_prf(manager, message.id, payload).await
        }
        WorkerRequestType::Shamir3PassClientEncryptCurrentVrfKeypair => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_client_encrypt_current_vrf_keypair(
                manager, message.id, payload,
            )
            .await
        }
        WorkerRequestType::Shamir3PassClientDecryptVrfKeypair => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_client_decrypt_vrf_keypair(manager, message.id, payload)
                .await
        }
        WorkerRequestType::Shamir3PassApplyServerLock => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_apply_server_lock_kek(manager, message.id, payload)
        }
        WorkerRequestType::Shamir3PassRemoveServerLock => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_remove_server_lock_kek(manager, message.id, payload)
        }
        WorkerRequestType::Shamir3PassConfigP => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_config_p(manager, message.id, payload)
        }
        WorkerRequestType::Shamir3PassConfigServerUrls => {
            let payload = parse_or_fail!(message, request_type);
            handlers::handle_shamir3pass_config_server_urls(manager, message.id, payload)
        }
    }
}
