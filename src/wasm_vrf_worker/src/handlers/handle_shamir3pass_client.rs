use crate::http::{post_apply_server_lock, post_remove_server_lock, resolve_relay_url};
use crate::manager::VrfSessionManager;
use crate::shamir3pass::{decode_biguint_b64u, encode_biguint_b64u};
use crate::types::{ServerEncryptedVrfKeypair, VrfKeypairData, VrfWorkerResponse};
use log::error;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Shamir3PassClientEncryptCurrentVrfKeypairRequest {}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Shamir3PassClientDecryptVrfKeypairRequest {
    pub near_account_id: String,
    #[serde(rename = "kek_s_b64u")]
    pub kek_s_b64u: String,
    pub ciphertext_vrf_b64u: String,
    pub key_id: String,
}

// === Shamir 3-pass client-side handlers ===

/// Handle SHAMIR3PASS_CLIENT_ENCRYPT_CURRENT_VRF_KEYPAIR.
/// Wraps the in-memory keypair under a fresh KEK and walks the registration
/// leg of the protocol: client lock → server lock → client unlock. The
/// returned `{ciphertextVrf, kek_s}` pair goes to durable storage; the relay
/// never sees the keypair plaintext.
pub async fn handle_shamir3pass_client_encrypt_current_vrf_keypair(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    _payload: Shamir3PassClientEncryptCurrentVrfKeypairRequest,
) -> VrfWorkerResponse {
    let (relay_url, apply_route) = {
        let mgr = manager.borrow();
        match (mgr.relay_server_url.clone(), mgr.apply_lock_route.clone()) {
            (Some(url), Some(route)) => (url, route),
            _ => {
                return VrfWorkerResponse::fail(
                    message_id,
                    "Shamir relay server URL / apply-lock route not configured",
                )
            }
        }
    };

    match server_lock_current_keypair(manager, &relay_url, &apply_route).await {
        Ok(result) => VrfWorkerResponse::success_from(message_id, Some(result)),
        Err(e) => {
            error!("VRF keypair server-lock failed: {}", e);
            VrfWorkerResponse::fail(message_id, e)
        }
    }
}

pub(crate) async fn server_lock_current_keypair(
    manager: Rc<RefCell<VrfSessionManager>>,
    relay_url: &str,
    apply_route: &str,
) -> Result<ServerEncryptedVrfKeypair, String> {
    let (keypair_bytes, vrf_public_key) = {
        let mgr = manager.borrow();
        mgr.serialized_keypair_data().map_err(|e| e.to_string())?
    };

    let shamir3pass = manager.borrow().shamir3pass().clone();

    // AEAD-encrypt the keypair under a fresh random KEK
    let (ciphertext_vrf, kek) = shamir3pass
        .encrypt_with_random_kek(&keypair_bytes)
        .map_err(|e| format!("encrypt_with_random_kek failed: {:?}", e))?;

    // One-time client lock, server lock, client unlock → KEK_s
    let client_lock = shamir3pass
        .generate_lock_keys()
        .map_err(|e| format!("generate_lock_keys failed: {:?}", e))?;

    let kek_c = shamir3pass.add_lock(&kek, &client_lock.e);
    let url = resolve_relay_url(relay_url, apply_route);
    let apply_resp = post_apply_server_lock(&url, &encode_biguint_b64u(&kek_c)).await?;

    let kek_cs =
        decode_biguint_b64u(&apply_resp.kek_cs_b64u).map_err(|_| "invalid kek_cs_b64u")?;
    let kek_s = shamir3pass.remove_lock(&kek_cs, &client_lock.d);

    Ok(ServerEncryptedVrfKeypair {
        ciphertext_vrf_b64u: crate::utils::base64_url_encode(&ciphertext_vrf),
        kek_s_b64u: encode_biguint_b64u(&kek_s),
        vrf_public_key,
        server_key_id: apply_resp.key_id,
    })
}

/// Handle SHAMIR3PASS_CLIENT_DECRYPT_VRF_KEYPAIR.
/// Login leg: fresh client lock over the stored KEK_s, relay removes its
/// lock, client removes its own, then decrypts and installs the keypair.
pub async fn handle_shamir3pass_client_decrypt_vrf_keypair(
    manager: Rc<RefCell<VrfSessionManager>>,
    message_id: Option<String>,
    payload: Shamir3PassClientDecryptVrfKeypairRequest,
) -> VrfWorkerResponse {
    let (relay_url, remove_route) = {
        let mgr = manager.borrow();
        match (mgr.relay_server_url.clone(), mgr.remove_lock_route.clone()) {
            (Some(url), Some(route)) => (url, route),
            _ => {
                return VrfWorkerResponse::fail(
                    message_id,
                    "Shamir relay server URL / remove-lock route not configured",
                )
            }
        }
    };

    if payload.near_account_id.is_empty()
        || payload.kek_s_b64u.is_empty()
        || payload.ciphertext_vrf_b64u.is_empty()
    {
        return VrfWorkerResponse::fail(message_id, "missing required fields");
    }

    let kek_s = match decode_biguint_b64u(&payload.kek_s_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid kek_s_b64u"),
    };
    let ciphertext_vrf = match crate::utils::base64_url_decode(&payload.ciphertext_vrf_b64u) {
        Ok(v) => v,
        Err(e) => {
            return VrfWorkerResponse::fail(message_id, format!("invalid ciphertextVrfB64u: {}", e))
        }
    };

    let shamir3pass = manager.borrow().shamir3pass().clone();

    let client_lock = match shamir3pass.generate_lock_keys() {
        Ok(k) => k,
        Err(e) => {
            return VrfWorkerResponse::fail(message_id, format!("generate_lock_keys failed: {:?}", e))
        }
    };

    let kek_st = shamir3pass.add_lock(&kek_s, &client_lock.e);
    let url = resolve_relay_url(&relay_url, &remove_route);
    let kek_t_b64u =
        match post_remove_server_lock(&url, &encode_biguint_b64u(&kek_st), payload.key_id).await {
            Ok(v) => v.kek_c_b64u,
            Err(e) => return VrfWorkerResponse::fail(message_id, e),
        };
    let kek_t = match decode_biguint_b64u(&kek_t_b64u) {
        Ok(v) => v,
        Err(_) => return VrfWorkerResponse::fail(message_id, "invalid kek_c_b64u"),
    };

    let kek = shamir3pass.remove_lock(&kek_t, &client_lock.d);

    let keypair_bytes = match shamir3pass.decrypt_with_kek(&ciphertext_vrf, &kek) {
        Ok(v) => v,
        Err(e) => {
            return VrfWorkerResponse::fail(message_id, format!("decrypt VRF failed: {:?}", e))
        }
    };

    let keypair_data: VrfKeypairData = match bincode::deserialize(&keypair_bytes) {
        Ok(v) => v,
        Err(e) => {
            return VrfWorkerResponse::fail(
                message_id,
                format!("deserialize VrfKeypairData failed: {}", e),
            )
        }
    };

    if let Err(e) = manager
        .borrow_mut()
        .load_plaintext_keypair(payload.near_account_id, keypair_data)
    {
        return VrfWorkerResponse::fail(message_id, e.to_string());
    }

    VrfWorkerResponse::success(message_id, Some(serde_json::json!({ "status": "unlocked" })))
}
