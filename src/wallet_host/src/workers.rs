//! Bridges to the two privileged workers. The dispatcher only sees the
//! typed managers; behind them sits either a real `web_sys::Worker` (wasm)
//! or the worker crates linked in-process (native tests), so the same flow
//! logic runs end-to-end in both environments.

use futures::future::LocalBoxFuture;
use serde_json::Value;

use wasm_signer_worker::SignerRequestType;
use wasm_vrf_worker::{
    EncryptedVrfKeypair, ServerEncryptedVrfKeypair, VrfChallenge, VrfChallengeInput, VrfStatus,
};

use crate::error::{ErrorCode, HostError};

pub trait SignerWorkerBridge {
    fn request(
        &self,
        request_type: SignerRequestType,
        payload: Value,
    ) -> LocalBoxFuture<'static, Result<Value, String>>;
}

pub trait VrfWorkerBridge {
    fn request(
        &self,
        msg_type: &'static str,
        payload: Option<Value>,
    ) -> LocalBoxFuture<'static, Result<Value, String>>;
}

// === IN-PROCESS BRIDGES (native) ===

/// Runs the signer worker crate directly in this thread. Used by native
/// tests; the browser build talks to an isolated Worker instead.
#[cfg(not(target_arch = "wasm32"))]
pub struct InProcessSignerBridge;

#[cfg(not(target_arch = "wasm32"))]
impl SignerWorkerBridge for InProcessSignerBridge {
    fn request(
        &self,
        request_type: SignerRequestType,
        payload: Value,
    ) -> LocalBoxFuture<'static, Result<Value, String>> {
        use futures::FutureExt;
        async move { wasm_signer_worker::dispatch_request(request_type, payload).await }
            .boxed_local()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub struct InProcessVrfBridge {
    manager: std::rc::Rc<std::cell::RefCell<wasm_vrf_worker::VrfSessionManager>>,
}

#[cfg(not(target_arch = "wasm32"))]
impl InProcessVrfBridge {
    pub fn new() -> Self {
        Self {
            manager: std::rc::Rc::new(std::cell::RefCell::new(
                wasm_vrf_worker::VrfSessionManager::new(None, None, None, None),
            )),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for InProcessVrfBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl VrfWorkerBridge for InProcessVrfBridge {
    fn request(
        &self,
        msg_type: &'static str,
        payload: Option<Value>,
    ) -> LocalBoxFuture<'static, Result<Value, String>> {
        use futures::FutureExt;
        let manager = self.manager.clone();
        async move {
            let message = wasm_vrf_worker::VrfWorkerMessage {
                msg_type: msg_type.to_string(),
                id: None,
                payload,
            };
            let response = wasm_vrf_worker::dispatch_message(manager, message).await;
            if response.success {
                Ok(response.data.unwrap_or(Value::Null))
            } else {
                Err(response
                    .error
                    .unwrap_or_else(|| "VRF worker failed".to_string()))
            }
        }
        .boxed_local()
    }
}

// === WEB WORKER BRIDGES (browser) ===

#[cfg(target_arch = "wasm32")]
pub use web_worker::{WebWorkerSignerBridge, WebWorkerVrfBridge};

#[cfg(target_arch = "wasm32")]
mod web_worker {
    use super::*;
    use futures::channel::oneshot;
    use futures::FutureExt;
    use log::debug;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;

    type Pending = Rc<RefCell<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

    /// Shared id-correlated request channel over one `web_sys::Worker`.
    struct WorkerChannel {
        worker: web_sys::Worker,
        pending: Pending,
        next_id: std::cell::Cell<u64>,
        _onmessage: Closure<dyn FnMut(web_sys::MessageEvent)>,
    }

    impl WorkerChannel {
        fn new(script_url: &str) -> Result<Self, String> {
            let options = web_sys::WorkerOptions::new();
            options.set_type(web_sys::WorkerType::Module);
            let worker = web_sys::Worker::new_with_options(script_url, &options)
                .map_err(|e| format!("Failed to spawn worker {}: {:?}", script_url, e))?;

            let pending: Pending = Rc::new(RefCell::new(HashMap::new()));
            let pending_for_handler = pending.clone();

            let onmessage = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
                move |event: web_sys::MessageEvent| {
                    let data = event.data();
                    let parsed: Result<Value, _> = serde_wasm_bindgen::from_value(data);
                    let Ok(value) = parsed else { return };

                    let Some(id) = value.get("bridgeId").and_then(|v| v.as_u64()) else {
                        debug!("Worker message without bridgeId (dropped)");
                        return;
                    };

                    if let Some(sender) = pending_for_handler.borrow_mut().remove(&id) {
                        let result = match value.get("error").and_then(|e| e.as_str()) {
                            Some(err) => Err(err.to_string()),
                            None => Ok(value
                                .get("payload")
                                .cloned()
                                .unwrap_or(Value::Null)),
                        };
                        let _ = sender.send(result);
                    }
                },
            );
            worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

            Ok(Self {
                worker,
                pending,
                next_id: std::cell::Cell::new(1),
                _onmessage: onmessage,
            })
        }

        fn post(&self, mut body: Value) -> LocalBoxFuture<'static, Result<Value, String>> {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("bridgeId".to_string(), Value::from(id));
            }

            let (sender, receiver) = oneshot::channel();
            self.pending.borrow_mut().insert(id, sender);

            let message = serde_wasm_bindgen::to_value(&body).unwrap_or(JsValue::NULL);
            if let Err(e) = self.worker.post_message(&message) {
                self.pending.borrow_mut().remove(&id);
                let err = format!("postMessage to worker failed: {:?}", e);
                return async move { Err(err) }.boxed_local();
            }

            async move {
                receiver
                    .await
                    .unwrap_or_else(|_| Err("Worker channel closed".to_string()))
            }
            .boxed_local()
        }
    }

    pub struct WebWorkerSignerBridge {
        channel: WorkerChannel,
    }

    impl WebWorkerSignerBridge {
        pub fn new(script_url: &str) -> Result<Self, String> {
            Ok(Self {
                channel: WorkerChannel::new(script_url)?,
            })
        }
    }

    impl SignerWorkerBridge for WebWorkerSignerBridge {
        fn request(
            &self,
            request_type: SignerRequestType,
            payload: Value,
        ) -> LocalBoxFuture<'static, Result<Value, String>> {
            self.channel.post(serde_json::json!({
                "type": request_type as u32,
                "payload": payload,
            }))
        }
    }

    pub struct WebWorkerVrfBridge {
        channel: WorkerChannel,
    }

    impl WebWorkerVrfBridge {
        pub fn new(script_url: &str) -> Result<Self, String> {
            Ok(Self {
                channel: WorkerChannel::new(script_url)?,
            })
        }
    }

    impl VrfWorkerBridge for WebWorkerVrfBridge {
        fn request(
            &self,
            msg_type: &'static str,
            payload: Option<Value>,
        ) -> LocalBoxFuture<'static, Result<Value, String>> {
            self.channel.post(serde_json::json!({
                "type": msg_type,
                "payload": payload,
            }))
        }
    }
}

// === TYPED MANAGERS ===

/// Typed facade over the VRF worker message set.
pub struct VrfWorkerManager {
    bridge: std::rc::Rc<dyn VrfWorkerBridge>,
}

impl VrfWorkerManager {
    pub fn new(bridge: std::rc::Rc<dyn VrfWorkerBridge>) -> Self {
        Self { bridge }
    }

    pub async fn ping(&self) -> Result<(), HostError> {
        self.bridge
            .request("PING", None)
            .await
            .map(|_| ())
            .map_err(HostError::host)
    }

    pub async fn generate_keypair_bootstrap(
        &self,
        near_account_id: &str,
        input: Option<VrfChallengeInput>,
    ) -> Result<(String, Option<VrfChallenge>), HostError> {
        let payload = serde_json::json!({
            "nearAccountId": near_account_id,
            "vrfInputParams": input,
        });
        let data = self
            .bridge
            .request("GENERATE_VRF_KEYPAIR_BOOTSTRAP", Some(payload))
            .await
            .map_err(HostError::host)?;

        let vrf_public_key = data
            .get("vrf_public_key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let vrf_challenge = data
            .get("vrf_challenge")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        Ok((vrf_public_key, vrf_challenge))
    }

    pub async fn generate_challenge(
        &self,
        input: VrfChallengeInput,
    ) -> Result<VrfChallenge, HostError> {
        let payload = serde_json::to_value(&input)
            .map_err(|e| HostError::host(format!("Failed to serialize VRF input: {}", e)))?;
        let data = self
            .bridge
            .request("GENERATE_VRF_CHALLENGE", Some(payload))
            .await
            .map_err(HostError::host)?;
        serde_json::from_value(data)
            .map_err(|e| HostError::host(format!("Invalid VRF challenge shape: {}", e)))
    }

    pub async fn unlock_keypair(
        &self,
        near_account_id: &str,
        encrypted: &EncryptedVrfKeypair,
        prf_key_b64u: &str,
    ) -> Result<(), HostError> {
        let payload = serde_json::json!({
            "nearAccountId": near_account_id,
            "encryptedVrfKeypair": encrypted,
            "prfKey": prf_key_b64u,
        });
        self.bridge
            .request("UNLOCK_VRF_KEYPAIR", Some(payload))
            .await
            .map(|_| ())
            .map_err(|e| HostError::new(ErrorCode::DecryptionFailed, e))
    }

    /// Server-assisted unlock: the relay removes its KEK lock without
    /// observing the VRF plaintext. Returns Err when the relay path is
    /// unavailable; the caller falls back to the PRF unlock.
    pub async fn shamir_decrypt_keypair(
        &self,
        near_account_id: &str,
        record: &ServerEncryptedVrfKeypair,
    ) -> Result<(), HostError> {
        let payload = serde_json::json!({
            "nearAccountId": near_account_id,
            "kek_s_b64u": record.kek_s_b64u,
            "ciphertextVrfB64u": record.ciphertext_vrf_b64u,
            "keyId": record.server_key_id.clone().unwrap_or_default(),
        });
        self.bridge
            .request("SHAMIR3PASS_CLIENT_DECRYPT_VRF_KEYPAIR", Some(payload))
            .await
            .map(|_| ())
            .map_err(HostError::host)
    }

    pub async fn shamir_encrypt_current_keypair(
        &self,
    ) -> Result<ServerEncryptedVrfKeypair, HostError> {
        let data = self
            .bridge
            .request(
                "SHAMIR3PASS_CLIENT_ENCRYPT_CURRENT_VRF_KEYPAIR",
                Some(serde_json::json!({})),
            )
            .await
            .map_err(HostError::host)?;
        serde_json::from_value(data)
            .map_err(|e| HostError::host(format!("Invalid server-encrypted keypair: {}", e)))
    }

    pub async fn derive_keypair_from_prf(
        &self,
        near_account_id: &str,
        prf_output_b64u: &str,
        input: Option<VrfChallengeInput>,
        save_in_memory: bool,
    ) -> Result<Value, HostError> {
        let payload = serde_json::json!({
            "nearAccountId": near_account_id,
            "prfOutput": prf_output_b64u,
            "vrfInputParams": input,
            "saveInMemory": save_in_memory,
        });
        self.bridge
            .request("DERIVE_VRF_KEYPAIR_FROM_PRF", Some(payload))
            .await
            .map_err(HostError::host)
    }

    pub async fn configure_shamir_server_urls(
        &self,
        relay_server_url: &str,
        apply_lock_route: &str,
        remove_lock_route: &str,
    ) -> Result<(), HostError> {
        let payload = serde_json::json!({
            "relayServerUrl": relay_server_url,
            "applyLockRoute": apply_lock_route,
            "removeLockRoute": remove_lock_route,
        });
        self.bridge
            .request("SHAMIR3PASS_CONFIG_SERVER_URLS", Some(payload))
            .await
            .map(|_| ())
            .map_err(HostError::host)
    }

    pub async fn status(&self) -> Result<VrfStatus, HostError> {
        let data = self
            .bridge
            .request("CHECK_VRF_STATUS", None)
            .await
            .map_err(HostError::host)?;
        serde_json::from_value(data)
            .map_err(|e| HostError::host(format!("Invalid VRF status shape: {}", e)))
    }

    pub async fn logout(&self) -> Result<(), HostError> {
        self.bridge
            .request("LOGOUT", None)
            .await
            .map(|_| ())
            .map_err(HostError::host)
    }
}

/// Typed facade over the signer worker message set.
pub struct SignerWorkerManager {
    bridge: std::rc::Rc<dyn SignerWorkerBridge>,
}

impl SignerWorkerManager {
    pub fn new(bridge: std::rc::Rc<dyn SignerWorkerBridge>) -> Self {
        Self { bridge }
    }

    pub async fn request<Req: serde::Serialize, Res: serde::de::DeserializeOwned>(
        &self,
        request_type: SignerRequestType,
        request: &Req,
    ) -> Result<Res, String> {
        let payload = serde_json::to_value(request)
            .map_err(|e| format!("Failed to serialize signer request: {}", e))?;
        let result = self.bridge.request(request_type, payload).await?;
        serde_json::from_value(result)
            .map_err(|e| format!("Invalid signer worker response shape: {}", e))
    }

    pub async fn health_check(&self) -> Result<bool, String> {
        let result = self
            .bridge
            .request(SignerRequestType::HealthCheck, Value::Null)
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}
