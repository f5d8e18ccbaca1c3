//! Top-level request dispatcher. Owns the per-origin singletons, parses
//! inbound envelopes into typed requests, and guarantees the envelope
//! contract: progress during, exactly one terminal reply per request id,
//! unknown tags rejected with HOST_ERROR.

use log::{debug, warn};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::cancel::CancelRegistry;
use crate::config::{WalletServiceConfig, PROTOCOL_VERSION};
use crate::confirm::ConfirmationUiController;
use crate::error::{ErrorCode, HostError};
use crate::nonce_manager::NonceManager;
use crate::protocol::{
    phases, ChildEnvelope, ParentEnvelope, ProgressPayload, ReplySink, RequestTag,
};
use crate::requests::*;
use crate::rpc::{NearRpcClient, RpcTransport};
use crate::stores::{
    AuthenticatorStore, EncryptedKeyStore, StorageBackend, UserPreferencesStore, VrfKeypairStore,
};
use crate::webauthn::WebAuthnProvider;
use crate::workers::{SignerWorkerManager, VrfWorkerManager};

/// Current signing identity, set by login/registration and cleared on
/// logout or config change.
#[derive(Debug, Clone)]
pub struct LoginState {
    pub near_account_id: String,
    pub public_key: String,
    pub device_index: u32,
}

pub struct WalletHost<B: StorageBackend, T: RpcTransport> {
    /// Host name of the wallet origin, input to rpId computation.
    pub(crate) host_name: String,
    pub(crate) config: RefCell<Option<WalletServiceConfig>>,

    pub(crate) keys: EncryptedKeyStore<B>,
    pub(crate) authenticators: AuthenticatorStore<B>,
    pub(crate) vrf_keys: VrfKeypairStore<B>,
    pub(crate) prefs: UserPreferencesStore<B>,

    pub(crate) rpc: RefCell<Option<Rc<NearRpcClient<T>>>>,
    pub(crate) nonce_manager: RefCell<Option<Rc<NonceManager<T>>>>,

    pub(crate) vrf: VrfWorkerManager,
    pub(crate) signer: SignerWorkerManager,
    pub(crate) confirm: Rc<ConfirmationUiController>,
    pub(crate) cancel: CancelRegistry,
    pub(crate) webauthn: Rc<dyn WebAuthnProvider>,

    transport_factory: Box<dyn Fn() -> T>,

    pub(crate) login: RefCell<Option<LoginState>>,
    pub(crate) device2_stop: RefCell<Option<Rc<Cell<bool>>>>,
}

impl<B: StorageBackend + 'static, T: RpcTransport + 'static> WalletHost<B, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_name: &str,
        backend: Rc<B>,
        vrf: VrfWorkerManager,
        signer: SignerWorkerManager,
        webauthn: Rc<dyn WebAuthnProvider>,
        transport_factory: Box<dyn Fn() -> T>,
    ) -> Self {
        Self {
            host_name: host_name.to_string(),
            config: RefCell::new(None),
            keys: EncryptedKeyStore::new(backend.clone()),
            authenticators: AuthenticatorStore::new(backend.clone()),
            vrf_keys: VrfKeypairStore::new(backend.clone()),
            prefs: UserPreferencesStore::new(backend),
            rpc: RefCell::new(None),
            nonce_manager: RefCell::new(None),
            vrf,
            signer,
            confirm: Rc::new(ConfirmationUiController::default()),
            cancel: CancelRegistry::default(),
            webauthn,
            transport_factory,
            login: RefCell::new(None),
            device2_stop: RefCell::new(None),
        }
    }

    /// READY reply for the CONNECT handshake.
    pub fn ready_envelope(&self) -> ChildEnvelope {
        ChildEnvelope::ready(PROTOCOL_VERSION)
    }

    /// Handle one inbound envelope. Every non-control request produces
    /// exactly one terminal reply on `sink`.
    pub async fn dispatch(&self, envelope: ParentEnvelope, sink: &dyn ReplySink) {
        let Some(tag) = RequestTag::parse(&envelope.tag) else {
            match &envelope.request_id {
                Some(id) => sink.send(ChildEnvelope::error(
                    id,
                    &HostError::host(format!("Unknown message type: {}", envelope.tag)),
                )),
                None => warn!("Unknown message type without requestId: {}", envelope.tag),
            }
            return;
        };

        match tag {
            RequestTag::Ping => {
                sink.send(ChildEnvelope::pong(envelope.request_id));
            }
            RequestTag::Cancel => {
                let reply_id = envelope.request_id.clone();
                let result = self.handle_cancel(envelope.payload);
                if let Some(id) = reply_id {
                    match result {
                        Ok(value) => sink.send(ChildEnvelope::result(&id, wrap_ok(value))),
                        Err(err) => sink.send(ChildEnvelope::error(&id, &err)),
                    }
                }
            }
            _ => {
                let Some(request_id) = envelope.request_id.clone() else {
                    warn!("{} without requestId (dropped)", envelope.tag);
                    return;
                };

                let result = self.route(tag, &request_id, envelope.payload, sink).await;
                match result {
                    RouteOutcome::Reply(Ok(value)) => {
                        sink.send(ChildEnvelope::result(&request_id, wrap_ok(value)));
                    }
                    RouteOutcome::Reply(Err(err)) => {
                        // Failure path: any open confirmation UI is closed
                        // before the caller sees the rejection.
                        self.confirm.close();
                        debug!("{} failed: {}", request_id, err);
                        sink.send(ChildEnvelope::error(&request_id, &err));
                    }
                    RouteOutcome::AlreadyReplied => {}
                }
                self.cancel.clear(&request_id);
            }
        }
    }

    async fn route(
        &self,
        tag: RequestTag,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> RouteOutcome {
        // Configuration gate: everything beyond the control surface needs
        // PM_SET_CONFIG first.
        if !matches!(tag, RequestTag::SetConfig) && self.config.borrow().is_none() {
            return RouteOutcome::Reply(Err(HostError::not_configured()));
        }

        let result = match tag {
            RequestTag::Ping | RequestTag::Cancel => unreachable!("handled in dispatch"),

            RequestTag::SetConfig => self.handle_set_config(payload).await,
            RequestTag::Register => self.handle_register(request_id, payload, sink).await,
            RequestTag::Login => self.handle_login(request_id, payload, sink).await,
            RequestTag::Logout => self.handle_logout().await,
            RequestTag::GetLoginState => self.handle_get_login_state().await,
            RequestTag::SignTxsWithActions => {
                self.handle_sign_transactions(request_id, payload, sink, false).await
            }
            RequestTag::SignAndSendTxs => {
                self.handle_sign_transactions(request_id, payload, sink, true).await
            }
            RequestTag::SendTransaction => {
                self.handle_send_transaction(request_id, payload, sink).await
            }
            RequestTag::ExecuteAction => {
                self.handle_execute_action(request_id, payload, sink).await
            }
            RequestTag::SignNep413 => self.handle_sign_nep413(request_id, payload, sink).await,
            RequestTag::ExportNearKeypair => {
                self.handle_export_keypair(request_id, payload, sink).await
            }
            RequestTag::GetRecentLogins => self.handle_get_recent_logins(),
            RequestTag::PrefetchBlockheight => self.handle_prefetch_blockheight().await,
            RequestTag::SetConfirmBehavior => self.handle_set_confirm_behavior(payload),
            RequestTag::SetConfirmationConfig => self.handle_set_confirmation_config(payload),
            RequestTag::GetConfirmationConfig => self.handle_get_confirmation_config(payload),
            RequestTag::SetTheme => self.handle_set_theme(payload),
            RequestTag::HasPasskey => self.handle_has_passkey(payload),
            RequestTag::ViewAccessKeys => self.handle_view_access_keys(payload).await,
            RequestTag::DeleteDeviceKey => {
                self.handle_delete_device_key(request_id, payload, sink).await
            }
            RequestTag::RecoverAccountFlow => {
                self.handle_recover_account(request_id, payload, sink).await
            }
            RequestTag::LinkDeviceWithScannedQrData => {
                self.handle_link_device_with_qr(request_id, payload, sink).await
            }
            RequestTag::StartDevice2LinkingFlow => {
                // Sends its own terminal, then keeps emitting progress for
                // sticky subscribers.
                return self
                    .handle_start_device2_linking(request_id, payload, sink)
                    .await;
            }
            RequestTag::StopDevice2LinkingFlow => self.handle_stop_device2_linking(),
        };

        RouteOutcome::Reply(result)
    }

    // === CONTROL HANDLERS ===

    fn handle_cancel(&self, payload: Value) -> Result<Value, HostError> {
        let payload: CancelPayload = parse_payload(payload)?;
        self.cancel.mark_cancelled(&payload.request_id);
        // Best-effort: unblock a handler parked on the confirmation UI.
        self.confirm.close();
        debug!("Marked request {} cancelled", payload.request_id);
        Ok(json!({ "cancelled": payload.request_id }))
    }

    async fn handle_set_config(&self, payload: Value) -> Result<Value, HostError> {
        let config: WalletServiceConfig = parse_payload(payload)?;

        let client = Rc::new(
            NearRpcClient::new(&config.near_rpc_url, (self.transport_factory)())
                .map_err(HostError::invalid_request)?,
        );
        *self.rpc.borrow_mut() = Some(client.clone());
        *self.nonce_manager.borrow_mut() = Some(Rc::new(NonceManager::new(client)));

        // Config changes invalidate the session-scoped state.
        *self.login.borrow_mut() = None;
        let _ = self.vrf.logout().await;

        if let (Some(relay), Some(apply), Some(remove)) = (
            config.relay_server_url.as_deref(),
            config.shamir_apply_lock_route.as_deref(),
            config.shamir_remove_lock_route.as_deref(),
        ) {
            if let Err(e) = self
                .vrf
                .configure_shamir_server_urls(relay, apply, remove)
                .await
            {
                warn!("Shamir relay configuration failed: {}", e);
            }
        }

        *self.config.borrow_mut() = Some(config);
        Ok(json!({ "configured": true }))
    }

    async fn handle_logout(&self) -> Result<Value, HostError> {
        let _ = self.vrf.logout().await;
        if let Some(nonce_manager) = self.nonce_manager.borrow().as_ref() {
            nonce_manager.clear();
        }
        self.cancel.clear_all();
        *self.login.borrow_mut() = None;
        *self.device2_stop.borrow_mut() = None;
        Ok(json!({ "success": true }))
    }

    async fn handle_get_login_state(&self) -> Result<Value, HostError> {
        let vrf_status = self.vrf.status().await.unwrap_or(wasm_vrf_worker::VrfStatus {
            active: false,
            near_account_id: None,
            session_duration_ms: None,
        });

        let login = self.login.borrow().clone();
        Ok(json!({
            "loggedIn": login.is_some(),
            "nearAccountId": login.as_ref().map(|l| l.near_account_id.clone()),
            "publicKey": login.as_ref().map(|l| l.public_key.clone()),
            "vrfActive": vrf_status.active,
            "vrfAccountId": vrf_status.near_account_id,
            "sessionDurationMs": vrf_status.session_duration_ms,
        }))
    }

    // === SMALL HANDLERS ===

    fn handle_get_recent_logins(&self) -> Result<Value, HostError> {
        Ok(json!({
            "recentLogins": self.prefs.recent_logins(),
            "lastUser": self.prefs.last_user(),
        }))
    }

    async fn handle_prefetch_blockheight(&self) -> Result<Value, HostError> {
        let nonce_manager = self.nonce_manager.borrow().as_ref().cloned();
        if let Some(nonce_manager) = nonce_manager {
            if nonce_manager.is_initialized() {
                nonce_manager.prefetch_blockheight().await;
                return Ok(json!({ "prefetched": true }));
            }
        }
        // No signing identity yet; warm only the block cache path.
        if let Ok(rpc) = self.rpc_client() {
            if let Err(e) = rpc.block_final().await {
                debug!("Block prefetch failed (ignored): {}", e);
            }
        }
        Ok(json!({ "prefetched": true }))
    }

    fn handle_set_confirm_behavior(&self, payload: Value) -> Result<Value, HostError> {
        let payload: SetConfirmBehaviorPayload = parse_payload(payload)?;
        self.prefs
            .set_confirm_behavior(&payload.near_account_id, payload.behavior)
            .map_err(HostError::host)?;
        Ok(json!({ "saved": true }))
    }

    fn handle_set_confirmation_config(&self, payload: Value) -> Result<Value, HostError> {
        let payload: SetConfirmationConfigPayload = parse_payload(payload)?;
        self.prefs
            .set_confirmation_config(&payload.near_account_id, payload.config)
            .map_err(HostError::host)?;
        Ok(json!({ "saved": true }))
    }

    fn handle_get_confirmation_config(&self, payload: Value) -> Result<Value, HostError> {
        let payload: AccountScopedPayload = parse_payload(payload)?;
        let prefs = self.prefs.get(&payload.near_account_id);
        serde_json::to_value(prefs.confirmation_config)
            .map_err(|e| HostError::host(e.to_string()))
    }

    fn handle_set_theme(&self, payload: Value) -> Result<Value, HostError> {
        let payload: SetThemePayload = parse_payload(payload)?;
        let account_id = payload
            .near_account_id
            .or_else(|| self.login.borrow().as_ref().map(|l| l.near_account_id.clone()))
            .or_else(|| self.prefs.last_user())
            .ok_or_else(|| HostError::invalid_request("No account to set a theme for"))?;
        self.prefs
            .set_theme(&account_id, &payload.theme)
            .map_err(HostError::host)?;
        Ok(json!({ "saved": true }))
    }

    fn handle_has_passkey(&self, payload: Value) -> Result<Value, HostError> {
        let payload: AccountScopedPayload = parse_payload(payload)?;
        Ok(json!({
            "hasPasskey": self.keys.has_key_for_account(&payload.near_account_id),
            "deviceIndices": self.keys.device_indices(&payload.near_account_id),
        }))
    }

    async fn handle_view_access_keys(&self, payload: Value) -> Result<Value, HostError> {
        let payload: AccountScopedPayload = parse_payload(payload)?;
        self.rpc_client()?
            .view_access_key_list(&payload.near_account_id)
            .await
            .map_err(|e| HostError::new(ErrorCode::RpcTransient, e))
    }

    async fn handle_delete_device_key(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: DeleteDeviceKeyPayload = parse_payload(payload)?;

        let record = self
            .keys
            .get(&payload.near_account_id, payload.device_index)
            .ok_or_else(|| {
                HostError::invalid_request(format!(
                    "No key record for {} device {}",
                    payload.near_account_id, payload.device_index
                ))
            })?;

        // Key records are destroyed only by explicit user action.
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(2, phases::USER_CONFIRMATION, "Confirm device key deletion"),
        );
        let config = crate::confirm::merge_confirmation_config(
            None,
            Some(&self.prefs.get(&payload.near_account_id).confirmation_config),
        );
        let summary = crate::confirm::ConfirmationSummary {
            near_account_id: payload.near_account_id.clone(),
            intents: vec![crate::confirm::ConfirmationIntent {
                receiver_id: payload.near_account_id.clone(),
                action_summary: format!("Delete device key #{}", payload.device_index),
                amount: None,
            }],
        };
        if self.confirm.clone().present(&summary, &config).await == crate::confirm::Decision::Cancelled {
            return Err(HostError::cancelled());
        }
        self.cancel.ensure_live(request_id)?;

        self.keys
            .delete(&payload.near_account_id, payload.device_index);
        self.authenticators
            .remove_device(&payload.near_account_id, payload.device_index)
            .map_err(HostError::host)?;

        Ok(json!({
            "deleted": true,
            "publicKey": record.public_key,
            "deviceIndex": payload.device_index,
        }))
    }

    fn handle_stop_device2_linking(&self) -> Result<Value, HostError> {
        if let Some(flag) = self.device2_stop.borrow_mut().take() {
            flag.set(true);
            Ok(json!({ "stopped": true }))
        } else {
            Ok(json!({ "stopped": false }))
        }
    }

    // === SHARED HELPERS ===

    pub(crate) fn emit(&self, sink: &dyn ReplySink, request_id: &str, payload: ProgressPayload) {
        sink.send(ChildEnvelope::progress(request_id, &payload));
    }

    pub(crate) fn rpc_client(&self) -> Result<Rc<NearRpcClient<T>>, HostError> {
        self.rpc
            .borrow()
            .as_ref()
            .cloned()
            .ok_or_else(HostError::not_configured)
    }

    pub(crate) fn nonce_manager(&self) -> Result<Rc<NonceManager<T>>, HostError> {
        self.nonce_manager
            .borrow()
            .as_ref()
            .cloned()
            .ok_or_else(HostError::not_configured)
    }

    pub(crate) fn service_config(&self) -> Result<WalletServiceConfig, HostError> {
        self.config
            .borrow()
            .clone()
            .ok_or_else(HostError::not_configured)
    }
}

pub(crate) enum RouteOutcome {
    Reply(Result<Value, HostError>),
    AlreadyReplied,
}

pub(crate) fn parse_payload<P: serde::de::DeserializeOwned>(
    payload: Value,
) -> Result<P, HostError> {
    serde_json::from_value(payload)
        .map_err(|e| HostError::invalid_request(format!("Malformed payload: {}", e)))
}

/// Terminal results travel as `{ok: true, result: ...}`.
pub(crate) fn wrap_ok(value: Value) -> Value {
    json!({ "ok": true, "result": value })
}
