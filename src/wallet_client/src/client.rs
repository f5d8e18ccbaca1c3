//! Thin typed facade the relying page holds. Every method is a correlated
//! `Router::post` with the matching PM_* tag; no secret-bearing state ever
//! lives on this side of the boundary.

use serde_json::{json, Value};
use std::rc::Rc;

use crate::error::WalletSdkError;
use crate::router::{PostOptions, ProgressCallback, Router};

pub struct PasskeyWalletClient {
    router: Rc<Router>,
}

impl PasskeyWalletClient {
    pub fn new(router: Rc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Rc<Router> {
        &self.router
    }

    fn options(on_progress: Option<ProgressCallback>) -> PostOptions {
        PostOptions {
            on_progress,
            sticky: false,
            timeout_ms: None,
        }
    }

    fn sticky_options(on_progress: Option<ProgressCallback>) -> PostOptions {
        PostOptions {
            on_progress,
            sticky: true,
            timeout_ms: None,
        }
    }

    pub async fn ping(&self) -> Result<Value, WalletSdkError> {
        self.router.post("PING", json!({}), Self::options(None)).await
    }

    pub async fn set_config(&self, config: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SET_CONFIG", config, Self::options(None))
            .await
    }

    pub async fn register(
        &self,
        near_account_id: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_REGISTER",
                json!({ "nearAccountId": near_account_id }),
                Self::options(on_progress),
            )
            .await
    }

    pub async fn login(
        &self,
        near_account_id: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_LOGIN",
                json!({ "nearAccountId": near_account_id }),
                Self::options(on_progress),
            )
            .await
    }

    pub async fn logout(&self) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_LOGOUT", json!({}), Self::options(None))
            .await
    }

    pub async fn get_login_state(&self) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_GET_LOGIN_STATE", json!({}), Self::options(None))
            .await
    }

    pub async fn sign_transactions_with_actions(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SIGN_TXS_WITH_ACTIONS", payload, Self::options(on_progress))
            .await
    }

    pub async fn sign_and_send_transactions(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SIGN_AND_SEND_TXS", payload, Self::options(on_progress))
            .await
    }

    pub async fn execute_action(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_EXECUTE_ACTION", payload, Self::options(on_progress))
            .await
    }

    pub async fn send_transaction(&self, payload: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SEND_TRANSACTION", payload, Self::options(None))
            .await
    }

    pub async fn sign_nep413_message(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SIGN_NEP413", payload, Self::options(on_progress))
            .await
    }

    pub async fn export_near_keypair(
        &self,
        near_account_id: &str,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_EXPORT_NEAR_KEYPAIR",
                json!({ "nearAccountId": near_account_id }),
                Self::options(None),
            )
            .await
    }

    pub async fn get_recent_logins(&self) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_GET_RECENT_LOGINS", json!({}), Self::options(None))
            .await
    }

    pub async fn prefetch_blockheight(&self) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_PREFETCH_BLOCKHEIGHT", json!({}), Self::options(None))
            .await
    }

    pub async fn set_confirm_behavior(&self, payload: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SET_CONFIRM_BEHAVIOR", payload, Self::options(None))
            .await
    }

    pub async fn set_confirmation_config(&self, payload: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SET_CONFIRMATION_CONFIG", payload, Self::options(None))
            .await
    }

    pub async fn get_confirmation_config(
        &self,
        near_account_id: &str,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_GET_CONFIRMATION_CONFIG",
                json!({ "nearAccountId": near_account_id }),
                Self::options(None),
            )
            .await
    }

    pub async fn set_theme(&self, payload: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_SET_THEME", payload, Self::options(None))
            .await
    }

    pub async fn has_passkey(&self, near_account_id: &str) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_HAS_PASSKEY",
                json!({ "nearAccountId": near_account_id }),
                Self::options(None),
            )
            .await
    }

    pub async fn view_access_keys(&self, near_account_id: &str) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_VIEW_ACCESS_KEYS",
                json!({ "nearAccountId": near_account_id }),
                Self::options(None),
            )
            .await
    }

    pub async fn delete_device_key(&self, payload: Value) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_DELETE_DEVICE_KEY", payload, Self::options(None))
            .await
    }

    /// Sticky: recovery keeps emitting progress after the terminal reply.
    pub async fn recover_account_flow(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_RECOVER_ACCOUNT_FLOW",
                payload,
                Self::sticky_options(on_progress),
            )
            .await
    }

    pub async fn link_device_with_scanned_qr_data(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_LINK_DEVICE_WITH_SCANNED_QR_DATA",
                payload,
                Self::options(on_progress),
            )
            .await
    }

    /// Sticky: the Device-2 flow polls the chain after its terminal reply.
    pub async fn start_device2_linking_flow(
        &self,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, WalletSdkError> {
        self.router
            .post(
                "PM_START_DEVICE2_LINKING_FLOW",
                payload,
                Self::sticky_options(on_progress),
            )
            .await
    }

    pub async fn stop_device2_linking_flow(&self) -> Result<Value, WalletSdkError> {
        self.router
            .post("PM_STOP_DEVICE2_LINKING_FLOW", json!({}), Self::options(None))
            .await
    }

    pub fn cancel_request(&self, request_id: &str) {
        self.router.cancel_request(request_id);
    }

    pub fn cancel_all(&self) {
        self.router.cancel_all();
    }
}
