//! Wallet-iframe transport: mounts one hidden iframe from the wallet
//! origin, completes the CONNECT→READY handshake over a fresh
//! `MessageChannel` per attempt, and hands the adopted port to the router.
//! The handshake schedule and the iframe attribute policy are pure and
//! natively tested; the DOM work is browser-only.

use serde::{Deserialize, Serialize};

/// Total handshake budget before `READY_TIMEOUT`.
pub const CONNECT_TOTAL_BUDGET_MS: u64 = 8_000;

/// CONNECT retry backoff: 200 → 400 → 800 ms, then capped.
pub fn connect_backoff_delay_ms(attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(2);
    200u64 << shift
}

/// Cross-origin boots may wait for a best-effort SERVICE_HOST_BOOTED hint,
/// up to a quarter of the connect budget.
pub fn boot_hint_budget_ms(total_budget_ms: u64) -> u64 {
    total_budget_ms / 4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletIframeConfig {
    /// Wallet origin, e.g. `https://wallet.example.com`. `None` selects the
    /// same-origin `srcdoc` variant.
    pub wallet_origin: Option<String>,
    /// Path of the wallet service document under the wallet origin.
    #[serde(default = "default_service_path")]
    pub service_path: String,
    /// Inline document for the srcdoc variant.
    #[serde(default)]
    pub srcdoc_html: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_service_path() -> String {
    "/wallet-service".to_string()
}

fn default_connect_timeout() -> u64 {
    CONNECT_TOTAL_BUDGET_MS
}

/// `allow` attribute delegating WebAuthn to the wallet origin (or `'self'`
/// for the srcdoc variant).
pub fn iframe_allow_attribute(wallet_origin: Option<&str>) -> String {
    match wallet_origin {
        Some(origin) => format!(
            "publickey-credentials-get {origin}; publickey-credentials-create {origin}"
        ),
        None => "publickey-credentials-get 'self'; publickey-credentials-create 'self'".to_string(),
    }
}

/// Sandbox attribute for the srcdoc variant only.
pub const SRCDOC_SANDBOX: &str = "allow-scripts allow-same-origin";

/// Hidden style: invisible, non-interactive, out of the a11y tree.
pub const IFRAME_HIDDEN_STYLE: &str =
    "position:fixed;width:0;height:0;border:0;opacity:0;pointer-events:none;";

/// Activation style: cover the viewport so the iframe can capture the user
/// gesture WebAuthn requires; z-index sits just below the confirmation
/// modal's own.
pub const IFRAME_OVERLAY_STYLE: &str =
    "position:fixed;inset:0;width:100vw;height:100vh;border:0;opacity:1;pointer-events:auto;z-index:2147483645;";

// === BROWSER TRANSPORT ===

#[cfg(target_arch = "wasm32")]
pub use browser::WalletIframeTransport;

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::*;
    use crate::error::{WalletSdkError, READY_TIMEOUT};
    use crate::router::{OverlayHandle, RouterPort};
    use crate::utils::{now_ms, sleep_ms};
    use futures::future::{LocalBoxFuture, Shared};
    use futures::FutureExt;
    use log::{debug, warn};
    use serde_json::Value;
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{HtmlIFrameElement, MessageChannel, MessageEvent, MessagePort};

    type ConnectFuture = Shared<LocalBoxFuture<'static, Result<(), String>>>;

    enum ConnectState {
        Idle,
        Connecting(ConnectFuture),
        Connected,
    }

    /// One hidden iframe plus its adopted port. Clones share state.
    pub struct WalletIframeTransport {
        config: WalletIframeConfig,
        iframe: RefCell<Option<HtmlIFrameElement>>,
        port: Rc<RefCell<Option<MessagePort>>>,
        state: Rc<RefCell<ConnectState>>,
        on_message: Rc<RefCell<Option<Box<dyn Fn(&Value)>>>>,
        listeners: RefCell<Vec<Closure<dyn FnMut(MessageEvent)>>>,
    }

    impl WalletIframeTransport {
        pub fn new(config: WalletIframeConfig) -> Rc<Self> {
            Rc::new(Self {
                config,
                iframe: RefCell::new(None),
                port: Rc::new(RefCell::new(None)),
                state: Rc::new(RefCell::new(ConnectState::Idle)),
                on_message: Rc::new(RefCell::new(None)),
                listeners: RefCell::new(Vec::new()),
            })
        }

        /// Install the router's inbound handler before connecting.
        pub fn set_on_message(&self, handler: Box<dyn Fn(&Value)>) {
            *self.on_message.borrow_mut() = Some(handler);
        }

        /// Idempotent connect; concurrent callers share one in-flight
        /// handshake attempt.
        pub async fn connect(self: &Rc<Self>) -> Result<(), WalletSdkError> {
            let existing = {
                let mut state = self.state.borrow_mut();
                match &*state {
                    ConnectState::Connected => return Ok(()),
                    ConnectState::Connecting(future) => Some(future.clone()),
                    ConnectState::Idle => {
                        let this = self.clone();
                        let future = async move { this.connect_inner().await }
                            .boxed_local()
                            .shared();
                        *state = ConnectState::Connecting(future.clone());
                        Some(future)
                    }
                }
            };

            let result = existing.expect("connect future").await;
            let mut state = self.state.borrow_mut();
            match result {
                Ok(()) => {
                    *state = ConnectState::Connected;
                    Ok(())
                }
                Err(e) => {
                    *state = ConnectState::Idle;
                    Err(WalletSdkError::new(READY_TIMEOUT, e))
                }
            }
        }

        async fn connect_inner(self: Rc<Self>) -> Result<(), String> {
            let document = web_sys::window()
                .and_then(|w| w.document())
                .ok_or("No document available")?;

            let iframe: HtmlIFrameElement = document
                .create_element("iframe")
                .map_err(|e| format!("Failed to create iframe: {:?}", e))?
                .dyn_into()
                .map_err(|_| "Element is not an iframe".to_string())?;

            iframe
                .set_attribute("style", IFRAME_HIDDEN_STYLE)
                .map_err(|e| format!("Failed to style iframe: {:?}", e))?;
            iframe
                .set_attribute("aria-hidden", "true")
                .and_then(|_| iframe.set_attribute("tabindex", "-1"))
                .and_then(|_| {
                    iframe.set_attribute(
                        "allow",
                        &iframe_allow_attribute(self.config.wallet_origin.as_deref()),
                    )
                })
                .map_err(|e| format!("Failed to set iframe attributes: {:?}", e))?;

            match (&self.config.wallet_origin, &self.config.srcdoc_html) {
                (Some(origin), _) => {
                    let url = format!(
                        "{}{}",
                        origin.trim_end_matches('/'),
                        self.config.service_path
                    );
                    iframe.set_src(&url);
                }
                (None, Some(html)) => {
                    iframe
                        .set_attribute("sandbox", SRCDOC_SANDBOX)
                        .map_err(|e| format!("Failed to set sandbox: {:?}", e))?;
                    iframe.set_srcdoc(html);
                }
                (None, None) => return Err("No wallet origin or srcdoc configured".to_string()),
            }

            let body = document.body().ok_or("No document body")?;
            body.append_child(&iframe)
                .map_err(|e| format!("Failed to mount iframe: {:?}", e))?;

            let budget_ms = self.config.connect_timeout_ms;
            let deadline = now_ms() + budget_ms as f64;

            self.wait_for_load(&iframe).await?;

            // Cross-origin: give the host a moment to post its boot hint.
            if self.config.wallet_origin.is_some() {
                self.wait_for_boot_hint(boot_hint_budget_ms(budget_ms), deadline)
                    .await;
            }

            *self.iframe.borrow_mut() = Some(iframe.clone());

            // CONNECT retry loop: fresh channel each attempt until READY.
            let mut attempt: u32 = 0;
            loop {
                if now_ms() >= deadline {
                    return Err(format!(
                        "Wallet host never sent READY within {} ms ({} attempts)",
                        budget_ms, attempt
                    ));
                }
                attempt += 1;

                match self.connect_attempt(&iframe, deadline).await {
                    Ok(port) => {
                        self.adopt(port);
                        debug!("READY after {} attempt(s)", attempt);
                        return Ok(());
                    }
                    Err(e) => {
                        debug!("CONNECT attempt {} failed: {}", attempt, e);
                        sleep_ms(connect_backoff_delay_ms(attempt)).await;
                    }
                }
            }
        }

        async fn connect_attempt(
            &self,
            iframe: &HtmlIFrameElement,
            deadline: f64,
        ) -> Result<MessagePort, String> {
            let channel =
                MessageChannel::new().map_err(|e| format!("MessageChannel failed: {:?}", e))?;
            let port1 = channel.port1();
            let port2 = channel.port2();

            let (sender, receiver) = futures::channel::oneshot::channel::<()>();
            let sender = Rc::new(RefCell::new(Some(sender)));
            let ready_listener = {
                let sender = sender.clone();
                Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                    let is_ready = js_sys::Reflect::get(&event.data(), &JsValue::from_str("type"))
                        .ok()
                        .and_then(|v| v.as_string())
                        .map(|t| t == "READY")
                        .unwrap_or(false);
                    if is_ready {
                        if let Some(sender) = sender.borrow_mut().take() {
                            let _ = sender.send(());
                        }
                    }
                })
            };
            port1.set_onmessage(Some(ready_listener.as_ref().unchecked_ref()));
            port1.start();

            let target_window = iframe
                .content_window()
                .ok_or("iframe has no content window")?;
            let connect_msg = js_sys::Object::new();
            js_sys::Reflect::set(
                &connect_msg,
                &JsValue::from_str("type"),
                &JsValue::from_str("CONNECT"),
            )
            .map_err(|_| "Failed to build CONNECT".to_string())?;

            let transfer = js_sys::Array::of1(&port2);
            let target_origin = self
                .config
                .wallet_origin
                .clone()
                .unwrap_or_else(|| "*".to_string());
            target_window
                .post_message_with_transfer(&connect_msg, &target_origin, &transfer)
                .map_err(|e| format!("CONNECT postMessage failed: {:?}", e))?;

            // Wait for READY, bounded by the per-attempt slice.
            let attempt_budget = (deadline - now_ms()).max(0.0).min(1_000.0) as u64;
            let timeout = Box::pin(sleep_ms(attempt_budget));
            let result = futures::future::select(receiver, timeout).await;

            port1.set_onmessage(None);
            self.listeners.borrow_mut().push(ready_listener);

            match result {
                futures::future::Either::Left((Ok(()), _)) => Ok(port1),
                _ => Err("No READY on this attempt".to_string()),
            }
        }

        fn adopt(&self, port: MessagePort) {
            let on_message = self.on_message.clone();
            let pump = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                match serde_wasm_bindgen::from_value::<Value>(event.data()) {
                    Ok(value) => {
                        if let Some(handler) = on_message.borrow().as_ref() {
                            handler(&value);
                        }
                    }
                    Err(e) => warn!("Unparseable envelope from host: {}", e),
                }
            });
            port.set_onmessage(Some(pump.as_ref().unchecked_ref()));
            port.start();
            self.listeners.borrow_mut().push(pump);
            *self.port.borrow_mut() = Some(port);
        }

        async fn wait_for_load(&self, iframe: &HtmlIFrameElement) -> Result<(), String> {
            let (sender, receiver) = futures::channel::oneshot::channel::<()>();
            let sender = Rc::new(RefCell::new(Some(sender)));
            let load_listener = {
                let sender = sender.clone();
                Closure::<dyn FnMut(MessageEvent)>::new(move |_event: MessageEvent| {
                    if let Some(sender) = sender.borrow_mut().take() {
                        let _ = sender.send(());
                    }
                })
            };
            iframe
                .add_event_listener_with_callback("load", load_listener.as_ref().unchecked_ref())
                .map_err(|e| format!("Failed to listen for load: {:?}", e))?;
            self.listeners.borrow_mut().push(load_listener);

            let _ = receiver.await;
            Ok(())
        }

        /// Best-effort: wait briefly for the host's SERVICE_HOST_BOOTED
        /// window message. Timing out is not an error.
        async fn wait_for_boot_hint(&self, hint_budget_ms: u64, deadline: f64) {
            let Some(window) = web_sys::window() else { return };

            let (sender, receiver) = futures::channel::oneshot::channel::<()>();
            let sender = Rc::new(RefCell::new(Some(sender)));
            let hint_listener = {
                let sender = sender.clone();
                Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                    let booted = js_sys::Reflect::get(&event.data(), &JsValue::from_str("type"))
                        .ok()
                        .and_then(|v| v.as_string())
                        .map(|t| t == "SERVICE_HOST_BOOTED")
                        .unwrap_or(false);
                    if booted {
                        if let Some(sender) = sender.borrow_mut().take() {
                            let _ = sender.send(());
                        }
                    }
                })
            };
            let _ = window
                .add_event_listener_with_callback("message", hint_listener.as_ref().unchecked_ref());

            let budget = (hint_budget_ms as f64).min((deadline - now_ms()).max(0.0)) as u64;
            let timeout = Box::pin(sleep_ms(budget));
            let _ = futures::future::select(receiver, timeout).await;

            let _ = window.remove_event_listener_with_callback(
                "message",
                hint_listener.as_ref().unchecked_ref(),
            );
            self.listeners.borrow_mut().push(hint_listener);
        }
    }

    impl RouterPort for WalletIframeTransport {
        fn post(&self, envelope: Value) -> Result<(), String> {
            let port = self.port.borrow();
            let port = port.as_ref().ok_or("Transport is not connected")?;
            let value = serde_wasm_bindgen::to_value(&envelope)
                .map_err(|e| format!("Failed to serialize envelope: {}", e))?;
            port.post_message(&value)
                .map_err(|e| format!("postMessage failed: {:?}", e))
        }
    }

    impl OverlayHandle for WalletIframeTransport {
        fn show_for_activation(&self) {
            if let Some(iframe) = self.iframe.borrow().as_ref() {
                let _ = iframe.set_attribute("style", IFRAME_OVERLAY_STYLE);
            }
        }

        fn hide_for_activation(&self) {
            if let Some(iframe) = self.iframe.borrow().as_ref() {
                let _ = iframe.set_attribute("style", IFRAME_HIDDEN_STYLE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_200_400_800_capped() {
        assert_eq!(connect_backoff_delay_ms(1), 200);
        assert_eq!(connect_backoff_delay_ms(2), 400);
        assert_eq!(connect_backoff_delay_ms(3), 800);
        assert_eq!(connect_backoff_delay_ms(4), 800);
        assert_eq!(connect_backoff_delay_ms(10), 800);
    }

    #[test]
    fn boot_hint_budget_is_quarter_of_total() {
        assert_eq!(boot_hint_budget_ms(8_000), 2_000);
        assert_eq!(boot_hint_budget_ms(CONNECT_TOTAL_BUDGET_MS), 2_000);
    }

    #[test]
    fn allow_attribute_delegates_to_wallet_origin() {
        assert_eq!(
            iframe_allow_attribute(Some("https://wallet.example.com")),
            "publickey-credentials-get https://wallet.example.com; \
             publickey-credentials-create https://wallet.example.com"
        );
        assert!(iframe_allow_attribute(None).contains("'self'"));
    }

    #[test]
    fn hidden_and_overlay_styles_flip_interactivity() {
        assert!(IFRAME_HIDDEN_STYLE.contains("pointer-events:none"));
        assert!(IFRAME_HIDDEN_STYLE.contains("opacity:0"));
        assert!(IFRAME_OVERLAY_STYLE.contains("pointer-events:auto"));
        assert!(IFRAME_OVERLAY_STYLE.contains("inset:0"));
        assert!(IFRAME_OVERLAY_STYLE.contains("100vw"));
    }

    #[test]
    fn config_defaults() {
        let config: WalletIframeConfig = serde_json::from_str(
            r#"{"walletOrigin":"https://wallet.example.com"}"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout_ms, CONNECT_TOTAL_BUDGET_MS);
        assert_eq!(config.service_path, "/wallet-service");
        assert!(config.srcdoc_html.is_none());
    }
}
