mod client;
mod error;
mod overlay;
mod router;
mod transport;
mod utils;

pub use client::PasskeyWalletClient;
pub use error::{WalletSdkError, READY_TIMEOUT, REQUEST_TIMEOUT, TRANSPORT_ERROR};
pub use overlay::{overlay_action_for_phase, OverlayAction};
pub use router::{
    OverlayHandle, PostOptions, ProgressCallback, Router, RouterPort, DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use transport::{
    boot_hint_budget_ms, connect_backoff_delay_ms, iframe_allow_attribute, WalletIframeConfig,
    CONNECT_TOTAL_BUDGET_MS, IFRAME_HIDDEN_STYLE, IFRAME_OVERLAY_STYLE, SRCDOC_SANDBOX,
};

#[cfg(target_arch = "wasm32")]
pub use transport::WalletIframeTransport;

#[cfg(target_arch = "wasm32")]
mod bootstrap {
    use super::*;
    use log::debug;
    use std::rc::Rc;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;

    #[wasm_bindgen(start)]
    pub fn init() {
        wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
        debug!("Wallet client initialized");
    }

    /// Mount the wallet iframe, run the CONNECT→READY handshake, and wire
    /// the router's timeout sweep. The returned client is the page's whole
    /// wallet surface.
    pub async fn connect_wallet(
        config: WalletIframeConfig,
    ) -> Result<PasskeyWalletClient, WalletSdkError> {
        let transport = WalletIframeTransport::new(config);
        let router = Rc::new(Router::new(transport.clone(), transport.clone()));

        let router_for_pump = router.clone();
        transport.set_on_message(Box::new(move |envelope| {
            router_for_pump.on_port_message(envelope);
        }));

        transport.connect().await?;

        // Periodic timeout sweep; progress refreshes per-request deadlines.
        let router_for_tick = router.clone();
        let tick = wasm_bindgen::closure::Closure::<dyn FnMut()>::new(move || {
            router_for_tick.expire_overdue(crate::utils::now_ms());
        });
        if let Some(window) = web_sys::window() {
            let _ = window.set_interval_with_callback_and_timeout_and_arguments_0(
                tick.as_ref().unchecked_ref(),
                1_000,
            );
        }
        tick.forget();

        Ok(PasskeyWalletClient::new(router))
    }
}

#[cfg(target_arch = "wasm32")]
pub use bootstrap::connect_wallet;
