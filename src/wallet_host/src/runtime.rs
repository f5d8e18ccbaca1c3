//! Browser boot sequence for the wallet iframe: post the best-effort
//! SERVICE_HOST_BOOTED hint, adopt the CONNECT port, build the per-origin
//! singletons, and pump inbound envelopes into the dispatcher.

use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{MessageEvent, MessagePort};

use crate::dispatcher::WalletHost;
use crate::protocol::{ChildEnvelope, ParentEnvelope, ReplySink};
use crate::rpc::FetchTransport;
use crate::stores::LocalStorageBackend;
use crate::webauthn::BrowserWebAuthnProvider;
use crate::workers::{
    SignerWorkerManager, VrfWorkerManager, WebWorkerSignerBridge, WebWorkerVrfBridge,
};

/// Relative worker module URLs inside the wallet origin bundle.
const SIGNER_WORKER_URL: &str = "./workers/signer_worker.js";
const VRF_WORKER_URL: &str = "./workers/vrf_worker.js";

type BrowserHost = WalletHost<LocalStorageBackend, FetchTransport>;

thread_local! {
    static HOST: RefCell<Option<Rc<BrowserHost>>> = RefCell::new(None);
    static PORT: RefCell<Option<MessagePort>> = RefCell::new(None);
    static LISTENERS: RefCell<Vec<Closure<dyn FnMut(MessageEvent)>>> = RefCell::new(Vec::new());
}

struct PortSink {
    port: MessagePort,
}

impl ReplySink for PortSink {
    fn send(&self, envelope: ChildEnvelope) {
        match serde_wasm_bindgen::to_value(&envelope) {
            Ok(value) => {
                if let Err(e) = self.port.post_message(&value) {
                    warn!("postMessage to parent failed: {:?}", e);
                }
            }
            Err(e) => warn!("Failed to serialize envelope: {}", e),
        }
    }
}

#[wasm_bindgen(start)]
pub fn boot() {
    console_error_panic_hook_init();
    wasm_logger::init(wasm_logger::Config::new(crate::config::CURRENT_LOG_LEVEL));
    debug!("Wallet host booting");

    post_booted_hint();
    install_connect_listener();
}

fn console_error_panic_hook_init() {
    // wasm-logger handles log routing; panics still deserve readable traces.
    std::panic::set_hook(Box::new(|info| {
        web_sys::console::error_1(&JsValue::from_str(&info.to_string()));
    }));
}

/// Best-effort boot hint so a cross-origin parent can start CONNECT retries
/// early. Failure is fine; the parent retries CONNECT regardless.
fn post_booted_hint() {
    let Some(window) = web_sys::window() else { return };
    if let Ok(Some(parent)) = window.parent() {
        let hint = js_sys::Object::new();
        let _ = js_sys::Reflect::set(
            &hint,
            &JsValue::from_str("type"),
            &JsValue::from_str("SERVICE_HOST_BOOTED"),
        );
        let _ = parent.post_message(&hint, "*");
    }
}

fn install_connect_listener() {
    let Some(window) = web_sys::window() else {
        warn!("No window; cannot listen for CONNECT");
        return;
    };

    let closure = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        let data = event.data();
        let msg_type = js_sys::Reflect::get(&data, &JsValue::from_str("type"))
            .ok()
            .and_then(|v| v.as_string());
        if msg_type.as_deref() != Some("CONNECT") {
            return;
        }

        let ports = event.ports();
        let Some(port) = ports.get(0).dyn_into::<MessagePort>().ok() else {
            warn!("CONNECT without a transferred MessagePort");
            return;
        };

        adopt_port(port);
    });

    if window
        .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
        .is_err()
    {
        warn!("Failed to install CONNECT listener");
    }
    LISTENERS.with(|l| l.borrow_mut().push(closure));
}

/// Adopt the transferred port: build the host singletons (once), wire the
/// message pump, and acknowledge with READY. Repeat CONNECTs re-adopt the
/// newest port, which is what the parent's handshake retry expects.
fn adopt_port(port: MessagePort) {
    let host = HOST.with(|h| {
        let mut slot = h.borrow_mut();
        if slot.is_none() {
            match build_host() {
                Ok(host) => *slot = Some(Rc::new(host)),
                Err(e) => {
                    warn!("Wallet host construction failed: {}", e);
                    return None;
                }
            }
        }
        slot.clone()
    });
    let Some(host) = host else { return };

    let pump_port = port.clone();
    let pump_host = host.clone();
    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        let envelope: Result<ParentEnvelope, _> = serde_wasm_bindgen::from_value(event.data());
        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Unparseable envelope (dropped): {}", e);
                return;
            }
        };

        let host = pump_host.clone();
        let sink = PortSink {
            port: pump_port.clone(),
        };
        spawn_local(async move {
            host.dispatch(envelope, &sink).await;
        });
    });
    port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    port.start();
    LISTENERS.with(|l| l.borrow_mut().push(onmessage));

    let sink = PortSink { port: port.clone() };
    sink.send(host.ready_envelope());

    PORT.with(|p| *p.borrow_mut() = Some(port));
    debug!("Parent port adopted; READY sent");
}

fn build_host() -> Result<BrowserHost, String> {
    let backend = Rc::new(LocalStorageBackend::new()?);

    let signer_bridge = Rc::new(WebWorkerSignerBridge::new(SIGNER_WORKER_URL)?);
    let vrf_bridge = Rc::new(WebWorkerVrfBridge::new(VRF_WORKER_URL)?);

    let host_name = web_sys::window()
        .and_then(|w| w.location().hostname().ok())
        .unwrap_or_default();

    Ok(WalletHost::new(
        &host_name,
        backend,
        VrfWorkerManager::new(vrf_bridge),
        SignerWorkerManager::new(signer_bridge),
        Rc::new(BrowserWebAuthnProvider),
        Box::new(|| FetchTransport),
    ))
}
