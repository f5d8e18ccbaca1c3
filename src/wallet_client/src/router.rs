//! Parent-side request router: correlates method calls with replies over
//! the adopted port, multiplexes progress to caller callbacks, enforces
//! per-request timeouts (refreshed by progress), and owns the activation
//! overlay policy.

use futures::channel::oneshot;
use log::{debug, warn};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{WalletSdkError, REQUEST_TIMEOUT, TRANSPORT_ERROR};
use crate::overlay::{overlay_action_for_phase, OverlayAction};
use crate::utils::now_ms;

/// Default per-request timeout; every PROGRESS for the request resets it,
/// so long flows cannot spuriously time out while still reporting.
pub const DEFAULT_REQUEST_TIMEOUT_MS: f64 = 20_000.0;

/// Outbound edge: posting one envelope on the adopted port.
pub trait RouterPort {
    fn post(&self, envelope: Value) -> Result<(), String>;
}

/// Overlay edge: style mutation only; the policy lives here in the router.
pub trait OverlayHandle {
    fn show_for_activation(&self);
    fn hide_for_activation(&self);
}

/// Progress callback. Receives the raw `PROGRESS.payload`.
pub type ProgressCallback = Rc<dyn Fn(&Value)>;

pub struct PostOptions {
    pub on_progress: Option<ProgressCallback>,
    /// Sticky subscribers survive the terminal reply; flows that keep
    /// emitting afterwards (device-2 linking, recovery) still deliver.
    pub sticky: bool,
    pub timeout_ms: Option<f64>,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            sticky: false,
            timeout_ms: None,
        }
    }
}

struct PendingRequest {
    resolver: oneshot::Sender<Result<Value, WalletSdkError>>,
    deadline_ms: f64,
    timeout_ms: f64,
}

struct ProgressSubscriber {
    on_progress: ProgressCallback,
    sticky: bool,
    delivered: u32,
}

pub struct Router {
    port: Rc<dyn RouterPort>,
    overlay: Rc<dyn OverlayHandle>,
    pending: RefCell<HashMap<String, PendingRequest>>,
    subscribers: RefCell<HashMap<String, ProgressSubscriber>>,
    overlay_visible: Cell<bool>,
    counter: Cell<u64>,
}

impl Router {
    pub fn new(port: Rc<dyn RouterPort>, overlay: Rc<dyn OverlayHandle>) -> Self {
        Self {
            port,
            overlay,
            pending: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(HashMap::new()),
            overlay_visible: Cell::new(false),
            counter: Cell::new(0),
        }
    }

    /// `timestamp + counter`: unique within the page, sortable in logs.
    fn next_request_id(&self) -> String {
        let counter = self.counter.get() + 1;
        self.counter.set(counter);
        format!("{}-{}", now_ms() as u64, counter)
    }

    /// Post one request envelope and await its terminal reply. The pending
    /// entry and the progress subscriber are registered before the post so
    /// no early reply can race them.
    pub async fn post(
        &self,
        message_type: &str,
        payload: Value,
        options: PostOptions,
    ) -> Result<Value, WalletSdkError> {
        let request_id = self.next_request_id();
        let timeout_ms = options.timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().insert(
            request_id.clone(),
            PendingRequest {
                resolver: sender,
                deadline_ms: now_ms() + timeout_ms,
                timeout_ms,
            },
        );
        if let Some(on_progress) = options.on_progress.clone() {
            self.subscribers.borrow_mut().insert(
                request_id.clone(),
                ProgressSubscriber {
                    on_progress,
                    sticky: options.sticky,
                    delivered: 0,
                },
            );
        }

        let envelope = json!({
            "requestId": request_id,
            "type": message_type,
            "payload": payload,
        });
        if let Err(e) = self.port.post(envelope) {
            self.pending.borrow_mut().remove(&request_id);
            self.subscribers.borrow_mut().remove(&request_id);
            return Err(WalletSdkError::new(TRANSPORT_ERROR, e));
        }

        receiver.await.unwrap_or_else(|_| {
            Err(WalletSdkError::new(
                TRANSPORT_ERROR,
                "Router dropped the pending request",
            ))
        })
    }

    /// Handle one inbound envelope from the port.
    pub fn on_port_message(&self, envelope: &Value) {
        let envelope_type = envelope.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let request_id = envelope
            .get("requestId")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();
        let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);

        match envelope_type {
            "READY" => {} // transport-level; nothing to correlate
            "PROGRESS" => self.on_progress(&request_id, &payload),
            "PONG" => self.resolve(&request_id, Ok(payload)),
            "PM_RESULT" => self.resolve(&request_id, Ok(payload)),
            "ERROR" => {
                let error = WalletSdkError::from_error_payload(&payload);
                self.resolve(&request_id, Err(error));
            }
            other => debug!("Unknown envelope type {} (dropped)", other),
        }
    }

    fn on_progress(&self, request_id: &str, payload: &Value) {
        // Progress refreshes the timeout.
        if let Some(pending) = self.pending.borrow_mut().get_mut(request_id) {
            pending.deadline_ms = now_ms() + pending.timeout_ms;
        }

        // Overlay phase heuristic.
        if let Some(phase) = payload.get("phase").and_then(|p| p.as_str()) {
            match overlay_action_for_phase(phase) {
                Some(OverlayAction::Show) => self.show_overlay(),
                Some(OverlayAction::Hide) => self.hide_overlay(),
                None => {}
            }
        }

        let callback = {
            let mut subscribers = self.subscribers.borrow_mut();
            match subscribers.get_mut(request_id) {
                Some(subscriber) => {
                    subscriber.delivered += 1;
                    Some(subscriber.on_progress.clone())
                }
                None => None,
            }
        };

        match callback {
            Some(callback) => callback(payload),
            None => debug!("PROGRESS for {} with no subscriber (dropped)", request_id),
        }
    }

    fn resolve(&self, request_id: &str, outcome: Result<Value, WalletSdkError>) {
        // Terminal replies unconditionally hide the overlay.
        self.hide_overlay();

        let synthetic_error = outcome.as_ref().err().map(|e| {
            json!({
                "step": 0,
                "phase": "error",
                "status": "error",
                "message": e.message,
            })
        });

        let pending = self.pending.borrow_mut().remove(request_id);
        match pending {
            Some(pending) => {
                let result_payload = match outcome {
                    // Unwrap the `{ok, result}` terminal shape.
                    Ok(payload) => Ok(payload
                        .get("result")
                        .cloned()
                        .unwrap_or(payload)),
                    Err(e) => Err(e),
                };
                let _ = pending.resolver.send(result_payload);
            }
            None => debug!("Terminal reply for unknown request {} (dropped)", request_id),
        }

        // Non-sticky subscribers end with the request; sticky ones keep
        // receiving and get a synthetic error event on rejection. The
        // borrow is released before the callback runs so callbacks may
        // re-enter the router.
        let (keep, callback) = {
            let subscribers = self.subscribers.borrow();
            match subscribers.get(request_id) {
                Some(s) => (s.sticky, Some(s.on_progress.clone())),
                None => (false, None),
            }
        };
        if keep {
            if let (Some(callback), Some(synthetic)) = (callback, synthetic_error.as_ref()) {
                callback(synthetic);
            }
        } else {
            self.subscribers.borrow_mut().remove(request_id);
        }
    }

    /// Cancel one in-flight request: the subscriber is dropped immediately
    /// (no progress after cancellation), a PM_CANCEL control envelope goes
    /// to the host, and the host answers with `ERROR{CANCELLED}`.
    pub fn cancel_request(&self, request_id: &str) {
        self.subscribers.borrow_mut().remove(request_id);
        self.hide_overlay();

        let control_id = self.next_request_id();
        let envelope = json!({
            "requestId": control_id,
            "type": "PM_CANCEL",
            "payload": { "requestId": request_id },
        });
        if let Err(e) = self.port.post(envelope) {
            warn!("PM_CANCEL post failed: {}", e);
            // Best-effort local rejection so the caller is not stranded.
            self.resolve(
                request_id,
                Err(WalletSdkError::new("CANCELLED", "Request was cancelled")),
            );
        }
    }

    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.pending.borrow().keys().cloned().collect();
        for id in ids {
            self.cancel_request(&id);
        }
    }

    /// Remove a sticky subscriber once its flow is truly over.
    pub fn unsubscribe(&self, request_id: &str) {
        self.subscribers.borrow_mut().remove(request_id);
    }

    /// Expire requests whose deadline has passed. Driven by an interval on
    /// the wasm side; tests call it directly with a synthetic clock.
    pub fn expire_overdue(&self, now: f64) {
        let overdue: Vec<String> = self
            .pending
            .borrow()
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in overdue {
            warn!("Request {} timed out", id);
            self.resolve(
                &id,
                Err(WalletSdkError::new(
                    REQUEST_TIMEOUT,
                    "No reply from the wallet host within the timeout",
                )),
            );
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn has_subscriber(&self, request_id: &str) -> bool {
        self.subscribers.borrow().contains_key(request_id)
    }

    /// Number of progress events delivered to a live subscriber.
    pub fn delivered_count(&self, request_id: &str) -> Option<u32> {
        self.subscribers
            .borrow()
            .get(request_id)
            .map(|s| s.delivered)
    }

    // Overlay visibility is stateful but idempotent.

    fn show_overlay(&self) {
        if !self.overlay_visible.get() {
            self.overlay_visible.set(true);
            self.overlay.show_for_activation();
        }
    }

    fn hide_overlay(&self) {
        if self.overlay_visible.get() {
            self.overlay_visible.set(false);
            self.overlay.hide_for_activation();
        }
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;

    #[derive(Default)]
    struct RecordingPort {
        posted: RefCell<Vec<Value>>,
        fail: Cell<bool>,
    }

    impl RouterPort for RecordingPort {
        fn post(&self, envelope: Value) -> Result<(), String> {
            if self.fail.get() {
                return Err("port closed".to_string());
            }
            self.posted.borrow_mut().push(envelope);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingOverlay {
        shows: Cell<u32>,
        hides: Cell<u32>,
    }

    impl OverlayHandle for RecordingOverlay {
        fn show_for_activation(&self) {
            self.shows.set(self.shows.get() + 1);
        }
        fn hide_for_activation(&self) {
            self.hides.set(self.hides.get() + 1);
        }
    }

    struct Fixture {
        router: Rc<Router>,
        port: Rc<RecordingPort>,
        overlay: Rc<RecordingOverlay>,
        pool: LocalPool,
    }

    fn fixture() -> Fixture {
        let port = Rc::new(RecordingPort::default());
        let overlay = Rc::new(RecordingOverlay::default());
        let router = Rc::new(Router::new(port.clone(), overlay.clone()));
        Fixture {
            router,
            port,
            overlay,
            pool: LocalPool::new(),
        }
    }

    fn posted_request_id(port: &RecordingPort, index: usize) -> String {
        port.posted.borrow()[index]["requestId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn progress_envelope(request_id: &str, phase: &str) -> Value {
        json!({
            "requestId": request_id,
            "type": "PROGRESS",
            "payload": { "step": 2, "phase": phase, "status": "progress" },
        })
    }

    fn result_envelope(request_id: &str, result: Value) -> Value {
        json!({
            "requestId": request_id,
            "type": "PM_RESULT",
            "payload": { "ok": true, "result": result },
        })
    }

    #[test]
    fn resolves_matching_request_with_unwrapped_result() {
        let mut f = fixture();
        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post("PM_GET_LOGIN_STATE", json!({}), PostOptions::default())
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);
        f.router
            .on_port_message(&result_envelope(&request_id, json!({ "loggedIn": true })));

        let result = f.pool.run_until(handle).unwrap();
        assert_eq!(result["loggedIn"], true);
        assert_eq!(f.router.pending_count(), 0);
    }

    #[test]
    fn unique_request_ids_for_overlapping_requests() {
        let mut f = fixture();
        for _ in 0..2 {
            let router = f.router.clone();
            f.pool
                .spawner()
                .spawn_local(async move {
                    let _ = router.post("PING", json!({}), PostOptions::default()).await;
                })
                .unwrap();
        }
        f.pool.run_until_stalled();
        let a = posted_request_id(&f.port, 0);
        let b = posted_request_id(&f.port, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn error_envelope_rejects_with_code() {
        let mut f = fixture();
        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post("PM_LOGIN", json!({}), PostOptions::default())
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);
        f.router.on_port_message(&json!({
            "requestId": request_id,
            "type": "ERROR",
            "payload": { "code": "NOT_CONFIGURED", "message": "configure first" },
        }));

        let err = f.pool.run_until(handle).unwrap_err();
        assert_eq!(err.code, "NOT_CONFIGURED");
    }

    #[test]
    fn progress_reaches_subscriber_and_refreshes_timeout() {
        let mut f = fixture();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = seen.clone();

        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post(
                        "PM_REGISTER",
                        json!({}),
                        PostOptions {
                            on_progress: Some(Rc::new(move |p| {
                                seen_cb.borrow_mut().push(p.clone())
                            })),
                            sticky: false,
                            timeout_ms: Some(1_000.0),
                        },
                    )
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);

        // A progress event arrives near the deadline and refreshes it;
        // expiring at the old deadline is then a no-op.
        f.router
            .on_port_message(&progress_envelope(&request_id, "preparation"));
        f.router.expire_overdue(now_ms() + 500.0);
        assert_eq!(f.router.pending_count(), 1);

        f.router
            .on_port_message(&result_envelope(&request_id, json!({})));
        f.pool.run_until(handle).unwrap();

        assert_eq!(seen.borrow().len(), 1);
        // Subscriber is gone after the terminal reply (non-sticky).
        assert!(!f.router.has_subscriber(&request_id));
    }

    #[test]
    fn timeout_rejects_when_no_progress_arrives() {
        let mut f = fixture();
        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post(
                        "PM_LOGIN",
                        json!({}),
                        PostOptions {
                            timeout_ms: Some(1_000.0),
                            ..Default::default()
                        },
                    )
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        f.router.expire_overdue(now_ms() + 2_000.0);

        let err = f.pool.run_until(handle).unwrap_err();
        assert_eq!(err.code, REQUEST_TIMEOUT);
    }

    #[test]
    fn no_progress_after_cancel_request() {
        let mut f = fixture();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = seen.clone();

        let router = f.router.clone();
        f.pool
            .spawner()
            .spawn_local(async move {
                let _ = router
                    .post(
                        "PM_EXECUTE_ACTION",
                        json!({}),
                        PostOptions {
                            on_progress: Some(Rc::new(move |p| {
                                seen_cb.borrow_mut().push(p.clone())
                            })),
                            ..Default::default()
                        },
                    )
                    .await;
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);

        f.router.cancel_request(&request_id);

        // Late progress after cancellation must not reach the callback.
        f.router
            .on_port_message(&progress_envelope(&request_id, "user-confirmation"));
        assert!(seen.borrow().is_empty());

        // A PM_CANCEL control envelope went out.
        let posted = f.port.posted.borrow();
        assert!(posted
            .iter()
            .any(|e| e["type"] == "PM_CANCEL" && e["payload"]["requestId"] == request_id));
    }

    #[test]
    fn sticky_subscriber_survives_terminal_reply() {
        let mut f = fixture();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = seen.clone();

        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post(
                        "PM_START_DEVICE2_LINKING_FLOW",
                        json!({}),
                        PostOptions {
                            on_progress: Some(Rc::new(move |p| {
                                seen_cb.borrow_mut().push(p.clone())
                            })),
                            sticky: true,
                            timeout_ms: None,
                        },
                    )
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);

        f.router
            .on_port_message(&result_envelope(&request_id, json!({ "qrData": {} })));
        f.pool.run_until(handle).unwrap();

        // Late progress still delivers.
        f.router
            .on_port_message(&progress_envelope(&request_id, "device-link-registration"));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(f.router.delivered_count(&request_id), Some(1));

        f.router.unsubscribe(&request_id);
        f.router
            .on_port_message(&progress_envelope(&request_id, "device-link-registration"));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn overlay_follows_phase_heuristic_and_terminal_hides() {
        let mut f = fixture();
        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router
                    .post("PM_EXECUTE_ACTION", json!({}), PostOptions::default())
                    .await
            })
            .unwrap();

        f.pool.run_until_stalled();
        let request_id = posted_request_id(&f.port, 0);

        f.router
            .on_port_message(&progress_envelope(&request_id, "user-confirmation"));
        assert!(f.router.overlay_visible());
        assert_eq!(f.overlay.shows.get(), 1);

        // Idempotent: a second show-phase does not re-show.
        f.router
            .on_port_message(&progress_envelope(&request_id, "webauthn-authentication"));
        assert_eq!(f.overlay.shows.get(), 1);

        f.router
            .on_port_message(&progress_envelope(&request_id, "authentication-complete"));
        assert!(!f.router.overlay_visible());

        f.router
            .on_port_message(&progress_envelope(&request_id, "user-confirmation"));
        assert!(f.router.overlay_visible());

        // Terminal unconditionally hides.
        f.router
            .on_port_message(&result_envelope(&request_id, json!({})));
        f.pool.run_until(handle).unwrap();
        assert!(!f.router.overlay_visible());
    }

    #[test]
    fn post_failure_rejects_immediately() {
        let mut f = fixture();
        f.port.fail.set(true);

        let router = f.router.clone();
        let handle = f
            .pool
            .spawner()
            .spawn_local_with_handle(async move {
                router.post("PING", json!({}), PostOptions::default()).await
            })
            .unwrap();

        let err = f.pool.run_until(handle).unwrap_err();
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(f.router.pending_count(), 0);
    }
}
