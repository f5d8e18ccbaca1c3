// End-to-end host tests: the dispatcher drives the real signer and VRF
// worker crates in-process, with a scripted chain transport and a
// deterministic fake authenticator.

use futures::executor::{block_on, LocalPool};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::dispatcher::WalletHost;
use crate::nonce_manager::NonceManager;
use crate::protocol::{ChildEnvelope, ParentEnvelope, ReplySink};
use crate::rpc::{NearRpcClient, RpcTransport};
use crate::stores::MemoryBackend;
use crate::webauthn::FakeWebAuthnProvider;
use crate::workers::{
    InProcessSignerBridge, InProcessVrfBridge, SignerWorkerManager, VrfWorkerManager,
};

// === CHAIN MOCK ===

/// Routing transport mock: answers `block`, `query` and `send_tx` from a
/// small mutable chain model instead of a fixed script.
#[derive(Clone)]
struct ChainMock {
    chain_nonce: Rc<Cell<u64>>,
    block_height: Rc<Cell<u64>>,
    access_key_missing: Rc<Cell<bool>>,
    send_failures: Rc<RefCell<VecDeque<String>>>,
    sent_transactions: Rc<RefCell<Vec<Value>>>,
    block_fetches: Rc<Cell<u32>>,
    access_key_fetches: Rc<Cell<u32>>,
}

impl Default for ChainMock {
    fn default() -> Self {
        Self {
            chain_nonce: Rc::new(Cell::new(100)),
            block_height: Rc::new(Cell::new(5_000)),
            access_key_missing: Rc::new(Cell::new(false)),
            send_failures: Rc::new(RefCell::new(VecDeque::new())),
            sent_transactions: Rc::new(RefCell::new(Vec::new())),
            block_fetches: Rc::new(Cell::new(0)),
            access_key_fetches: Rc::new(Cell::new(0)),
        }
    }
}

impl ChainMock {
    fn block_hash() -> String {
        bs58::encode([7u8; 32]).into_string()
    }

    fn result(value: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": "wallet-host", "result": value })
    }

    fn respond(&self, body: &Value) -> Result<Value, String> {
        let method = body.get("method").and_then(|m| m.as_str()).unwrap_or("");
        match method {
            "block" => {
                self.block_fetches.set(self.block_fetches.get() + 1);
                Ok(Self::result(json!({
                    "header": {
                        "hash": Self::block_hash(),
                        "height": self.block_height.get(),
                    }
                })))
            }
            "query" => {
                let request_type = body
                    .pointer("/params/request_type")
                    .and_then(|r| r.as_str())
                    .unwrap_or("");
                match request_type {
                    "view_access_key" => {
                        self.access_key_fetches.set(self.access_key_fetches.get() + 1);
                        if self.access_key_missing.get() {
                            return Ok(json!({
                                "jsonrpc": "2.0",
                                "id": "wallet-host",
                                "error": { "message": "UNKNOWN_ACCESS_KEY" },
                            }));
                        }
                        Ok(Self::result(json!({
                            "nonce": self.chain_nonce.get(),
                            "permission": "FullAccess",
                        })))
                    }
                    "view_access_key_list" => Ok(Self::result(json!({ "keys": [] }))),
                    "view_account" => Ok(Self::result(json!({ "amount": "1" }))),
                    other => Err(format!("unexpected query: {}", other)),
                }
            }
            "send_tx" => {
                if let Some(failure) = self.send_failures.borrow_mut().pop_front() {
                    return Err(failure);
                }
                self.sent_transactions
                    .borrow_mut()
                    .push(body.pointer("/params").cloned().unwrap_or(Value::Null));
                Ok(Self::result(json!({
                    "final_execution_status": "EXECUTED_OPTIMISTIC",
                })))
            }
            other => Err(format!("unexpected method: {}", other)),
        }
    }
}

/// Yield once so concurrent callers can observe each other's in-flight
/// futures; an instantly-ready mock would make coalescing untestable.
async fn yield_once() {
    let mut yielded = false;
    futures::future::poll_fn(move |cx| {
        if yielded {
            std::task::Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    })
    .await
}

impl RpcTransport for ChainMock {
    fn post_json(&self, _url: String, body: Value) -> LocalBoxFuture<'static, Result<Value, String>> {
        let response = self.respond(&body);
        async move {
            yield_once().await;
            response
        }
        .boxed_local()
    }
}

// === SINK ===

#[derive(Clone, Default)]
struct TestSink {
    sent: Rc<RefCell<Vec<ChildEnvelope>>>,
}

impl ReplySink for TestSink {
    fn send(&self, envelope: ChildEnvelope) {
        self.sent.borrow_mut().push(envelope);
    }
}

impl TestSink {
    fn for_request<'a>(&self, envelopes: &'a [ChildEnvelope], id: &str) -> Vec<&'a ChildEnvelope> {
        envelopes
            .iter()
            .filter(|e| e.request_id.as_deref() == Some(id))
            .collect()
    }

    fn terminals(&self, id: &str) -> Vec<ChildEnvelope> {
        self.sent
            .borrow()
            .iter()
            .filter(|e| {
                e.request_id.as_deref() == Some(id)
                    && (e.envelope_type == "PM_RESULT" || e.envelope_type == "ERROR")
            })
            .cloned()
            .collect()
    }

    fn progress(&self, id: &str) -> Vec<ChildEnvelope> {
        self.sent
            .borrow()
            .iter()
            .filter(|e| e.request_id.as_deref() == Some(id) && e.envelope_type == "PROGRESS")
            .cloned()
            .collect()
    }
}

// === HARNESS ===

struct Harness {
    host: Rc<WalletHost<MemoryBackend, ChainMock>>,
    chain: ChainMock,
    webauthn: Rc<FakeWebAuthnProvider>,
    sink: TestSink,
    next_request: Cell<u32>,
}

impl Harness {
    fn new() -> Self {
        let chain = ChainMock::default();
        let webauthn = Rc::new(FakeWebAuthnProvider::new("device-1-seed"));
        let backend = Rc::new(MemoryBackend::default());

        let chain_for_factory = chain.clone();
        let host = Rc::new(WalletHost::new(
            "wallet.example.localhost",
            backend,
            VrfWorkerManager::new(Rc::new(InProcessVrfBridge::new())),
            SignerWorkerManager::new(Rc::new(InProcessSignerBridge)),
            webauthn.clone(),
            Box::new(move || chain_for_factory.clone()),
        ));

        Self {
            host,
            chain,
            webauthn,
            sink: TestSink::default(),
            next_request: Cell::new(1),
        }
    }

    fn request_id(&self) -> String {
        let n = self.next_request.get();
        self.next_request.set(n + 1);
        format!("req-{}", n)
    }

    fn dispatch(&self, tag: &str, payload: Value) -> (String, Value) {
        let request_id = self.request_id();
        block_on(self.host.dispatch(
            ParentEnvelope {
                request_id: Some(request_id.clone()),
                tag: tag.to_string(),
                payload,
            },
            &self.sink,
        ));

        let terminals = self.sink.terminals(&request_id);
        assert_eq!(
            terminals.len(),
            1,
            "expected exactly one terminal for {} {}",
            tag,
            request_id
        );
        (request_id, serde_json::to_value(&terminals[0]).unwrap())
    }

    fn expect_ok(&self, tag: &str, payload: Value) -> (String, Value) {
        let (id, terminal) = self.dispatch(tag, payload);
        assert_eq!(
            terminal["type"], "PM_RESULT",
            "{} failed: {}",
            tag, terminal
        );
        assert_eq!(terminal["payload"]["ok"], true);
        (id, terminal["payload"]["result"].clone())
    }

    fn expect_error(&self, tag: &str, payload: Value) -> (String, Value) {
        let (id, terminal) = self.dispatch(tag, payload);
        assert_eq!(terminal["type"], "ERROR", "{} unexpectedly ok", tag);
        (id, terminal["payload"].clone())
    }

    fn configure(&self) {
        self.expect_ok(
            "PM_SET_CONFIG",
            json!({
                "nearRpcUrl": "https://rpc.testnet.example.com",
                "contractId": "webauthn.testnet",
            }),
        );
    }

    fn register(&self, account: &str) -> Value {
        let (_, result) = self.expect_ok("PM_REGISTER", json!({ "nearAccountId": account }));
        result
    }

    fn skip_confirmation() -> Value {
        json!({
            "uiMode": "skip",
            "behavior": "requireClick",
            "autoProceedDelayMs": 0,
        })
    }
}

// === BASIC DISPATCH CONTRACTS ===

#[test]
fn unknown_tag_is_rejected_with_host_error() {
    let h = Harness::new();
    let (_, payload) = h.expect_error("PM_NOT_A_REAL_TAG", json!({}));
    assert_eq!(payload["code"], "HOST_ERROR");
}

#[test]
fn methods_before_config_fail_with_not_configured() {
    let h = Harness::new();
    let (_, payload) = h.expect_error("PM_LOGIN", json!({ "nearAccountId": "alice.testnet" }));
    assert_eq!(payload["code"], "NOT_CONFIGURED");
}

#[test]
fn ping_answers_pong() {
    let h = Harness::new();
    let request_id = h.request_id();
    block_on(h.host.dispatch(
        ParentEnvelope {
            request_id: Some(request_id.clone()),
            tag: "PING".to_string(),
            payload: Value::Null,
        },
        &h.sink,
    ));
    let sent = h.sink.sent.borrow();
    let replies = h.sink.for_request(&sent, &request_id);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].envelope_type, "PONG");
}

#[test]
fn malformed_payload_is_invalid_request() {
    let h = Harness::new();
    h.configure();
    let (_, payload) = h.expect_error("PM_LOGIN", json!({ "wrongField": 1 }));
    assert_eq!(payload["code"], "INVALID_REQUEST");
}

// === SCENARIO: REGISTRATION + LOGIN ===

#[test]
fn register_creates_records_and_logs_in() {
    let h = Harness::new();
    h.configure();

    let result = h.register("alice.testnet");
    assert_eq!(result["success"], true);
    assert_eq!(result["nearAccountId"], "alice.testnet");
    assert_eq!(result["deviceIndex"], 1);
    let public_key = result["publicKey"].as_str().unwrap();
    assert!(public_key.starts_with("ed25519:"));

    // Login state reflects the active VRF session.
    let (_, state) = h.expect_ok("PM_GET_LOGIN_STATE", json!({}));
    assert_eq!(state["loggedIn"], true);
    assert_eq!(state["vrfActive"], true);
    assert_eq!(state["vrfAccountId"], "alice.testnet");

    // Passkey presence is queryable.
    let (_, has) = h.expect_ok("PM_HAS_PASSKEY", json!({ "nearAccountId": "alice.testnet" }));
    assert_eq!(has["hasPasskey"], true);
}

#[test]
fn login_with_prf_credential_restores_session() {
    let h = Harness::new();
    h.configure();
    let registered = h.register("alice.testnet");
    let public_key = registered["publicKey"].as_str().unwrap().to_string();

    h.expect_ok("PM_LOGOUT", json!({}));
    let (_, state) = h.expect_ok("PM_GET_LOGIN_STATE", json!({}));
    assert_eq!(state["loggedIn"], false);
    assert_eq!(state["vrfActive"], false);

    let (_, login) = h.expect_ok("PM_LOGIN", json!({ "nearAccountId": "alice.testnet" }));
    assert_eq!(login["success"], true);
    assert_eq!(login["nearAccountId"], "alice.testnet");
    assert_eq!(login["clientNearPublicKey"], public_key);

    let (_, state) = h.expect_ok("PM_GET_LOGIN_STATE", json!({}));
    assert_eq!(state["vrfActive"], true);
    assert_eq!(state["vrfAccountId"], "alice.testnet");

    let (_, recents) = h.expect_ok("PM_GET_RECENT_LOGINS", json!({}));
    assert_eq!(recents["lastUser"], "alice.testnet");
}

#[test]
fn registration_refuses_prf_less_authenticator() {
    let h = Harness::new();
    h.configure();
    h.webauthn.omit_prf.set(true);

    let (_, payload) = h.expect_error("PM_REGISTER", json!({ "nearAccountId": "alice.testnet" }));
    assert_eq!(payload["code"], "PRF_UNAVAILABLE");

    // Refusal leaves no half-initialized identity behind.
    let (_, has) = {
        h.webauthn.omit_prf.set(false);
        h.expect_ok("PM_HAS_PASSKEY", json!({ "nearAccountId": "alice.testnet" }))
    };
    assert_eq!(has["hasPasskey"], false);
}

#[test]
fn webauthn_cancellation_maps_to_cancelled() {
    let h = Harness::new();
    h.configure();
    *h.webauthn.fail_with.borrow_mut() =
        Some("NotAllowedError: the user dismissed the prompt".to_string());

    let (_, payload) = h.expect_error("PM_REGISTER", json!({ "nearAccountId": "alice.testnet" }));
    assert_eq!(payload["code"], "CANCELLED");
}

// === SCENARIO: BATCHED TRANSFER ===

#[test]
fn batched_transfer_signs_and_sends_in_order() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    let (request_id, result) = h.expect_ok(
        "PM_SIGN_AND_SEND_TXS",
        json!({
            "nearAccountId": "alice.testnet",
            "transactions": [
                {
                    "receiverId": "bob.testnet",
                    "actions": [{"type": "Transfer", "amount": "1000000000000000000000000"}],
                },
                {
                    "receiverId": "bob.testnet",
                    "actions": [{"type": "Transfer", "amount": "2000000000000000000000000"}],
                },
            ],
            "options": {
                "executeSequentially": true,
                "confirmationConfig": Harness::skip_confirmation(),
            },
        }),
    );

    let transactions = result["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);

    // Nonces are contiguous and in input order.
    let first_nonce = transactions[0]["nonce"].as_u64().unwrap();
    let second_nonce = transactions[1]["nonce"].as_u64().unwrap();
    assert_eq!(second_nonce, first_nonce + 1);
    assert_eq!(h.chain.sent_transactions.borrow().len(), 2);

    // Progress discipline: at least one PROGRESS, signing progress before
    // the terminal, exactly one terminal (checked in dispatch()).
    let progress = h.sink.progress(&request_id);
    assert!(!progress.is_empty());
    assert!(progress
        .iter()
        .any(|p| p.payload["step"] == 6 || p.payload["step"] == 7));
    assert!(progress.iter().any(|p| p.payload["step"] == 8));

    // No reservations left over after broadcast + reconciliation.
    let nonce_manager = h.host.nonce_manager().unwrap();
    assert_eq!(nonce_manager.reserved_count(), 0);
}

#[test]
fn sign_without_send_keeps_reservations_for_caller() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    let (_, result) = h.expect_ok(
        "PM_SIGN_TXS_WITH_ACTIONS",
        json!({
            "nearAccountId": "alice.testnet",
            "transactions": [{
                "receiverId": "bob.testnet",
                "actions": [{"type": "Transfer", "amount": "1"}],
            }],
            "options": { "confirmationConfig": Harness::skip_confirmation() },
        }),
    );

    let signed = result["signedTransactions"].as_array().unwrap();
    assert_eq!(signed.len(), 1);
    assert!(!signed[0]["borshBase64"].as_str().unwrap().is_empty());
    assert_eq!(h.chain.sent_transactions.borrow().len(), 0);

    let nonce_manager = h.host.nonce_manager().unwrap();
    assert_eq!(nonce_manager.reserved_count(), 1);
}

#[test]
fn broadcast_failure_releases_nonces_and_maps_code() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    h.chain
        .send_failures
        .borrow_mut()
        .push_back("InvalidTxError: InvalidNonce".to_string());

    let (_, payload) = h.expect_error(
        "PM_EXECUTE_ACTION",
        json!({
            "nearAccountId": "alice.testnet",
            "receiverId": "bob.testnet",
            "actions": [{"type": "Transfer", "amount": "1"}],
            "options": { "confirmationConfig": Harness::skip_confirmation() },
        }),
    );
    assert_eq!(payload["code"], "INVALID_NONCE");

    let nonce_manager = h.host.nonce_manager().unwrap();
    assert_eq!(nonce_manager.reserved_count(), 0);
}

#[test]
fn invalid_action_shape_fails_preparation() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");
    let ceremonies_before = h.webauthn.ceremonies.get();

    let (_, payload) = h.expect_error(
        "PM_EXECUTE_ACTION",
        json!({
            "nearAccountId": "alice.testnet",
            "receiverId": "bob.testnet",
            "actions": [{"type": "Transfer", "amount": ""}],
            "options": { "confirmationConfig": Harness::skip_confirmation() },
        }),
    );
    assert_eq!(payload["code"], "INVALID_REQUEST");
    // Validation failed before any WebAuthn ceremony.
    assert_eq!(h.webauthn.ceremonies.get(), ceremonies_before);
}

// === SCENARIO: TRANSIENT RPC THEN SUCCESS ===

#[test]
fn send_transaction_retries_transient_errors() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    h.chain
        .send_failures
        .borrow_mut()
        .push_back("HTTP 502: Bad Gateway".to_string());
    h.chain
        .send_failures
        .borrow_mut()
        .push_back("HTTP 502: Bad Gateway".to_string());

    let (_, result) = h.expect_ok(
        "PM_SEND_TRANSACTION",
        json!({ "signedTxBase64": "AAAA", "waitUntil": "FINAL" }),
    );
    assert_eq!(
        result["outcome"]["final_execution_status"],
        "EXECUTED_OPTIMISTIC"
    );
    // Two failures consumed, one success recorded: three attempts total.
    assert!(h.chain.send_failures.borrow().is_empty());
    assert_eq!(h.chain.sent_transactions.borrow().len(), 1);
}

// === SCENARIO: USER CANCELS CONFIRMATION ===

#[test]
fn cancel_during_confirmation_yields_cancelled_without_ceremony() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");
    let ceremonies_before = h.webauthn.ceremonies.get();

    let mut pool = LocalPool::new();
    let spawner = pool.spawner();

    let host = h.host.clone();
    let sink = h.sink.clone();
    let request_id = "req-cancel-target".to_string();
    let id_for_task = request_id.clone();
    let handle = spawner
        .spawn_local_with_handle(async move {
            host.dispatch(
                ParentEnvelope {
                    request_id: Some(id_for_task),
                    tag: "PM_EXECUTE_ACTION".to_string(),
                    payload: json!({
                        "nearAccountId": "alice.testnet",
                        "receiverId": "bob.testnet",
                        "actions": [{"type": "Transfer", "amount": "1"}],
                        "options": { "confirmationConfig": {
                            "uiMode": "modal",
                            "behavior": "requireClick",
                            "autoProceedDelayMs": 0,
                        }},
                    }),
                },
                &sink,
            )
            .await;
        })
        .unwrap();

    // Run until the handler parks on the confirmation UI, after the
    // STEP_2 user-confirmation progress fired.
    pool.run_until_stalled();
    assert!(h
        .sink
        .progress(&request_id)
        .iter()
        .any(|p| p.payload["step"] == 2));

    // The router cancels the in-flight request.
    let host = h.host.clone();
    let sink = h.sink.clone();
    let cancel_target = request_id.clone();
    spawner
        .spawn_local(async move {
            host.dispatch(
                ParentEnvelope {
                    request_id: Some("req-cancel-ctl".to_string()),
                    tag: "PM_CANCEL".to_string(),
                    payload: json!({ "requestId": cancel_target }),
                },
                &sink,
            )
            .await;
        })
        .unwrap();

    pool.run_until(handle);

    let terminals = h.sink.terminals(&request_id);
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].envelope_type, "ERROR");
    assert_eq!(terminals[0].payload["code"], "CANCELLED");

    // No WebAuthn ceremony ran, no nonce was consumed.
    assert_eq!(h.webauthn.ceremonies.get(), ceremonies_before);
    let nonce_manager = h.host.nonce_manager().unwrap();
    assert_eq!(nonce_manager.reserved_count(), 0);
}

// === NEP-413 / EXPORT ===

#[test]
fn nep413_signing_round_trips() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    let nonce = crate::utils::base64_standard_encode(&[9u8; 32]);
    let (_, result) = h.expect_ok(
        "PM_SIGN_NEP413",
        json!({
            "nearAccountId": "alice.testnet",
            "message": "Authorize session",
            "recipient": "app.example.com",
            "nonce": nonce,
            "state": "abc",
            "confirmationConfig": Harness::skip_confirmation(),
        }),
    );

    assert_eq!(result["accountId"], "alice.testnet");
    assert_eq!(result["state"], "abc");
    assert!(!result["signature"].as_str().unwrap().is_empty());
}

#[test]
fn export_round_trips_to_registration_public_key() {
    let h = Harness::new();
    h.configure();
    let registered = h.register("alice.testnet");
    let public_key = registered["publicKey"].as_str().unwrap();

    // Export requires an explicit confirmation; resolve it when presented.
    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    let host = h.host.clone();
    let sink = h.sink.clone();
    let handle = spawner
        .spawn_local_with_handle(async move {
            host.dispatch(
                ParentEnvelope {
                    request_id: Some("req-export".to_string()),
                    tag: "PM_EXPORT_NEAR_KEYPAIR".to_string(),
                    payload: json!({ "nearAccountId": "alice.testnet" }),
                },
                &sink,
            )
            .await;
        })
        .unwrap();

    pool.run_until_stalled();
    assert!(h.host.confirm.has_active());
    h.host.confirm.resolve_active(crate::confirm::Decision::Confirmed);
    pool.run_until(handle);

    let terminals = h.sink.terminals("req-export");
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].envelope_type, "PM_RESULT");
    let result = &terminals[0].payload["result"];
    assert_eq!(result["publicKey"], public_key);
    assert!(result["privateKey"]
        .as_str()
        .unwrap()
        .starts_with("ed25519:"));
}

// === RECOVERY ===

#[test]
fn recovery_rebuilds_identity_from_passkey() {
    let h = Harness::new();
    h.configure();
    let registered = h.register("alice.testnet");
    let original_key = registered["publicKey"].as_str().unwrap().to_string();

    // Simulate a wiped wallet origin: fresh host, same authenticator.
    let h2 = {
        let fresh = Harness::new();
        // Reuse the same device seed so PRF outputs match.
        fresh
    };
    h2.configure();
    let (_, result) = h2.expect_ok(
        "PM_RECOVER_ACCOUNT_FLOW",
        json!({ "accountIdHint": "alice.testnet" }),
    );

    assert_eq!(result["success"], true);
    assert_eq!(result["nearAccountId"], "alice.testnet");
    // The deterministic derivation restores the registered public key.
    assert_eq!(result["publicKey"], original_key);

    let (_, state) = h2.expect_ok("PM_GET_LOGIN_STATE", json!({}));
    assert_eq!(state["vrfActive"], true);
}

// === DEVICE LINKING ===

#[test]
fn device_linking_signs_add_key_for_scanned_device() {
    let h = Harness::new();
    h.configure();
    h.register("alice.testnet");

    let device2_key = format!("ed25519:{}", bs58::encode([9u8; 32]).into_string());
    let (_, result) = h.expect_ok(
        "PM_LINK_DEVICE_WITH_SCANNED_QR_DATA",
        json!({
            "qrData": {
                "nearAccountId": "alice.testnet",
                "devicePublicKey": device2_key,
                "deviceIndex": 2,
            },
            "options": { "confirmationConfig": Harness::skip_confirmation() },
        }),
    );

    assert_eq!(result["success"], true);
    assert_eq!(result["linkedDeviceIndex"], 2);
    assert_eq!(h.chain.sent_transactions.borrow().len(), 1);
}

#[test]
fn device2_linking_flow_replies_then_keeps_polling() {
    let h = Harness::new();
    h.configure();

    let request_id = h.request_id();
    block_on(h.host.dispatch(
        ParentEnvelope {
            request_id: Some(request_id.clone()),
            tag: "PM_START_DEVICE2_LINKING_FLOW".to_string(),
            payload: json!({
                "nearAccountId": "alice.testnet",
                "pollIntervalMs": 0,
                "maxPollAttempts": 2,
            }),
        },
        &h.sink,
    ));

    // Terminal result carries the QR payload.
    let terminals = h.sink.terminals(&request_id);
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].envelope_type, "PM_RESULT");
    let qr = &terminals[0].payload["result"]["qrData"];
    assert_eq!(qr["nearAccountId"], "alice.testnet");
    assert!(qr["devicePublicKey"]
        .as_str()
        .unwrap()
        .starts_with("ed25519:"));

    // Post-terminal progress exists (sticky subscribers consume it); the
    // mock chain answers view_access_key, so polling completes.
    let sent = h.sink.sent.borrow();
    let envelopes = h.sink.for_request(&sent, &request_id);
    let terminal_pos = envelopes
        .iter()
        .position(|e| e.envelope_type == "PM_RESULT")
        .unwrap();
    assert!(
        envelopes[terminal_pos + 1..]
            .iter()
            .any(|e| e.envelope_type == "PROGRESS"),
        "expected sticky progress after the terminal reply"
    );
}

// === NONCE MANAGER ===

fn nonce_manager_with(chain: &ChainMock) -> NonceManager<ChainMock> {
    let client =
        Rc::new(NearRpcClient::new("https://rpc.example.com", chain.clone()).unwrap());
    let manager = NonceManager::new(client);
    manager.initialize("alice.testnet", "ed25519:PK");
    manager
}

#[test]
fn reservations_are_disjoint_and_ordered() {
    let chain = ChainMock::default();
    let manager = nonce_manager_with(&chain);
    block_on(manager.get_nonce_block_hash_and_height(true)).unwrap();

    let first = manager.reserve_nonces(3).unwrap();
    let second = manager.reserve_nonces(2).unwrap();

    assert_eq!(first, vec![101, 102, 103]);
    assert_eq!(second, vec![104, 105]);
    assert!(first.iter().all(|n| !second.contains(n)));
}

#[test]
fn release_nonce_is_idempotent() {
    let chain = ChainMock::default();
    let manager = nonce_manager_with(&chain);
    block_on(manager.get_nonce_block_hash_and_height(true)).unwrap();

    let reserved = manager.reserve_nonces(1).unwrap();
    manager.release_nonce(reserved[0]);
    manager.release_nonce(reserved[0]);
    manager.release_nonce(99_999);
    assert_eq!(manager.reserved_count(), 0);
}

#[test]
fn next_nonce_is_monotonic_after_reconciliation() {
    let chain = ChainMock::default();
    let manager = nonce_manager_with(&chain);
    block_on(manager.get_nonce_block_hash_and_height(true)).unwrap();

    let reserved = manager.reserve_nonces(2).unwrap();
    let last = *reserved.last().unwrap();

    chain.chain_nonce.set(last);
    let next = block_on(manager.update_nonce_from_blockchain(last)).unwrap();
    assert!(next > last);
    assert!(next > chain.chain_nonce.get());
    // Consumed reservations were pruned.
    assert_eq!(manager.reserved_count(), 0);

    let after = manager.reserve_nonces(1).unwrap();
    assert!(after[0] >= next);
}

#[test]
fn reconciliation_tolerates_missing_access_key() {
    let chain = ChainMock::default();
    let manager = nonce_manager_with(&chain);
    block_on(manager.get_nonce_block_hash_and_height(true)).unwrap();

    chain.access_key_missing.set(true);
    let next = block_on(manager.update_nonce_from_blockchain(500)).unwrap();
    assert_eq!(next, 501);

    // Subsequent reservation proceeds without a spurious failure.
    let reserved = manager.reserve_nonces(1).unwrap();
    assert_eq!(reserved[0], 501);
}

#[test]
fn concurrent_forced_fetches_are_coalesced() {
    let chain = ChainMock::default();
    let manager = Rc::new(nonce_manager_with(&chain));

    let mut pool = LocalPool::new();
    let spawner = pool.spawner();

    let m1 = manager.clone();
    let h1 = spawner
        .spawn_local_with_handle(async move { m1.get_nonce_block_hash_and_height(true).await })
        .unwrap();
    let m2 = manager.clone();
    let h2 = spawner
        .spawn_local_with_handle(async move { m2.get_nonce_block_hash_and_height(true).await })
        .unwrap();

    let (r1, r2) = pool.run_until(futures::future::join(h1, h2));
    r1.unwrap();
    r2.unwrap();

    // One underlying fetch: one access-key read and one block read.
    assert_eq!(chain.access_key_fetches.get(), 1);
    assert_eq!(chain.block_fetches.get(), 1);
}

#[test]
fn prefetch_never_throws_and_debounces() {
    let chain = ChainMock::default();
    let manager = nonce_manager_with(&chain);

    block_on(manager.prefetch_blockheight());
    let fetches_after_first = chain.block_fetches.get();

    // Immediately after, the debounce window swallows the second call.
    block_on(manager.prefetch_blockheight());
    assert_eq!(chain.block_fetches.get(), fetches_after_first);
}

#[test]
fn uninitialized_manager_refuses_reservations() {
    let chain = ChainMock::default();
    let client = Rc::new(NearRpcClient::new("https://rpc.example.com", chain).unwrap());
    let manager: NonceManager<ChainMock> = NonceManager::new(client);
    assert!(manager.reserve_nonces(1).is_err());
    assert!(!manager.is_initialized());
}
