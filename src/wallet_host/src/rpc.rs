//! Minimal NEAR JSON-RPC 2.0 client with multi-endpoint fallback. Only
//! `send_tx` retries; view calls fail fast. The HTTP edge sits behind
//! `RpcTransport` so the retry policy is exercised natively in tests.

use futures::future::LocalBoxFuture;
use log::{debug, warn};
use serde_json::{json, Value};

use crate::config::{
    SEND_TX_BACKOFF_BASE_MS, SEND_TX_BACKOFF_JITTER_MS, SEND_TX_MAX_ATTEMPTS,
};
use crate::utils::{base64_standard_encode, random_jitter_ms, sleep_ms};

/// One HTTP POST of a JSON body. Implementations: browser fetch (wasm) and
/// scripted mocks (tests).
pub trait RpcTransport {
    fn post_json(&self, url: String, body: Value) -> LocalBoxFuture<'static, Result<Value, String>>;
}

/// Transient-error predicate for `send_tx` retries. The single place that
/// branches on error message strings; tests pin its behavior.
pub fn is_transient_rpc_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("http 5")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("server error")
        || lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("unavailable")
        || lower.contains("bad gateway")
        || lower.contains("gateway timeout")
}

/// Backoff before retry attempt `n` (1-based): `base * 2^(n-1)`.
pub fn backoff_base_delay_ms(attempt: u32) -> u64 {
    SEND_TX_BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)))
}

/// Detect a stale-nonce rejection in an RPC error body.
pub fn is_invalid_nonce_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("invalid_nonce") || lower.contains("invalidnonce")
}

pub struct NearRpcClient<T: RpcTransport> {
    endpoints: Vec<String>,
    transport: T,
}

impl<T: RpcTransport> NearRpcClient<T> {
    /// `rpc_url` is a comma/whitespace-separated endpoint list, tried in
    /// order on failure.
    pub fn new(rpc_url: &str, transport: T) -> Result<Self, String> {
        let endpoints: Vec<String> = rpc_url
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        if endpoints.is_empty() {
            return Err("NEAR RPC URL cannot be empty".to_string());
        }

        Ok(Self {
            endpoints,
            transport,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// POST one JSON-RPC body, iterating endpoints in order until one
    /// answers. A success on anything but the first endpoint is logged.
    async fn execute(&self, body: Value) -> Result<Value, String> {
        let mut last_error: Option<String> = None;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            match self
                .transport
                .post_json(endpoint.clone(), body.clone())
                .await
            {
                Ok(result) => {
                    if index > 0 {
                        warn!("RPC call succeeded using fallback endpoint: {}", endpoint);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    debug!("RPC endpoint {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "RPC request failed".to_string()))
    }

    /// Run one query and unwrap the JSON-RPC `result`, surfacing
    /// `error.message` when the node rejects the call. View calls never
    /// retry.
    async fn query(&self, params: Value) -> Result<Value, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "wallet-host",
            "method": "query",
            "params": params,
        });
        let response = self.execute(body).await?;
        unwrap_rpc_result(response)
    }

    pub async fn view_access_key(
        &self,
        account_id: &str,
        public_key: &str,
    ) -> Result<Value, String> {
        self.query(json!({
            "request_type": "view_access_key",
            "finality": "final",
            "account_id": account_id,
            "public_key": public_key,
        }))
        .await
    }

    pub async fn view_access_key_list(&self, account_id: &str) -> Result<Value, String> {
        self.query(json!({
            "request_type": "view_access_key_list",
            "finality": "final",
            "account_id": account_id,
        }))
        .await
    }

    pub async fn view_account(&self, account_id: &str) -> Result<Value, String> {
        self.query(json!({
            "request_type": "view_account",
            "finality": "final",
            "account_id": account_id,
        }))
        .await
    }

    pub async fn block_final(&self) -> Result<Value, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "wallet-host",
            "method": "block",
            "params": { "finality": "final" },
        });
        let response = self.execute(body).await?;
        unwrap_rpc_result(response)
    }

    /// Call a view function. Args are JSON, base64-encoded on the wire; the
    /// byte-array result decodes to UTF-8 and parses as JSON, falling back
    /// to the quote-stripped string.
    pub async fn call_function(
        &self,
        contract_id: &str,
        method_name: &str,
        args: &Value,
    ) -> Result<Value, String> {
        let result = self
            .query(json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract_id,
                "method_name": method_name,
                "args_base64": base64_standard_encode(args.to_string().as_bytes()),
            }))
            .await?;

        let bytes: Vec<u8> = result
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or("Missing result bytes in call_function response")?
            .iter()
            .map(|v| v.as_u64().unwrap_or(0) as u8)
            .collect();

        let text = String::from_utf8(bytes)
            .map_err(|e| format!("call_function result is not UTF-8: {}", e))?;

        Ok(decode_call_function_text(&text))
    }

    /// Broadcast a signed transaction with the transient-error retry policy:
    /// up to `SEND_TX_MAX_ATTEMPTS` attempts, `200·2^(n-1)` ms backoff plus
    /// jitter. Non-retryable errors propagate immediately.
    pub async fn send_transaction(
        &self,
        signed_tx_base64: &str,
        wait_until: &str,
    ) -> Result<Value, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "wallet-host",
            "method": "send_tx",
            "params": {
                "signed_tx_base64": signed_tx_base64,
                "wait_until": wait_until,
            },
        });

        let mut attempt = 1u32;
        loop {
            match self.execute(body.clone()).await {
                Ok(response) => return unwrap_rpc_result(response),
                Err(e) => {
                    if attempt >= SEND_TX_MAX_ATTEMPTS || !is_transient_rpc_error(&e) {
                        return Err(e);
                    }
                    let delay =
                        backoff_base_delay_ms(attempt) + random_jitter_ms(SEND_TX_BACKOFF_JITTER_MS);
                    warn!(
                        "send_tx attempt {} failed ({}), retrying in {} ms",
                        attempt, e, delay
                    );
                    sleep_ms(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Unwrap `{result}` / surface `{error}` from a JSON-RPC response body.
fn unwrap_rpc_result(response: Value) -> Result<Value, String> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        let data = error
            .get("data")
            .map(|d| d.to_string())
            .unwrap_or_default();
        return Err(format!("{} {}", message, data).trim().to_string());
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| "Missing result in RPC response".to_string())
}

/// JSON-parse a view-function text result; fall back to stripping enclosing
/// quotes and returning the plain string.
fn decode_call_function_text(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let stripped = text.trim().trim_matches('"');
            Value::String(stripped.to_string())
        }
    }
}

// === BROWSER TRANSPORT ===

#[cfg(target_arch = "wasm32")]
pub use fetch_transport::FetchTransport;

#[cfg(target_arch = "wasm32")]
mod fetch_transport {
    use super::*;
    use futures::FutureExt;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use wasm_bindgen_futures::JsFuture;

    /// Browser fetch transport.
    pub struct FetchTransport;

    impl RpcTransport for FetchTransport {
        fn post_json(
            &self,
            url: String,
            body: Value,
        ) -> LocalBoxFuture<'static, Result<Value, String>> {
            async move {
                let global = js_sys::global();
                let fetch_val = js_sys::Reflect::get(&global, &JsValue::from_str("fetch"))
                    .map_err(|_| "fetch function not available".to_string())?;
                let fetch_fn: js_sys::Function = fetch_val
                    .dyn_into()
                    .map_err(|_| "fetch is not a function".to_string())?;

                let init = js_sys::Object::new();
                js_sys::Reflect::set(
                    &init,
                    &JsValue::from_str("method"),
                    &JsValue::from_str("POST"),
                )
                .map_err(|_| "Failed to set fetch init.method".to_string())?;
                let headers = js_sys::Object::new();
                js_sys::Reflect::set(
                    &headers,
                    &JsValue::from_str("Content-Type"),
                    &JsValue::from_str("application/json"),
                )
                .map_err(|_| "Failed to set fetch headers".to_string())?;
                js_sys::Reflect::set(&init, &JsValue::from_str("headers"), &headers)
                    .map_err(|_| "Failed to set fetch init.headers".to_string())?;
                js_sys::Reflect::set(
                    &init,
                    &JsValue::from_str("body"),
                    &JsValue::from_str(&body.to_string()),
                )
                .map_err(|_| "Failed to set fetch init.body".to_string())?;

                let promise_val = fetch_fn
                    .call2(&global, &JsValue::from_str(&url), &init)
                    .map_err(|e| format!("fetch call failed: {:?}", e))?;
                let promise: js_sys::Promise = promise_val
                    .dyn_into()
                    .map_err(|_| "fetch did not return a Promise".to_string())?;

                let resp_val = JsFuture::from(promise)
                    .await
                    .map_err(|e| format!("Fetch request failed: {:?}", e))?;

                let ok = js_sys::Reflect::get(&resp_val, &JsValue::from_str("ok"))
                    .ok()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let status = js_sys::Reflect::get(&resp_val, &JsValue::from_str("status"))
                    .ok()
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as u16;

                let text_fn = js_sys::Reflect::get(&resp_val, &JsValue::from_str("text"))
                    .map_err(|_| "Failed to read response.text".to_string())?;
                let text_fn: js_sys::Function = text_fn
                    .dyn_into()
                    .map_err(|_| "response.text is not a function".to_string())?;
                let text_promise: js_sys::Promise = text_fn
                    .call0(&resp_val)
                    .map_err(|e| format!("response.text() failed: {:?}", e))?
                    .dyn_into()
                    .map_err(|_| "response.text() did not return a Promise".to_string())?;
                let text_val = JsFuture::from(text_promise)
                    .await
                    .map_err(|e| format!("Failed to read response text: {:?}", e))?;
                let text = text_val.as_string().unwrap_or_default();

                if !ok {
                    return Err(format!("HTTP {}: {}", status, text));
                }

                serde_json::from_str(&text).map_err(|e| format!("Failed to parse JSON: {}", e))
            }
            .boxed_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Instant;

    /// Scripted transport: pops one canned response per call and records
    /// every request it saw.
    #[derive(Clone, Default)]
    struct MockTransport {
        script: Rc<RefCell<VecDeque<Result<Value, String>>>>,
        calls: Rc<RefCell<Vec<(String, Value)>>>,
    }

    impl MockTransport {
        fn push(&self, response: Result<Value, String>) {
            self.script.borrow_mut().push_back(response);
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl RpcTransport for MockTransport {
        fn post_json(
            &self,
            url: String,
            body: Value,
        ) -> LocalBoxFuture<'static, Result<Value, String>> {
            self.calls.borrow_mut().push((url, body));
            let response = self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err("mock script exhausted".to_string()));
            async move { response }.boxed_local()
        }
    }

    fn rpc_result(value: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": "wallet-host", "result": value })
    }

    #[test]
    fn transient_predicate_matches_spec_list() {
        for msg in [
            "HTTP 502: Bad Gateway",
            "request timeout",
            "Internal Server Error",
            "too many requests",
            "429",
            "service unavailable",
            "gateway timeout",
        ] {
            assert!(is_transient_rpc_error(msg), "should be transient: {}", msg);
        }

        for msg in [
            "InvalidTxError: ShardCongested",
            "HTTP 400: Bad Request",
            "parse error",
        ] {
            assert!(!is_transient_rpc_error(msg), "should be terminal: {}", msg);
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_base_delay_ms(1), 200);
        assert_eq!(backoff_base_delay_ms(2), 400);
        assert_eq!(backoff_base_delay_ms(3), 800);
    }

    #[test]
    fn send_tx_retries_transient_errors_then_succeeds() {
        let transport = MockTransport::default();
        transport.push(Err("HTTP 502: Bad Gateway".to_string()));
        transport.push(Err("HTTP 502: Bad Gateway".to_string()));
        transport.push(Ok(rpc_result(json!({ "final_execution_status": "EXECUTED" }))));

        let client = NearRpcClient::new("https://rpc.example.com", transport.clone()).unwrap();

        let started = Instant::now();
        let result = block_on(client.send_transaction("BASE64", "EXECUTED_OPTIMISTIC")).unwrap();
        let elapsed = started.elapsed().as_millis() as u64;

        assert_eq!(result["final_execution_status"], "EXECUTED");
        assert_eq!(transport.call_count(), 3);
        // Two backoffs: >= 200ms and >= 400ms.
        assert!(elapsed >= 600, "elapsed only {} ms", elapsed);
    }

    #[test]
    fn send_tx_does_not_retry_terminal_errors() {
        let transport = MockTransport::default();
        transport.push(Err("InvalidTxError: InvalidNonce".to_string()));

        let client = NearRpcClient::new("https://rpc.example.com", transport.clone()).unwrap();
        let err = block_on(client.send_transaction("BASE64", "FINAL")).unwrap_err();

        assert!(err.contains("InvalidNonce"));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn send_tx_gives_up_after_max_attempts() {
        let transport = MockTransport::default();
        for _ in 0..SEND_TX_MAX_ATTEMPTS {
            transport.push(Err("503 unavailable".to_string()));
        }

        let client = NearRpcClient::new("https://rpc.example.com", transport.clone()).unwrap();
        let err = block_on(client.send_transaction("BASE64", "FINAL")).unwrap_err();

        assert!(err.contains("503"));
        assert_eq!(transport.call_count(), SEND_TX_MAX_ATTEMPTS as usize);
    }

    #[test]
    fn view_calls_do_not_retry() {
        let transport = MockTransport::default();
        transport.push(Err("HTTP 502: Bad Gateway".to_string()));

        let client = NearRpcClient::new("https://rpc.example.com", transport.clone()).unwrap();
        let err = block_on(client.view_account("alice.testnet")).unwrap_err();

        assert!(err.contains("502"));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn endpoint_fallback_tries_next_on_failure() {
        let transport = MockTransport::default();
        transport.push(Err("connection refused".to_string()));
        transport.push(Ok(rpc_result(json!({ "amount": "10" }))));

        let client = NearRpcClient::new(
            "https://a.example.com, https://b.example.com",
            transport.clone(),
        )
        .unwrap();
        assert_eq!(client.endpoints().len(), 2);

        let result = block_on(client.view_account("alice.testnet")).unwrap();
        assert_eq!(result["amount"], "10");

        let calls = transport.calls.borrow();
        assert_eq!(calls[0].0, "https://a.example.com");
        assert_eq!(calls[1].0, "https://b.example.com");
    }

    #[test]
    fn rpc_level_errors_surface_the_message() {
        let transport = MockTransport::default();
        transport.push(Ok(json!({
            "jsonrpc": "2.0",
            "id": "wallet-host",
            "error": { "message": "UNKNOWN_ACCOUNT", "data": "alice.testnet" },
        })));

        let client = NearRpcClient::new("https://rpc.example.com", transport).unwrap();
        let err = block_on(client.view_account("alice.testnet")).unwrap_err();
        assert!(err.contains("UNKNOWN_ACCOUNT"));
    }

    #[test]
    fn call_function_decodes_json_result_bytes() {
        let transport = MockTransport::default();
        let payload = br#"{"greeting":"hello"}"#;
        let bytes: Vec<Value> = payload.iter().map(|b| json!(*b)).collect();
        transport.push(Ok(rpc_result(json!({ "result": bytes, "logs": [] }))));

        let client = NearRpcClient::new("https://rpc.example.com", transport).unwrap();
        let result =
            block_on(client.call_function("contract.testnet", "get_greeting", &json!({}))).unwrap();
        assert_eq!(result["greeting"], "hello");
    }

    #[test]
    fn call_function_falls_back_to_quote_stripped_string() {
        assert_eq!(
            decode_call_function_text("\"plain\""),
            Value::String("plain".to_string())
        );
        // Note: valid JSON strings parse as JSON first.
        assert_eq!(decode_call_function_text("17"), json!(17));
    }

    #[test]
    fn invalid_nonce_detection() {
        assert!(is_invalid_nonce_error("InvalidTxError: InvalidNonce { .. }"));
        assert!(is_invalid_nonce_error("INVALID_NONCE"));
        assert!(!is_invalid_nonce_error("InvalidSignature"));
    }
}
