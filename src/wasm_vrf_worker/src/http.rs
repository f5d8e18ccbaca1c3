#[cfg(target_arch = "wasm32")]
use crate::fetch::{
    fetch_json_post, response_ok, response_status, response_status_text, response_text,
};
#[cfg(target_arch = "wasm32")]
use crate::types::http::{
    ShamirApplyServerLockHttpRequest, ShamirApplyServerLockHttpResponse,
    ShamirRemoveServerLockHttpRequest, ShamirRemoveServerLockHttpResponse,
};
#[cfg(target_arch = "wasm32")]
use log::debug;

/// Resolve a relay route against the configured base URL. Absolute routes
/// are used as-is.
pub(crate) fn resolve_relay_url(relay_url: &str, route: &str) -> String {
    let route = route.trim();
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_string();
    }
    format!(
        "{}/{}",
        relay_url.trim().trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}

/// POST Shamir 3-pass apply-server-lock.
/// Request: `{ kek_c_b64u }`; response: `{ kek_cs_b64u, key_id? }`.
#[cfg(target_arch = "wasm32")]
pub(crate) async fn post_apply_server_lock(
    endpoint_url: &str,
    kek_c_b64u: &str,
) -> Result<ShamirApplyServerLockHttpResponse, String> {
    debug!("Shamir3Pass apply-server-lock: {}", endpoint_url);

    let body = serde_json::to_string(&ShamirApplyServerLockHttpRequest {
        kek_c_b64u: kek_c_b64u.to_string(),
    })
    .map_err(|e| format!("Failed to serialize apply-server-lock body: {}", e))?;

    let resp = fetch_json_post(endpoint_url, &body).await?;

    if !response_ok(&resp)? {
        return Err(format!(
            "HTTP error: {} {}",
            response_status(&resp)?,
            response_status_text(&resp)?
        ));
    }

    let text = response_text(&resp).await?;
    ShamirApplyServerLockHttpResponse::from_str(&text)
}

/// POST Shamir 3-pass remove-server-lock.
/// Request: `{ kek_cs_b64u, key_id }`; response: `{ kek_c_b64u }`.
#[cfg(target_arch = "wasm32")]
pub(crate) async fn post_remove_server_lock(
    endpoint_url: &str,
    kek_cs_b64u: &str,
    key_id: String,
) -> Result<ShamirRemoveServerLockHttpResponse, String> {
    debug!("Shamir3Pass remove-server-lock: {}", endpoint_url);

    let body = serde_json::to_string(&ShamirRemoveServerLockHttpRequest {
        kek_cs_b64u: kek_cs_b64u.to_string(),
        key_id,
    })
    .map_err(|e| format!("Failed to serialize remove-server-lock body: {}", e))?;

    let resp = fetch_json_post(endpoint_url, &body).await?;

    if !response_ok(&resp)? {
        return Err(format!(
            "HTTP error: {} {}",
            response_status(&resp)?,
            response_status_text(&resp)?
        ));
    }

    let text = response_text(&resp).await?;
    ShamirRemoveServerLockHttpResponse::from_str(&text)
}

// Fetch is browser-only; native builds (unit tests) get a stub so callers
// can still exercise their error paths.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn post_apply_server_lock(
    _endpoint_url: &str,
    _kek_c_b64u: &str,
) -> Result<crate::types::http::ShamirApplyServerLockHttpResponse, String> {
    Err("fetch is not available outside the browser".to_string())
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn post_remove_server_lock(
    _endpoint_url: &str,
    _kek_cs_b64u: &str,
    _key_id: String,
) -> Result<crate::types::http::ShamirRemoveServerLockHttpResponse, String> {
    Err("fetch is not available outside the browser".to_string())
}
