use crate::errors::VrfWorkerError;
use base64ct::{Base64UrlUnpadded, Encoding};

// === BASE64 UTILITIES ===

pub fn base64_url_encode(bytes: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(bytes)
}

pub fn base64_url_decode(s: &str) -> Result<Vec<u8>, String> {
    Base64UrlUnpadded::decode_vec(s).map_err(|e| format!("Base64 decode error: {}", e))
}

pub fn parse_block_height(block_height: &str) -> Result<u64, VrfWorkerError> {
    block_height.parse().map_err(|_| {
        VrfWorkerError::BlockHeightParsingError(format!("Invalid block height: {}", block_height))
    })
}

/// Milliseconds since the Unix epoch. `Date::now()` in the browser, system
/// clock in native unit tests.
pub fn now_ms() -> f64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now()
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0)
    }
}
