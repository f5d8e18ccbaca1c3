//! Base64 helpers shared across the signer worker.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};

// === BASE64URL (URL-SAFE, NO PADDING) ===

/// Decode a base64url string. `Base64UrlUnpadded` matches what WebAuthn
/// produces for credential fields.
pub fn base64_url_decode(input: &str) -> Result<Vec<u8>, String> {
    Base64UrlUnpadded::decode_vec(input).map_err(|e| format!("Base64 decode error: {}", e))
}

pub fn base64_url_encode(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(data)
}

// === BASE64 STANDARD (FOR JSON/HTTP OPERATIONS) ===

pub fn base64_standard_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

pub fn base64_standard_decode(input: &str) -> Result<Vec<u8>, String> {
    Base64::decode_vec(input).map_err(|e| format!("Base64 decode error: {}", e))
}
