pub mod deserializers;
pub mod handlers;
pub mod near;
pub mod progress;
pub mod webauthn;
pub mod worker_messages;

pub use handlers::*;
pub use near::*;
pub use webauthn::*;
pub use worker_messages::*;

use serde::{Deserialize, Serialize};

/// Result of encrypting data under a PRF-derived ChaCha20 key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDataChaCha20 {
    pub encrypted_near_key_data_b64u: String,
    pub chacha20_nonce_b64u: String,
}
