/// Configuration constants for the signer worker.

// === LOGGING ===

/// Log level for the signer worker.
pub const CURRENT_LOG_LEVEL: log::Level = log::Level::Info;

// === KEY DERIVATION ===

/// Account-scoped salt for the ChaCha20 key derived from PRF output `first`.
pub fn chacha20_salt_for_account(account_id: &str) -> String {
    format!("chacha20-salt:{}", account_id)
}

/// Account-scoped salt for the Ed25519 seed derived from PRF output `second`.
pub fn ed25519_salt_for_account(account_id: &str) -> String {
    format!("ed25519-salt:{}", account_id)
}

/// HKDF info string for ChaCha20 key expansion.
pub const CHACHA20_HKDF_KEY_INFO: &str = "chacha20-encryption-key-v1";

/// HKDF info string for Ed25519 seed expansion.
pub const ED25519_HKDF_KEY_INFO: &str = "ed25519-signing-key-v1";

// === ENCRYPTION PARAMETERS ===

/// ChaCha20Poly1305 key size in bytes (256 bits)
pub const CHACHA20_KEY_SIZE: usize = 32;

/// ChaCha20Poly1305 nonce size in bytes (96 bits)
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Ed25519 seed size in bytes
pub const ED25519_PRIVATE_KEY_SIZE: usize = 32;

// === NEP-413 ===

/// NEP-413 message prefix: 2^31 + 413, little-endian on the wire.
pub const NEP413_PREFIX: u32 = 2_147_484_061;

// === ERROR MESSAGES ===

pub const ERROR_INVALID_KEY_SIZE: &str = "Invalid ChaCha20 key size (expected 32 bytes)";

// === CONTRACT METHODS ===

/// View method checking whether an account/credential pair may register.
pub const CHECK_CAN_REGISTER_USER_METHOD: &str = "check_can_register_user";
