/// Configuration constants for the VRF worker.

// === LOGGING ===

/// Log level for the VRF worker. Change and recompile to adjust verbosity.
pub const CURRENT_LOG_LEVEL: log::Level = log::Level::Info;

// === CRYPTOGRAPHIC CONSTANTS ===

/// Domain separator mixed into every VRF challenge input so challenges cannot
/// be replayed across contexts.
pub const VRF_DOMAIN_SEPARATOR: &[u8] = b"passlock_vrf_challenge_v1";

/// HKDF info string for the ChaCha20 key wrapping the VRF keypair at rest.
pub const HKDF_CHACHA20_KEY_INFO: &[u8] = b"vrf-chacha20-key";

/// HKDF info string for deriving deterministic VRF seed material from PRF output.
pub const HKDF_VRF_KEYPAIR_INFO: &[u8] = b"passlock:v1:vrf-sk";

/// HKDF info string for deriving the AEAD key from a Shamir 3-pass KEK.
pub const SHAMIR_AEAD_HKDF_INFO: &[u8] = b"passlock-shamir3pass-kek-to-aead-key-v1";

// === ENCRYPTION PARAMETERS ===

/// ChaCha20Poly1305 key size in bytes (256 bits)
pub const CHACHA20_KEY_SIZE: usize = 32;

/// ChaCha20Poly1305 nonce size in bytes (96 bits)
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// VRF seed size in bytes for deterministic generation
pub const VRF_SEED_SIZE: usize = 32;

// === SHAMIR 3-PASS ===

/// Minimum prime size in bits accepted for a caller-configured modulus.
pub const SHAMIR_MIN_PRIME_BITS: usize = 256;

/// Maximum rejection-sampling attempts when drawing a random exponent.
pub const SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS: u32 = 10;

/// Extra bytes drawn per sampling attempt to reduce modular bias.
pub const SHAMIR_RANDOM_BYTES_OVERHEAD: usize = 64;

/// Default Shamir 3-pass prime (base64url, big-endian).
pub const DEFAULT_SHAMIR_P_B64U: &str = "3N5w46AIGjGT2v5Vua_TMD5Ywfa9U2F7-WzW8SNDsIM";

/// Number of characters shown when truncating keys/hashes in logs.
pub const DISPLAY_TRUNCATE_LENGTH: usize = 20;
