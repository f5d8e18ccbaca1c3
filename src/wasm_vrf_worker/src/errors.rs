use serde::{Deserialize, Serialize};
use std::fmt;
use wasm_bindgen::JsValue;

/// Error types for the VRF worker. Every failure that crosses the worker
/// boundary is reduced to a string via `Display`, so variants carry enough
/// context to debug without leaking key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VrfWorkerError {
    /// No VRF keypair is currently loaded in memory
    NoVrfKeypair,

    /// VRF keypair is not unlocked (no active session)
    VrfNotUnlocked,

    /// PRF output is empty or malformed
    InvalidPrfOutput(String),

    /// HKDF key derivation failed
    HkdfDerivationFailed,

    /// AEAD encryption/decryption errors
    AeadError(AeadError),

    /// Wrong nonce length for ChaCha20Poly1305
    InvalidNonceLength { expected: usize, actual: usize },

    /// Serialization/deserialization errors
    SerializationError(SerializationError),

    /// Public key mismatch during verification
    PublicKeyMismatch { expected: String, actual: String },

    /// Worker message parsing errors
    MessageParsingError(String),

    /// Missing required data in a worker message
    MissingRequiredData(String),

    /// Invalid worker message format
    InvalidMessageFormat(String),

    /// Block height string could not be parsed
    BlockHeightParsingError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AeadError {
    EncryptionFailed(String),
    DecryptionFailed(String),
    NonceGenerationFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SerializationError {
    VrfPublicKeySerialization(String),
    VrfKeypairSerialization(String),
    VrfKeypairDeserialization(String),
    KeypairDataSerialization(String),
    KeypairDataDeserialization(String),
    Base64Error(String),
}

impl fmt::Display for VrfWorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VrfWorkerError::NoVrfKeypair => {
                write!(f, "No VRF keypair in memory - generate or unlock one first")
            }
            VrfWorkerError::VrfNotUnlocked => {
                write!(f, "VRF keypair not unlocked - please login first")
            }
            VrfWorkerError::InvalidPrfOutput(msg) => write!(f, "Invalid PRF output: {}", msg),
            VrfWorkerError::HkdfDerivationFailed => write!(f, "HKDF key derivation failed"),
            VrfWorkerError::AeadError(err) => write!(f, "AEAD operation failed: {}", err),
            VrfWorkerError::InvalidNonceLength { expected, actual } => write!(
                f,
                "Invalid ChaCha20 nonce length: expected {} bytes, got {} bytes",
                expected, actual
            ),
            VrfWorkerError::SerializationError(err) => write!(f, "Serialization error: {}", err),
            VrfWorkerError::PublicKeyMismatch { expected, actual } => write!(
                f,
                "VRF public key mismatch - expected: {}..., actual: {}...",
                &expected[..20.min(expected.len())],
                &actual[..20.min(actual.len())]
            ),
            VrfWorkerError::MessageParsingError(msg) => {
                write!(f, "Message parsing error: {}", msg)
            }
            VrfWorkerError::MissingRequiredData(field) => {
                write!(f, "Missing required data: {}", field)
            }
            VrfWorkerError::InvalidMessageFormat(msg) => {
                write!(f, "Invalid message format: {}", msg)
            }
            VrfWorkerError::BlockHeightParsingError(msg) => {
                write!(f, "Block height parsing error: {}", msg)
            }
        }
    }
}

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadError::EncryptionFailed(msg) => write!(f, "Encryption failed: {}", msg),
            AeadError::DecryptionFailed(msg) => {
                write!(f, "Failed to decrypt VRF keypair: {}", msg)
            }
            AeadError::NonceGenerationFailed(msg) => {
                write!(f, "Failed to generate secure nonce: {}", msg)
            }
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::VrfPublicKeySerialization(msg) => {
                write!(f, "Failed to serialize VRF public key: {}", msg)
            }
            SerializationError::VrfKeypairSerialization(msg) => {
                write!(f, "Failed to serialize VRF keypair: {}", msg)
            }
            SerializationError::VrfKeypairDeserialization(msg) => {
                write!(f, "Failed to deserialize VRF keypair: {}", msg)
            }
            SerializationError::KeypairDataSerialization(msg) => {
                write!(f, "Failed to serialize VRF keypair data: {}", msg)
            }
            SerializationError::KeypairDataDeserialization(msg) => {
                write!(f, "Failed to deserialize VRF keypair data: {}", msg)
            }
            SerializationError::Base64Error(msg) => {
                write!(f, "Base64 encoding/decoding error: {}", msg)
            }
        }
    }
}

impl std::error::Error for VrfWorkerError {}
impl std::error::Error for AeadError {}
impl std::error::Error for SerializationError {}

impl From<bincode::Error> for VrfWorkerError {
    fn from(err: bincode::Error) -> Self {
        VrfWorkerError::SerializationError(SerializationError::VrfKeypairSerialization(
            err.to_string(),
        ))
    }
}

impl From<serde_json::Error> for VrfWorkerError {
    fn from(err: serde_json::Error) -> Self {
        VrfWorkerError::MessageParsingError(err.to_string())
    }
}

impl From<hkdf::InvalidLength> for VrfWorkerError {
    fn from(_: hkdf::InvalidLength) -> Self {
        VrfWorkerError::HkdfDerivationFailed
    }
}

impl From<VrfWorkerError> for JsValue {
    fn from(err: VrfWorkerError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

pub type VrfResult<T> = Result<T, VrfWorkerError>;

impl VrfWorkerError {
    pub fn empty_prf_output() -> Self {
        VrfWorkerError::InvalidPrfOutput("PRF output cannot be empty".to_string())
    }

    pub fn invalid_format(msg: &str) -> Self {
        VrfWorkerError::InvalidMessageFormat(msg.to_string())
    }

    pub fn public_key_mismatch(expected: &str, actual: &str) -> Self {
        VrfWorkerError::PublicKeyMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
