use serde::{Deserialize, Serialize};

pub mod http;
pub mod worker_messages;

pub use worker_messages::*;

// === TYPE DEFINITIONS ===

/// Plaintext VRF keypair blob as stored inside the encrypted envelope.
#[derive(Serialize, Deserialize)]
pub struct VrfKeypairData {
    /// Bincode-serialized ECVRFKeyPair (secret and public halves)
    pub keypair_bytes: Vec<u8>,
    /// Base64url-encoded public key, kept for cheap comparisons
    pub public_key_b64u: String,
}

/// VRF keypair at rest: AEAD ciphertext plus its nonce.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVrfKeypair {
    pub ciphertext_b64u: String,
    pub chacha20_nonce_b64u: String,
}

/// Server-assisted variant: the VRF ciphertext plus the server-locked KEK.
/// Present only for accounts registered with the Shamir 3-pass relay.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerEncryptedVrfKeypair {
    pub ciphertext_vrf_b64u: String,
    #[serde(rename = "kek_s_b64u")]
    pub kek_s_b64u: String,
    pub vrf_public_key: String,
    #[serde(default)]
    pub server_key_id: Option<String>,
}

/// Inputs bound into a VRF challenge.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VrfChallengeInput {
    pub user_id: String,
    pub rp_id: String,
    pub block_height: String,
    pub block_hash: String,
}

/// A generated VRF challenge. The WebAuthn challenge is the first 32 bytes
/// of `vrf_output`; the proof and public key let a verifier re-check it.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VrfChallenge {
    pub vrf_input: String,
    pub vrf_output: String,
    pub vrf_proof: String,
    pub vrf_public_key: String,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: String,
    pub block_hash: String,
}

/// Reply shape for CHECK_VRF_STATUS.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VrfStatus {
    pub active: bool,
    pub near_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration_ms: Option<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct GenerateVrfKeypairBootstrapResponse {
    pub vrf_public_key: String,
    pub vrf_challenge: Option<VrfChallenge>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptedVrfKeypairResponse {
    pub vrf_public_key: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeriveVrfKeypairFromPrfResponse {
    pub vrf_public_key: String,
    pub vrf_challenge: Option<VrfChallenge>,
    pub encrypted_vrf_keypair: Option<EncryptedVrfKeypair>,
    pub server_encrypted_vrf_keypair: Option<ServerEncryptedVrfKeypair>,
    pub success: bool,
}
