use serde::{Deserialize, Serialize};

// === WEBAUTHN CREDENTIAL TYPES ===
// Credential shapes match the W3C serialization the wallet host produces
// (base64url strings, never decoded byte arrays).

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnAuthenticationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnAuthenticationCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: WebAuthnAuthenticationResponse,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "type")]
    pub auth_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnRegistrationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    pub transports: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnRegistrationCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: WebAuthnRegistrationResponse,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "type")]
    pub reg_type: String,
}

// === PRF EXTENSION RESULTS ===

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PrfResults {
    /// PRF eval over the ChaCha20 salt (encryption key material)
    pub first: Option<String>,
    /// PRF eval over the Ed25519 salt (signing key material)
    pub second: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PrfOutputs {
    #[serde(default)]
    pub results: PrfResults,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientExtensionResults {
    #[serde(default)]
    pub prf: PrfOutputs,
}

/// Authentication credential as serialized by the wallet host, including
/// client extension outputs (PRF).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SerializedCredential {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub authenticator_attachment: Option<String>,
    pub response: WebAuthnAuthenticationResponse,
    #[serde(default)]
    pub client_extension_results: ClientExtensionResults,
}

/// Registration credential as serialized by the wallet host.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRegistrationCredential {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub authenticator_attachment: Option<String>,
    pub response: WebAuthnRegistrationResponse,
    #[serde(default)]
    pub client_extension_results: ClientExtensionResults,
}

impl From<&SerializedRegistrationCredential> for WebAuthnRegistrationCredential {
    fn from(credential: &SerializedRegistrationCredential) -> Self {
        WebAuthnRegistrationCredential {
            id: credential.id.clone(),
            raw_id: credential.raw_id.clone(),
            response: credential.response.clone(),
            authenticator_attachment: credential.authenticator_attachment.clone(),
            reg_type: credential.credential_type.clone(),
        }
    }
}

impl From<&SerializedCredential> for WebAuthnAuthenticationCredential {
    fn from(credential: &SerializedCredential) -> Self {
        WebAuthnAuthenticationCredential {
            id: credential.id.clone(),
            raw_id: credential.raw_id.clone(),
            response: credential.response.clone(),
            authenticator_attachment: credential.authenticator_attachment.clone(),
            auth_type: credential.credential_type.clone(),
        }
    }
}
