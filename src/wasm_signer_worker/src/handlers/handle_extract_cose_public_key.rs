// ******************************************************************************
// *                                                                            *
// *                  HANDLER: EXTRACT COSE PUBLIC KEY                          *
// *                                                                            *
// ******************************************************************************

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtractCoseRequest {
    /// base64url attestation object from a registration ceremony
    pub attestation_object_base64url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoseExtractionResult {
    pub cose_public_key_bytes: Vec<u8>,
}

/// **Handles:** `WorkerRequestType::ExtractCosePublicKey`
///
/// Pulls the COSE credential public key out of an attestation object. The
/// wallet host stores it on the authenticator record so later flows (login
/// allowCredentials, recovery) can identify the authenticator.
pub async fn handle_extract_cose_public_key(
    request: ExtractCoseRequest,
) -> Result<CoseExtractionResult, String> {
    let cose_public_key_bytes =
        crate::cose::extract_cose_public_key_from_attestation(&request.attestation_object_base64url)?;

    Ok(CoseExtractionResult {
        cose_public_key_bytes,
    })
}
