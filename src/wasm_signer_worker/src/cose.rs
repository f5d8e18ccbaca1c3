use ciborium::Value as CborValue;
use log::debug;

use crate::encoders::base64_url_decode;

/// Parse a WebAuthn attestation object and extract its authData field.
pub fn parse_attestation_object(attestation_object_bytes: &[u8]) -> Result<Vec<u8>, String> {
    let cbor_value: CborValue = ciborium::from_reader(attestation_object_bytes)
        .map_err(|e| format!("Failed to parse CBOR: {}", e))?;

    if let CborValue::Map(map) = cbor_value {
        for (key, value) in map.iter() {
            if let CborValue::Text(key_str) = key {
                if key_str == "authData" {
                    if let CborValue::Bytes(auth_data_bytes) = value {
                        return Ok(auth_data_bytes.clone());
                    }
                }
            }
        }
        Err("authData not found in attestation object".to_string())
    } else {
        Err("Attestation object is not a CBOR map".to_string())
    }
}

/// Extract the COSE credential public key from authenticator data.
pub fn parse_authenticator_data(auth_data_bytes: &[u8]) -> Result<Vec<u8>, String> {
    if auth_data_bytes.len() < 37 {
        return Err("Authenticator data too short".to_string());
    }

    let flags = auth_data_bytes[32];

    // AT flag (bit 6): attested credential data present
    if (flags & 0x40) == 0 {
        return Err("No attested credential data present".to_string());
    }

    let mut offset = 37; // rpIdHash(32) + flags(1) + counter(4)

    if auth_data_bytes.len() < offset + 16 {
        return Err("Authenticator data too short for AAGUID".to_string());
    }
    offset += 16;

    if auth_data_bytes.len() < offset + 2 {
        return Err("Authenticator data too short for credential ID length".to_string());
    }
    let cred_id_length =
        u16::from_be_bytes([auth_data_bytes[offset], auth_data_bytes[offset + 1]]) as usize;
    offset += 2;

    if auth_data_bytes.len() < offset + cred_id_length {
        return Err("Authenticator data too short for credential ID".to_string());
    }
    offset += cred_id_length;

    // The remainder is the COSE-encoded credential public key
    Ok(auth_data_bytes[offset..].to_vec())
}

/// Extract the COSE public key from a base64url attestation object.
pub fn extract_cose_public_key_from_attestation(
    attestation_object_b64u: &str,
) -> Result<Vec<u8>, String> {
    let attestation_object_bytes = base64_url_decode(attestation_object_b64u)
        .map_err(|e| format!("Failed to decode attestation object: {:?}", e))?;

    let auth_data_bytes = parse_attestation_object(&attestation_object_bytes)?;
    let cose_public_key_bytes = parse_authenticator_data(&auth_data_bytes)?;

    debug!(
        "Extracted COSE public key ({} bytes)",
        cose_public_key_bytes.len()
    );
    Ok(cose_public_key_bytes)
}
