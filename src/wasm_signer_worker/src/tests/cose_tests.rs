use ciborium::Value as CborValue;

use crate::cose::{
    extract_cose_public_key_from_attestation, parse_attestation_object, parse_authenticator_data,
};
use crate::encoders::base64_url_encode;

/// Minimal authData: rpIdHash(32) + flags(1) + counter(4) + aaguid(16)
/// + credIdLen(2) + credId + COSE key bytes.
fn synth_auth_data(cred_id: &[u8], cose_key: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0xAA; 32]); // rpIdHash
    data.push(0x41); // UP | AT
    data.extend_from_slice(&[0, 0, 0, 1]); // counter
    data.extend_from_slice(&[0xBB; 16]); // AAGUID
    data.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
    data.extend_from_slice(cred_id);
    data.extend_from_slice(cose_key);
    data
}

fn synth_attestation_object(auth_data: &[u8]) -> Vec<u8> {
    let map = CborValue::Map(vec![
        (
            CborValue::Text("fmt".to_string()),
            CborValue::Text("none".to_string()),
        ),
        (
            CborValue::Text("attStmt".to_string()),
            CborValue::Map(vec![]),
        ),
        (
            CborValue::Text("authData".to_string()),
            CborValue::Bytes(auth_data.to_vec()),
        ),
    ]);
    let mut out = Vec::new();
    ciborium::into_writer(&map, &mut out).unwrap();
    out
}

#[test]
fn extracts_cose_key_from_synthetic_attestation() {
    let cose_key = [0xC0u8; 44];
    let auth_data = synth_auth_data(&[0x01, 0x02, 0x03, 0x04], &cose_key);
    let attestation = synth_attestation_object(&auth_data);

    let extracted =
        extract_cose_public_key_from_attestation(&base64_url_encode(&attestation)).unwrap();
    assert_eq!(extracted, cose_key.to_vec());
}

#[test]
fn attestation_object_must_contain_auth_data() {
    let map = CborValue::Map(vec![(
        CborValue::Text("fmt".to_string()),
        CborValue::Text("none".to_string()),
    )]);
    let mut out = Vec::new();
    ciborium::into_writer(&map, &mut out).unwrap();

    let err = parse_attestation_object(&out).unwrap_err();
    assert!(err.contains("authData"));
}

#[test]
fn auth_data_without_at_flag_is_rejected() {
    let mut auth_data = synth_auth_data(&[1, 2, 3], &[0xC0; 8]);
    auth_data[32] = 0x01; // UP only, no attested credential data
    let err = parse_authenticator_data(&auth_data).unwrap_err();
    assert!(err.contains("attested credential"));
}

#[test]
fn truncated_auth_data_is_rejected() {
    assert!(parse_authenticator_data(&[0u8; 20]).is_err());

    // Valid header but credential ID length pointing past the end
    let mut auth_data = synth_auth_data(&[1, 2, 3, 4], &[]);
    let len_offset = 37 + 16;
    auth_data[len_offset] = 0xFF;
    auth_data[len_offset + 1] = 0xFF;
    assert!(parse_authenticator_data(&auth_data).is_err());
}

#[test]
fn invalid_base64_attestation_is_rejected() {
    assert!(extract_cose_public_key_from_attestation("!!!not-base64!!!").is_err());
}
