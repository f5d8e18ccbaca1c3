// Native tests for the VRF worker: session lifecycle, challenge generation,
// encrypt/unlock round trips, and message dispatch.

use crate::errors::VrfWorkerError;
use crate::manager::VrfSessionManager;
use crate::types::{VrfChallengeInput, VrfWorkerMessage, VrfWorkerResponse};
use crate::utils::{base64_url_decode, base64_url_encode};
use futures::executor::block_on;
use std::cell::RefCell;
use std::rc::Rc;

fn test_prf_output() -> Vec<u8> {
    (0..32).map(|i| (i as u8).wrapping_add(42)).collect()
}

fn test_account() -> String {
    "alice.testnet".to_string()
}

fn test_challenge_input() -> VrfChallengeInput {
    VrfChallengeInput {
        user_id: test_account(),
        rp_id: "example.localhost".to_string(),
        block_height: "123456789".to_string(),
        block_hash: bs58::encode([7u8; 32]).into_string(),
    }
}

#[test]
fn status_is_inactive_before_any_unlock() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let status = mgr.status();
    assert!(!status.active);
    assert!(status.near_account_id.is_none());
    assert!(status.session_duration_ms.is_none());
}

#[test]
fn bootstrap_installs_session_bound_to_account() {
    let mut mgr = VrfSessionManager::new(None, None, None, None);
    let response = mgr
        .generate_keypair_bootstrap(test_account(), Some(test_challenge_input()))
        .unwrap();

    assert!(!response.vrf_public_key.is_empty());
    assert!(response.vrf_challenge.is_some());

    let status = mgr.status();
    assert!(status.active);
    assert_eq!(status.near_account_id.as_deref(), Some("alice.testnet"));
}

#[test]
fn challenge_requires_unlocked_session() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let err = mgr.generate_challenge(test_challenge_input()).unwrap_err();
    assert!(matches!(err, VrfWorkerError::VrfNotUnlocked));
}

#[test]
fn challenge_output_has_32_byte_webauthn_prefix() {
    let mut mgr = VrfSessionManager::new(None, None, None, None);
    mgr.generate_keypair_bootstrap(test_account(), None).unwrap();

    let challenge = mgr.generate_challenge(test_challenge_input()).unwrap();
    let output = base64_url_decode(&challenge.vrf_output).unwrap();
    assert!(output.len() >= 32, "vrf output too short: {}", output.len());

    let input = base64_url_decode(&challenge.vrf_input).unwrap();
    assert_eq!(input.len(), 32, "vrf input must be a sha-256 digest");
}

#[test]
fn derive_then_unlock_round_trip_restores_same_public_key() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let prf = test_prf_output();

    let (response, _keypair) = mgr
        .derive_keypair_from_prf(&prf, "alice.testnet", None)
        .unwrap();
    let encrypted = response.encrypted_vrf_keypair.unwrap();

    let mut mgr2 = VrfSessionManager::new(None, None, None, None);
    mgr2.unlock_keypair(test_account(), encrypted, &prf).unwrap();

    let status = mgr2.status();
    assert!(status.active);
    assert_eq!(status.near_account_id.as_deref(), Some("alice.testnet"));

    // Deterministic: deriving again yields the same public key.
    let (response2, _) = mgr
        .derive_keypair_from_prf(&prf, "alice.testnet", None)
        .unwrap();
    assert_eq!(response.vrf_public_key, response2.vrf_public_key);
}

#[test]
fn unlock_with_wrong_prf_fails() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let prf = test_prf_output();

    let (response, _) = mgr
        .derive_keypair_from_prf(&prf, "alice.testnet", None)
        .unwrap();
    let encrypted = response.encrypted_vrf_keypair.unwrap();

    let mut mgr2 = VrfSessionManager::new(None, None, None, None);
    let wrong_prf = vec![0u8; 32];
    let err = mgr2
        .unlock_keypair(test_account(), encrypted, &wrong_prf)
        .unwrap_err();
    assert!(matches!(err, VrfWorkerError::AeadError(_)));
}

#[test]
fn derived_keypairs_differ_across_accounts() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let prf = test_prf_output();

    let (a, _) = mgr.derive_keypair_from_prf(&prf, "alice.testnet", None).unwrap();
    let (b, _) = mgr.derive_keypair_from_prf(&prf, "bob.testnet", None).unwrap();
    assert_ne!(a.vrf_public_key, b.vrf_public_key);
}

#[test]
fn encrypt_in_memory_keypair_verifies_public_key() {
    let mut mgr = VrfSessionManager::new(None, None, None, None);
    let bootstrap = mgr
        .generate_keypair_bootstrap(test_account(), None)
        .unwrap();
    let prf = test_prf_output();

    // Matching public key encrypts and the result unlocks elsewhere.
    let response = mgr
        .encrypt_keypair_with_prf(&bootstrap.vrf_public_key, &prf)
        .unwrap();
    assert_eq!(response.vrf_public_key, bootstrap.vrf_public_key);

    let mut mgr2 = VrfSessionManager::new(None, None, None, None);
    mgr2.unlock_keypair(test_account(), response.encrypted_vrf_keypair, &prf)
        .unwrap();
    assert!(mgr2.status().active);

    // A stale expected key is rejected before anything is encrypted.
    let err = mgr
        .encrypt_keypair_with_prf("bm90LXRoZS1rZXk", &prf)
        .unwrap_err();
    assert!(matches!(err, VrfWorkerError::PublicKeyMismatch { .. }));
}

#[test]
fn logout_clears_keypair_and_session() {
    let mut mgr = VrfSessionManager::new(None, None, None, None);
    mgr.generate_keypair_bootstrap(test_account(), None).unwrap();
    assert!(mgr.status().active);

    mgr.logout().unwrap();

    let status = mgr.status();
    assert!(!status.active);
    assert!(status.near_account_id.is_none());
    assert!(mgr.vrf_keypair.is_none());
}

#[test]
fn empty_prf_output_is_rejected() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let err = mgr
        .derive_keypair_from_prf(&[], "alice.testnet", None)
        .unwrap_err();
    assert!(matches!(err, VrfWorkerError::InvalidPrfOutput(_)));
}

#[test]
fn challenge_rejects_bad_block_height() {
    let mut mgr = VrfSessionManager::new(None, None, None, None);
    mgr.generate_keypair_bootstrap(test_account(), None).unwrap();

    let mut input = test_challenge_input();
    input.block_height = "not-a-number".to_string();
    let err = mgr.generate_challenge(input).unwrap_err();
    assert!(matches!(err, VrfWorkerError::BlockHeightParsingError(_)));
}

// === DISPATCH ===

fn dispatch(message: VrfWorkerMessage) -> VrfWorkerResponse {
    let manager = Rc::new(RefCell::new(VrfSessionManager::new(None, None, None, None)));
    block_on(crate::dispatch_message(manager, message))
}

#[test]
fn dispatch_rejects_unknown_tag_but_keeps_id() {
    let response = dispatch(VrfWorkerMessage {
        msg_type: "NOT_A_REAL_TAG".to_string(),
        id: Some("msg-1".to_string()),
        payload: None,
    });
    assert!(!response.success);
    assert_eq!(response.id.as_deref(), Some("msg-1"));
    assert!(response.error.unwrap().contains("NOT_A_REAL_TAG"));
}

#[test]
fn dispatch_ping_succeeds() {
    let response = dispatch(VrfWorkerMessage {
        msg_type: "PING".to_string(),
        id: Some("msg-2".to_string()),
        payload: None,
    });
    assert!(response.success);
    assert_eq!(response.id.as_deref(), Some("msg-2"));
}

#[test]
fn dispatch_rejects_missing_payload() {
    let response = dispatch(VrfWorkerMessage {
        msg_type: "UNLOCK_VRF_KEYPAIR".to_string(),
        id: Some("msg-3".to_string()),
        payload: None,
    });
    assert!(!response.success);
    assert!(response.error.unwrap().contains("Missing payload"));
}

#[test]
fn dispatch_unlock_round_trip_through_envelope() {
    let mgr = VrfSessionManager::new(None, None, None, None);
    let prf = test_prf_output();
    let (derived, _) = mgr
        .derive_keypair_from_prf(&prf, "alice.testnet", None)
        .unwrap();

    let payload = serde_json::json!({
        "nearAccountId": "alice.testnet",
        "encryptedVrfKeypair": derived.encrypted_vrf_keypair.unwrap(),
        "prfKey": base64_url_encode(&prf),
    });

    let manager = Rc::new(RefCell::new(VrfSessionManager::new(None, None, None, None)));
    let response = block_on(crate::dispatch_message(
        manager.clone(),
        VrfWorkerMessage {
            msg_type: "UNLOCK_VRF_KEYPAIR".to_string(),
            id: Some("msg-4".to_string()),
            payload: Some(payload),
        },
    ));

    assert!(response.success, "unlock failed: {:?}", response.error);
    assert!(manager.borrow().status().active);
}
