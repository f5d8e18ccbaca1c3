use super::*;
use num_bigint::BigUint;

fn instance() -> Shamir3Pass {
    Shamir3Pass::new_default()
}

#[test]
fn lock_keys_are_inverses_mod_p_minus_1() {
    let sp = instance();
    let keys = sp.generate_lock_keys().unwrap();

    let base = BigUint::from(123_456_789u64);
    let locked = sp.add_lock(&base, &keys.e);
    let unlocked = sp.remove_lock(&locked, &keys.d);

    assert_eq!(unlocked, base);
}

#[test]
fn locks_commute() {
    let sp = instance();
    let client = sp.generate_lock_keys().unwrap();
    let server = sp.generate_lock_keys().unwrap();

    let kek = sp.random_k().unwrap();

    // lock(client) then lock(server) then unlock(client) == lock(server)
    let kek_c = sp.add_lock(&kek, &client.e);
    let kek_cs = sp.add_lock(&kek_c, &server.e);
    let kek_s = sp.remove_lock(&kek_cs, &client.d);

    assert_eq!(kek_s, sp.add_lock(&kek, &server.e));

    // and removing the server lock restores the original KEK
    let restored = sp.remove_lock(&kek_s, &server.d);
    assert_eq!(restored, kek);
}

#[test]
fn kek_aead_round_trip() {
    let sp = instance();
    let plaintext = b"vrf keypair bytes go here";

    let (ciphertext, kek) = sp.encrypt_with_random_kek(plaintext).unwrap();
    assert_ne!(&ciphertext[12..], plaintext.as_slice());

    let decrypted = sp.decrypt_with_kek(&ciphertext, &kek).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn decrypt_with_wrong_kek_fails() {
    let sp = instance();
    let (ciphertext, _kek) = sp.encrypt_with_random_kek(b"secret").unwrap();

    let wrong = sp.random_k().unwrap();
    assert!(matches!(
        sp.decrypt_with_kek(&ciphertext, &wrong),
        Err(Shamir3PassError::DecryptionFailed(_))
    ));
}

#[test]
fn decrypt_rejects_truncated_ciphertext() {
    let sp = instance();
    let kek = sp.random_k().unwrap();
    assert!(matches!(
        sp.decrypt_with_kek(&[0u8; 4], &kek),
        Err(Shamir3PassError::DecryptionFailed(_))
    ));
}

#[test]
fn full_registration_and_login_round_trip() {
    let sp = instance();
    let vrf_bytes = b"bincode-encoded vrf keypair";

    // Registration: random KEK, client lock, server lock, client unlock.
    let (ciphertext, kek) = sp.encrypt_with_random_kek(vrf_bytes).unwrap();
    let client = sp.generate_lock_keys().unwrap();
    let server = sp.generate_lock_keys().unwrap();

    let kek_c = sp.add_lock(&kek, &client.e);
    let kek_cs = sp.add_lock(&kek_c, &server.e);
    let kek_s = sp.remove_lock(&kek_cs, &client.d);

    // Login: fresh client lock over KEK_s, server removes, client removes.
    let login = sp.generate_lock_keys().unwrap();
    let kek_st = sp.add_lock(&kek_s, &login.e);
    let kek_t = sp.remove_lock(&kek_st, &server.d);
    let recovered = sp.remove_lock(&kek_t, &login.d);

    assert_eq!(recovered, kek);
    assert_eq!(sp.decrypt_with_kek(&ciphertext, &recovered).unwrap(), vrf_bytes);
}

#[test]
fn biguint_b64u_round_trip() {
    let x = BigUint::from(0xdead_beef_u64);
    let encoded = encode_biguint_b64u(&x);
    assert_eq!(decode_biguint_b64u(&encoded).unwrap(), x);
}

#[test]
fn rejects_small_prime() {
    let tiny = encode_biguint_b64u(&BigUint::from(65_537u32));
    assert!(matches!(
        Shamir3Pass::new(&tiny),
        Err(Shamir3PassError::PrimeTooSmall { .. })
    ));
}
