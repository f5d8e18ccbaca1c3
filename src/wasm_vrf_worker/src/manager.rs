use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use getrandom::getrandom;
use hkdf::Hkdf;
use log::{debug, warn};
use rand_core::SeedableRng;
use sha2::{Digest, Sha256};
use vrf_wasm::ecvrf::ECVRFKeyPair;
use vrf_wasm::traits::WasmRngFromSeed;
use vrf_wasm::vrf::{VRFKeyPair, VRFProof};
use zeroize::ZeroizeOnDrop;

use crate::config::{
    CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, DISPLAY_TRUNCATE_LENGTH, HKDF_CHACHA20_KEY_INFO,
    HKDF_VRF_KEYPAIR_INFO, VRF_DOMAIN_SEPARATOR, VRF_SEED_SIZE,
};
use crate::errors::{AeadError, SerializationError, VrfResult, VrfWorkerError};
use crate::shamir3pass::Shamir3Pass;
use crate::types::{
    DeriveVrfKeypairFromPrfResponse, EncryptedVrfKeypair, EncryptedVrfKeypairResponse,
    GenerateVrfKeypairBootstrapResponse, VrfChallenge, VrfChallengeInput, VrfKeypairData,
    VrfStatus,
};
use crate::utils::{base64_url_decode, base64_url_encode, now_ms, parse_block_height};

// === SEALED VRF KEYPAIR ===

/// VRF keypair wrapper with automatic memory zeroization on drop.
#[derive(ZeroizeOnDrop)]
pub struct SealedVrfKeypair {
    keypair: ECVRFKeyPair,
}

impl SealedVrfKeypair {
    pub fn new(keypair: ECVRFKeyPair) -> Self {
        Self { keypair }
    }

    pub fn inner(&self) -> &ECVRFKeyPair {
        &self.keypair
    }
}

/// The single unlocked session this worker may hold.
pub struct VrfSession {
    pub near_account_id: String,
    pub started_at_ms: f64,
}

// === VRF SESSION MANAGER ===

/// Owns the in-memory VRF keypair and the session binding it to an account.
/// At most one session is active; unlocking for a new account replaces the
/// previous keypair (which zeroizes on drop).
pub struct VrfSessionManager {
    pub vrf_keypair: Option<SealedVrfKeypair>,
    pub session: Option<VrfSession>,
    // Shamir 3-pass configuration
    pub shamir3pass: Shamir3Pass,
    pub relay_server_url: Option<String>,
    pub apply_lock_route: Option<String>,
    pub remove_lock_route: Option<String>,
}

impl VrfSessionManager {
    pub fn new(
        shamir_p_b64u: Option<&str>,
        relay_server_url: Option<String>,
        apply_lock_route: Option<String>,
        remove_lock_route: Option<String>,
    ) -> Self {
        let shamir3pass = match shamir_p_b64u {
            Some(p) => match Shamir3Pass::new(p) {
                Ok(sp) => sp,
                Err(e) => {
                    warn!("Rejected configured Shamir prime ({:?}), using default", e);
                    Shamir3Pass::new_default()
                }
            },
            None => Shamir3Pass::new_default(),
        };

        Self {
            vrf_keypair: None,
            session: None,
            shamir3pass,
            relay_server_url,
            apply_lock_route,
            remove_lock_route,
        }
    }

    pub fn shamir3pass(&self) -> &Shamir3Pass {
        &self.shamir3pass
    }

    fn install_keypair(&mut self, keypair: ECVRFKeyPair, near_account_id: String) {
        // Replacing the option drops (and zeroizes) any previous keypair.
        self.vrf_keypair = Some(SealedVrfKeypair::new(keypair));
        self.session = Some(VrfSession {
            near_account_id,
            started_at_ms: now_ms(),
        });
    }

    /// Generate an ephemeral VRF keypair for registration bootstrapping.
    /// The keypair lives unencrypted in worker memory until the WebAuthn
    /// ceremony supplies a PRF output to encrypt it under.
    pub fn generate_keypair_bootstrap(
        &mut self,
        near_account_id: String,
        challenge_input: Option<VrfChallengeInput>,
    ) -> VrfResult<GenerateVrfKeypairBootstrapResponse> {
        debug!("Bootstrapping VRF keypair for {}", near_account_id);

        let mut rng = WasmRngFromSeed::from_entropy();
        let keypair = ECVRFKeyPair::generate(&mut rng);

        let vrf_public_key = base64_url_encode(&serialize_public_key(&keypair)?);

        let vrf_challenge = match challenge_input {
            Some(input) => Some(self.challenge_with_keypair(&keypair, input)?),
            None => None,
        };

        self.install_keypair(keypair, near_account_id);

        Ok(GenerateVrfKeypairBootstrapResponse {
            vrf_public_key,
            vrf_challenge,
        })
    }

    /// Encrypt the in-memory keypair under a PRF output, after verifying the
    /// caller is talking about the same keypair it bootstrapped.
    pub fn encrypt_keypair_with_prf(
        &self,
        expected_public_key: &str,
        prf_key: &[u8],
    ) -> VrfResult<EncryptedVrfKeypairResponse> {
        debug!(
            "Encrypting VRF keypair with PRF output, expected public key: {}...",
            &expected_public_key[..DISPLAY_TRUNCATE_LENGTH.min(expected_public_key.len())]
        );

        let keypair = self
            .vrf_keypair
            .as_ref()
            .ok_or(VrfWorkerError::NoVrfKeypair)?
            .inner();

        let stored_public_key = base64_url_encode(&serialize_public_key(keypair)?);
        if stored_public_key != expected_public_key {
            return Err(VrfWorkerError::public_key_mismatch(
                expected_public_key,
                &stored_public_key,
            ));
        }

        let (vrf_public_key, encrypted_vrf_keypair) = self.encrypt_keypair_data(keypair, prf_key)?;

        Ok(EncryptedVrfKeypairResponse {
            vrf_public_key,
            encrypted_vrf_keypair,
        })
    }

    /// Decrypt an at-rest keypair with a PRF-derived key and start a session.
    pub fn unlock_keypair(
        &mut self,
        near_account_id: String,
        encrypted: EncryptedVrfKeypair,
        prf_key: &[u8],
    ) -> VrfResult<()> {
        debug!("Unlocking VRF keypair for {}", near_account_id);

        let keypair = self.decrypt_keypair(encrypted, prf_key)?;
        self.install_keypair(keypair, near_account_id);

        debug!("VRF keypair unlocked");
        Ok(())
    }

    /// Load a plaintext keypair recovered through the Shamir 3-pass path.
    pub fn load_plaintext_keypair(
        &mut self,
        near_account_id: String,
        keypair_data: VrfKeypairData,
    ) -> VrfResult<()> {
        let keypair: ECVRFKeyPair =
            bincode::deserialize(&keypair_data.keypair_bytes).map_err(|e| {
                VrfWorkerError::SerializationError(SerializationError::VrfKeypairDeserialization(
                    e.to_string(),
                ))
            })?;
        self.install_keypair(keypair, near_account_id);
        Ok(())
    }

    pub fn generate_challenge(&self, input: VrfChallengeInput) -> VrfResult<VrfChallenge> {
        let keypair = match (&self.session, &self.vrf_keypair) {
            (Some(_), Some(kp)) => kp.inner(),
            _ => return Err(VrfWorkerError::VrfNotUnlocked),
        };
        self.challenge_with_keypair(keypair, input)
    }

    /// Generate a VRF challenge with an explicit keypair (in-memory or a
    /// just-derived one that has not been installed yet).
    pub fn challenge_with_keypair(
        &self,
        keypair: &ECVRFKeyPair,
        input: VrfChallengeInput,
    ) -> VrfResult<VrfChallenge> {
        let block_height = parse_block_height(&input.block_height)?;
        let block_hash_bytes = bs58::decode(&input.block_hash)
            .into_vec()
            .map_err(|e| VrfWorkerError::invalid_format(&format!("invalid blockHash: {}", e)))?;

        // VRF input = SHA256(domain + user_id + rp_id + height LE + block_hash)
        let mut material = Vec::new();
        material.extend_from_slice(VRF_DOMAIN_SEPARATOR);
        material.extend_from_slice(input.user_id.as_bytes());
        material.extend_from_slice(input.rp_id.as_bytes());
        material.extend_from_slice(&block_height.to_le_bytes());
        material.extend_from_slice(&block_hash_bytes);

        let vrf_input = Sha256::digest(&material).to_vec();

        let proof = keypair.prove(&vrf_input);
        let vrf_output = proof.to_hash().to_vec();

        let proof_bytes = bincode::serialize(&proof).map_err(|e| {
            VrfWorkerError::SerializationError(SerializationError::VrfKeypairSerialization(
                format!("{:?}", e),
            ))
        })?;
        let pk_bytes = serialize_public_key(keypair)?;

        Ok(VrfChallenge {
            vrf_input: base64_url_encode(&vrf_input),
            vrf_output: base64_url_encode(&vrf_output),
            vrf_proof: base64_url_encode(&proof_bytes),
            vrf_public_key: base64_url_encode(&pk_bytes),
            user_id: input.user_id,
            rp_id: input.rp_id,
            block_height: input.block_height,
            block_hash: base64_url_encode(&block_hash_bytes),
        })
    }

    pub fn status(&self) -> VrfStatus {
        match &self.session {
            Some(session) if self.vrf_keypair.is_some() => VrfStatus {
                active: true,
                near_account_id: Some(session.near_account_id.clone()),
                session_duration_ms: Some(now_ms() - session.started_at_ms),
            },
            _ => VrfStatus {
                active: false,
                near_account_id: None,
                session_duration_ms: None,
            },
        }
    }

    /// Zero the in-memory keypair and drop the session.
    pub fn logout(&mut self) -> VrfResult<()> {
        if self.vrf_keypair.take().is_some() {
            debug!("VRF keypair cleared with zeroization");
        }
        self.session = None;
        Ok(())
    }

    /// Derive a deterministic VRF keypair from PRF output (account recovery
    /// and registration both use this), re-encrypt it for storage, and
    /// optionally produce a challenge with the fresh keypair.
    pub fn derive_keypair_from_prf(
        &self,
        prf_output: &[u8],
        near_account_id: &str,
        challenge_input: Option<VrfChallengeInput>,
    ) -> VrfResult<(DeriveVrfKeypairFromPrfResponse, ECVRFKeyPair)> {
        if prf_output.is_empty() {
            return Err(VrfWorkerError::empty_prf_output());
        }

        let keypair = self.keypair_from_seed(prf_output, near_account_id)?;

        let vrf_public_key = base64_url_encode(&serialize_public_key(&keypair)?);
        let (_pk, encrypted_vrf_keypair) = self.encrypt_keypair_data(&keypair, prf_output)?;

        let vrf_challenge = match challenge_input {
            Some(input) => Some(self.challenge_with_keypair(&keypair, input)?),
            None => None,
        };

        let response = DeriveVrfKeypairFromPrfResponse {
            vrf_public_key,
            vrf_challenge,
            encrypted_vrf_keypair: Some(encrypted_vrf_keypair),
            server_encrypted_vrf_keypair: None,
            success: true,
        };

        Ok((response, keypair))
    }

    /// Install an already-derived keypair (bootstrap or recovery path).
    pub fn store_keypair_in_memory(&mut self, keypair: ECVRFKeyPair, near_account_id: String) {
        debug!("Storing VRF keypair in memory for {}", near_account_id);
        self.install_keypair(keypair, near_account_id);
    }

    // === PRIVATE HELPERS ===

    fn decrypt_keypair(
        &self,
        encrypted: EncryptedVrfKeypair,
        prf_key: &[u8],
    ) -> VrfResult<ECVRFKeyPair> {
        let chacha20_key = derive_chacha20_key(prf_key)?;

        let ciphertext = base64_url_decode(&encrypted.ciphertext_b64u)
            .map_err(|e| VrfWorkerError::SerializationError(SerializationError::Base64Error(e)))?;
        let nonce_bytes = base64_url_decode(&encrypted.chacha20_nonce_b64u)
            .map_err(|e| VrfWorkerError::SerializationError(SerializationError::Base64Error(e)))?;

        if nonce_bytes.len() != CHACHA20_NONCE_SIZE {
            return Err(VrfWorkerError::InvalidNonceLength {
                expected: CHACHA20_NONCE_SIZE,
                actual: nonce_bytes.len(),
            });
        }

        let key = chacha20poly1305::Key::from_slice(&chacha20_key);
        let cipher = ChaCha20Poly1305::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let decrypted = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| VrfWorkerError::AeadError(AeadError::DecryptionFailed(e.to_string())))?;

        let keypair_data: VrfKeypairData = bincode::deserialize(&decrypted).map_err(|e| {
            VrfWorkerError::SerializationError(SerializationError::KeypairDataDeserialization(
                e.to_string(),
            ))
        })?;

        bincode::deserialize(&keypair_data.keypair_bytes).map_err(|e| {
            VrfWorkerError::SerializationError(SerializationError::VrfKeypairDeserialization(
                e.to_string(),
            ))
        })
    }

    fn keypair_from_seed(&self, seed: &[u8], account_id: &str) -> VrfResult<ECVRFKeyPair> {
        debug!("Deriving deterministic VRF keypair for {}", account_id);

        let hk = Hkdf::<Sha256>::new(Some(account_id.as_bytes()), seed);
        let mut vrf_seed = [0u8; VRF_SEED_SIZE];
        hk.expand(HKDF_VRF_KEYPAIR_INFO, &mut vrf_seed)
            .map_err(|_| VrfWorkerError::HkdfDerivationFailed)?;

        let mut rng = WasmRngFromSeed::from_seed(vrf_seed);
        Ok(ECVRFKeyPair::generate(&mut rng))
    }

    /// Serialize the keypair into the storage envelope and encrypt it.
    pub(crate) fn encrypt_keypair_data(
        &self,
        keypair: &ECVRFKeyPair,
        prf_key: &[u8],
    ) -> VrfResult<(String, EncryptedVrfKeypair)> {
        let keypair_bytes = bincode::serialize(keypair)?;
        let public_key_bytes = serialize_public_key(keypair)?;
        let public_key_b64u = base64_url_encode(&public_key_bytes);

        let keypair_data = VrfKeypairData {
            keypair_bytes,
            public_key_b64u: public_key_b64u.clone(),
        };
        let keypair_data_bytes = bincode::serialize(&keypair_data).map_err(|e| {
            VrfWorkerError::SerializationError(SerializationError::KeypairDataSerialization(
                format!("{:?}", e),
            ))
        })?;

        let chacha20_key = derive_chacha20_key(prf_key)?;
        let key = chacha20poly1305::Key::from_slice(&chacha20_key);
        let cipher = ChaCha20Poly1305::new(key);

        let mut nonce_bytes = [0u8; CHACHA20_NONCE_SIZE];
        getrandom(&mut nonce_bytes).map_err(|e| {
            VrfWorkerError::AeadError(AeadError::NonceGenerationFailed(e.to_string()))
        })?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, keypair_data_bytes.as_slice())
            .map_err(|e| VrfWorkerError::AeadError(AeadError::EncryptionFailed(e.to_string())))?;

        Ok((
            public_key_b64u,
            EncryptedVrfKeypair {
                ciphertext_b64u: base64_url_encode(&ciphertext),
                chacha20_nonce_b64u: base64_url_encode(&nonce_bytes),
            },
        ))
    }

    /// Bincode blob of the in-memory keypair, for the Shamir client-encrypt path.
    pub(crate) fn serialized_keypair_data(&self) -> VrfResult<(Vec<u8>, String)> {
        let keypair = self
            .vrf_keypair
            .as_ref()
            .ok_or(VrfWorkerError::NoVrfKeypair)?
            .inner();

        let public_key_b64u = base64_url_encode(&serialize_public_key(keypair)?);
        let keypair_data = VrfKeypairData {
            keypair_bytes: bincode::serialize(keypair)?,
            public_key_b64u: public_key_b64u.clone(),
        };
        let bytes = bincode::serialize(&keypair_data).map_err(|e| {
            VrfWorkerError::SerializationError(SerializationError::KeypairDataSerialization(
                format!("{:?}", e),
            ))
        })?;
        Ok((bytes, public_key_b64u))
    }
}

/// HKDF-SHA256 expansion of a PRF key into a ChaCha20 key.
fn derive_chacha20_key(prf_key: &[u8]) -> VrfResult<[u8; CHACHA20_KEY_SIZE]> {
    let hk = Hkdf::<Sha256>::new(None, prf_key);
    let mut chacha20_key = [0u8; CHACHA20_KEY_SIZE];
    hk.expand(HKDF_CHACHA20_KEY_INFO, &mut chacha20_key)
        .map_err(|_| VrfWorkerError::HkdfDerivationFailed)?;
    Ok(chacha20_key)
}

fn serialize_public_key(keypair: &ECVRFKeyPair) -> VrfResult<Vec<u8>> {
    bincode::serialize(&keypair.pk).map_err(|e| {
        VrfWorkerError::SerializationError(SerializationError::VrfPublicKeySerialization(format!(
            "{:?}",
            e
        )))
    })
}
