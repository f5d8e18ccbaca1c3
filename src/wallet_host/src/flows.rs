//! The privileged flows: registration, login, the nine-step signing
//! pipeline, broadcast, NEP-413, key export, account recovery, and device
//! linking. Each flow streams progress through the sink and honors the
//! cancellation registry at every await boundary.

use log::{debug, warn};
use serde_json::{json, Value};

use wasm_signer_worker::{
    ActionParams, DecryptionPayload, SignerRequestType, TransactionContext,
};
use wasm_vrf_worker::{VrfChallenge, VrfChallengeInput};

use crate::config::{
    compute_rp_id, user_handle_for_device, DEFAULT_WAIT_UNTIL,
};
use crate::confirm::{merge_confirmation_config, ConfirmationIntent, ConfirmationSummary, Decision};
use crate::dispatcher::{parse_payload, RouteOutcome, WalletHost, LoginState};
use crate::error::{ErrorCode, HostError};
use crate::protocol::{phases, ChildEnvelope, ProgressPayload, ReplySink};
use crate::requests::*;
use crate::rpc::{is_invalid_nonce_error, RpcTransport};
use crate::stores::{
    register_atomically, AuthenticatorRecord, EncryptedKeyRecord, StorageBackend,
    VrfKeypairRecord,
};
use crate::utils::{base64_url_decode, base64_url_encode, now_ms};
use crate::webauthn::{
    prf_salts_for_account, AllowCredential, AuthenticationCeremonyOptions,
    RegistrationCeremonyOptions,
};

/// The WebAuthn challenge is the first 32 bytes of the VRF output.
pub(crate) fn webauthn_challenge_from_vrf(challenge: &VrfChallenge) -> Result<String, HostError> {
    let output = base64_url_decode(&challenge.vrf_output)
        .map_err(|e| HostError::host(format!("Invalid VRF output: {}", e)))?;
    if output.len() < 32 {
        return Err(HostError::host("VRF output shorter than 32 bytes"));
    }
    Ok(base64_url_encode(&output[..32]))
}

fn random_challenge_b64u() -> Result<String, HostError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| HostError::host(format!("Failed to generate challenge: {}", e)))?;
    Ok(base64_url_encode(&bytes))
}

/// Human-readable one-liner per action for the confirmation UI.
fn summarize_action(action: &ActionParams) -> (String, Option<String>) {
    match action {
        ActionParams::Transfer { amount } => ("Transfer".to_string(), Some(amount.clone())),
        ActionParams::FunctionCall {
            method_name,
            deposit,
            ..
        } => (
            format!("FunctionCall: {}", method_name),
            (deposit != "0").then(|| deposit.clone()),
        ),
        ActionParams::AddKey { public_key, .. } => {
            (format!("AddKey {}", public_key), None)
        }
        ActionParams::DeleteKey { public_key } => {
            (format!("DeleteKey {}", public_key), None)
        }
        ActionParams::CreateAccount => ("CreateAccount".to_string(), None),
        ActionParams::DeployContract { .. } => ("DeployContract".to_string(), None),
        ActionParams::Stake { stake, .. } => ("Stake".to_string(), Some(stake.clone())),
        ActionParams::DeleteAccount { beneficiary_id } => {
            (format!("DeleteAccount → {}", beneficiary_id), None)
        }
    }
}

fn signer_error(message: String) -> HostError {
    if message.contains("Decryption failed") {
        HostError::new(ErrorCode::DecryptionFailed, message)
    } else {
        HostError::new(ErrorCode::SigningFailed, message)
    }
}

/// Everything the signing stage produced, before any broadcast.
pub(crate) struct SignedBatch {
    pub signed: Vec<wasm_signer_worker::SignedTransactionOutput>,
    pub reserved_nonces: Vec<u64>,
}

impl<B: StorageBackend + 'static, T: RpcTransport + 'static> WalletHost<B, T> {
    // ========================================================================
    // REGISTRATION
    // ========================================================================

    pub(crate) async fn handle_register(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: RegisterPayload = parse_payload(payload)?;
        let account_id = payload.near_account_id.clone();
        if account_id.is_empty() {
            return Err(HostError::invalid_request("nearAccountId is required"));
        }

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(1, phases::PREPARATION, "Preparing registration"),
        );

        let config = self.service_config()?;
        let rpc = self.rpc_client()?;
        let block = rpc
            .block_final()
            .await
            .map_err(|e| HostError::new(ErrorCode::RpcTransient, e))?;
        self.cancel.ensure_live(request_id)?;

        let block_height = block
            .pointer("/header/height")
            .and_then(|h| h.as_u64())
            .ok_or_else(|| HostError::host("Block response missing height"))?;
        let block_hash = block
            .pointer("/header/hash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| HostError::host("Block response missing hash"))?
            .to_string();

        let device_index = payload
            .device_index
            .unwrap_or_else(|| next_device_index(&self.keys.device_indices(&account_id)));
        let rp_id = compute_rp_id(&self.host_name, config.rp_id_override.as_deref());
        let user_handle = user_handle_for_device(&account_id, device_index);

        // Bootstrap VRF keypair and bind the registration challenge to the
        // current block.
        let (_bootstrap_pk, vrf_challenge) = self
            .vrf
            .generate_keypair_bootstrap(
                &account_id,
                Some(VrfChallengeInput {
                    user_id: account_id.clone(),
                    rp_id: rp_id.clone(),
                    block_height: block_height.to_string(),
                    block_hash: block_hash.clone(),
                }),
            )
            .await?;
        let vrf_challenge =
            vrf_challenge.ok_or_else(|| HostError::host("VRF bootstrap returned no challenge"))?;
        self.cancel.ensure_live(request_id)?;

        // WebAuthn create() with PRF eval on both account-scoped salts.
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(4, phases::WEBAUTHN_AUTHENTICATION, "Creating passkey"),
        );
        let (chacha20_salt, ed25519_salt) = prf_salts_for_account(&account_id);
        let outcome = self
            .webauthn
            .create_credential(RegistrationCeremonyOptions {
                rp_id: rp_id.clone(),
                rp_name: rp_id.clone(),
                challenge_b64u: webauthn_challenge_from_vrf(&vrf_challenge)?,
                user_id_b64u: base64_url_encode(user_handle.as_bytes()),
                user_name: user_handle.clone(),
                user_display_name: account_id.clone(),
                user_verification: "preferred".to_string(),
                chacha20_salt_b64u: chacha20_salt,
                ed25519_salt_b64u: ed25519_salt,
            })
            .await?;
        self.cancel.ensure_live(request_id)?;
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(5, phases::AUTHENTICATION_COMPLETE, "Passkey created"),
        );

        // Registration pre-check against the web-authn contract (view call).
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(
                3,
                phases::CONTRACT_VERIFICATION,
                "Checking registration eligibility",
            ),
        );
        let check = self
            .signer
            .request::<_, wasm_signer_worker::RegistrationCheckResult>(
                SignerRequestType::CheckCanRegisterUser,
                &json!({
                    "contractId": config.contract_id,
                    "nearRpcUrl": config.near_rpc_url,
                    "vrfChallenge": &vrf_challenge,
                    "credential": &outcome.credential,
                }),
            )
            .await;
        match check {
            Ok(result) if !result.success => {
                return Err(HostError::invalid_request(
                    result
                        .error
                        .unwrap_or_else(|| "Registration pre-check rejected".to_string()),
                ));
            }
            Ok(_) => {}
            // The pre-check is best-effort when the RPC edge is unreachable;
            // on-chain verification still gates the actual registration tx.
            Err(e) => warn!("Registration pre-check unavailable: {}", e),
        }
        self.cancel.ensure_live(request_id)?;

        // Derive and encrypt the NEAR keypair inside the signer worker.
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(6, phases::TRANSACTION_SIGNING_PROGRESS, "Deriving keys"),
        );
        let derived: wasm_signer_worker::DeriveNearKeypairAndEncryptResult = self
            .signer
            .request(
                SignerRequestType::DeriveNearKeypairAndEncrypt,
                &json!({
                    "dualPrfOutputs": &outcome.prf,
                    "nearAccountId": &account_id,
                    "deviceIndex": device_index,
                    "credential": &outcome.credential,
                }),
            )
            .await
            .map_err(signer_error)?;
        self.cancel.ensure_live(request_id)?;

        // Deterministic VRF keypair from the PRF output, re-encrypted for
        // storage and installed as the live session.
        let vrf_derived = self
            .vrf
            .derive_keypair_from_prf(
                &account_id,
                &outcome.prf.chacha20_prf_output,
                None,
                true,
            )
            .await?;
        let encrypted_vrf_keypair = vrf_derived
            .get("encrypted_vrf_keypair")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        // COSE public key for the authenticator record (best-effort; the
        // fake test attestation has no parseable COSE key).
        let cose_public_key = self
            .signer
            .request::<_, wasm_signer_worker::CoseExtractionResult>(
                SignerRequestType::ExtractCosePublicKey,
                &json!({
                    "attestationObjectBase64url": &outcome.credential.response.attestation_object,
                }),
            )
            .await
            .ok()
            .map(|r| base64_url_encode(&r.cose_public_key_bytes));

        // Key record + authenticator record land in one logical transaction.
        let key_record = EncryptedKeyRecord {
            account_id: account_id.clone(),
            device_index,
            ciphertext: derived.encrypted_data.clone(),
            iv: derived.iv.clone(),
            public_key: derived.public_key.clone(),
            created_at: now_ms(),
        };
        let authenticator_record = AuthenticatorRecord {
            credential_id: outcome.credential.id.clone(),
            transports: outcome
                .credential
                .response
                .transports
                .clone()
                .unwrap_or_default(),
            cose_public_key_b64u: cose_public_key,
            device_index,
            created_at: now_ms(),
            user_verification: "preferred".to_string(),
        };
        register_atomically(&self.keys, &self.authenticators, &key_record, authenticator_record)
            .map_err(HostError::host)?;

        let mut vrf_record = VrfKeypairRecord {
            encrypted_vrf_keypair,
            server_encrypted_vrf_keypair: None,
        };

        // Optional Shamir 3-pass server lock so later logins can skip TouchID.
        if config.relay_server_url.is_some() {
            match self.vrf.shamir_encrypt_current_keypair().await {
                Ok(server_record) => vrf_record.server_encrypted_vrf_keypair = Some(server_record),
                Err(e) => warn!("Shamir server-lock registration skipped: {}", e),
            }
        }
        self.vrf_keys
            .put(&account_id, &vrf_record)
            .map_err(HostError::host)?;

        // Registration ends logged in.
        let nonce_manager = self.nonce_manager()?;
        nonce_manager.initialize(&account_id, &derived.public_key);
        *self.login.borrow_mut() = Some(LoginState {
            near_account_id: account_id.clone(),
            public_key: derived.public_key.clone(),
            device_index,
        });
        self.prefs
            .update_last_login(&account_id)
            .map_err(HostError::host)?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::success(9, phases::ACTION_COMPLETE, "Registration complete"),
        );

        Ok(json!({
            "success": true,
            "nearAccountId": account_id,
            "publicKey": derived.public_key,
            "deviceIndex": device_index,
        }))
    }

    // ========================================================================
    // LOGIN / SESSION
    // ========================================================================

    pub(crate) async fn handle_login(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: LoginPayload = parse_payload(payload)?;
        let account_id = payload.near_account_id.clone();

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(1, phases::PREPARATION, "Preparing login"),
        );

        let device_index = self
            .keys
            .device_indices(&account_id)
            .first()
            .copied()
            .ok_or_else(|| {
                HostError::invalid_request(format!("No key record for {}", account_id))
            })?;
        let key_record = self
            .keys
            .get(&account_id, device_index)
            .ok_or_else(|| HostError::host("Key record disappeared"))?;

        let vrf_record = self.vrf_keys.get(&account_id).unwrap_or_default();

        // Server-assisted unlock first: the relay removes its KEK lock
        // without seeing plaintext, so no user gesture is needed.
        let mut unlocked = false;
        if let Some(server_record) = vrf_record.server_encrypted_vrf_keypair.as_ref() {
            match self.vrf.shamir_decrypt_keypair(&account_id, server_record).await {
                Ok(()) => {
                    debug!("VRF keypair unlocked via Shamir 3-pass relay");
                    unlocked = true;
                }
                Err(e) => debug!("Shamir unlock unavailable, falling back to passkey: {}", e),
            }
        }
        self.cancel.ensure_live(request_id)?;

        if !unlocked {
            // Fallback: WebAuthn assertion binds the account's PRF output,
            // which decrypts the stored VRF keypair.
            self.emit(
                sink,
                request_id,
                ProgressPayload::step(4, phases::WEBAUTHN_AUTHENTICATION, "Authenticating"),
            );
            let outcome = self.authenticate(&account_id, None).await?;
            self.cancel.ensure_live(request_id)?;

            match vrf_record.encrypted_vrf_keypair.as_ref() {
                Some(encrypted) => {
                    self.vrf
                        .unlock_keypair(&account_id, encrypted, &outcome.prf.chacha20_prf_output)
                        .await?;
                }
                None => {
                    // Self-heal: older records may lack the stored VRF
                    // keypair; deterministic derivation rebuilds it.
                    let derived = self
                        .vrf
                        .derive_keypair_from_prf(
                            &account_id,
                            &outcome.prf.chacha20_prf_output,
                            None,
                            true,
                        )
                        .await?;
                    let encrypted = derived
                        .get("encrypted_vrf_keypair")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok());
                    self.vrf_keys
                        .put(
                            &account_id,
                            &VrfKeypairRecord {
                                encrypted_vrf_keypair: encrypted,
                                server_encrypted_vrf_keypair: vrf_record
                                    .server_encrypted_vrf_keypair
                                    .clone(),
                            },
                        )
                        .map_err(HostError::host)?;
                }
            }
            self.emit(
                sink,
                request_id,
                ProgressPayload::step(5, phases::AUTHENTICATION_COMPLETE, "Authenticated"),
            );
        }

        let nonce_manager = self.nonce_manager()?;
        nonce_manager.initialize(&account_id, &key_record.public_key);
        *self.login.borrow_mut() = Some(LoginState {
            near_account_id: account_id.clone(),
            public_key: key_record.public_key.clone(),
            device_index,
        });
        self.prefs
            .update_last_login(&account_id)
            .map_err(HostError::host)?;

        Ok(json!({
            "success": true,
            "nearAccountId": account_id,
            "clientNearPublicKey": key_record.public_key,
        }))
    }

    /// Run a WebAuthn assertion for `account_id` with PRF eval on both
    /// account salts. `challenge_b64u` defaults to a random challenge for
    /// flows that run before a VRF session exists.
    pub(crate) async fn authenticate(
        &self,
        account_id: &str,
        challenge_b64u: Option<String>,
    ) -> Result<crate::webauthn::CeremonyOutcome<wasm_signer_worker::SerializedCredential>, HostError>
    {
        let config = self.service_config()?;
        let rp_id = compute_rp_id(&self.host_name, config.rp_id_override.as_deref());
        let (chacha20_salt, ed25519_salt) = prf_salts_for_account(account_id);

        let allow_credentials: Vec<AllowCredential> = self
            .authenticators
            .list(account_id)
            .into_iter()
            .map(|a| AllowCredential {
                id_b64u: a.credential_id,
                transports: a.transports,
            })
            .collect();

        let challenge_b64u = match challenge_b64u {
            Some(c) => c,
            None => random_challenge_b64u()?,
        };

        self.webauthn
            .get_credential(AuthenticationCeremonyOptions {
                rp_id,
                challenge_b64u,
                allow_credentials,
                user_verification: "preferred".to_string(),
                chacha20_salt_b64u: chacha20_salt,
                ed25519_salt_b64u: ed25519_salt,
            })
            .await
    }

    // ========================================================================
    // SIGNING PIPELINE
    // ========================================================================

    /// Steps 1 through 7 of the canonical pipeline: validate, confirm, VRF
    /// challenge + WebAuthn, reserve nonces, sign in the worker. Reserved
    /// nonces are released on any failure.
    pub(crate) async fn signing_pipeline(
        &self,
        request_id: &str,
        account_id: &str,
        transactions: &[TransactionInput],
        options: &SignOptions,
        sink: &dyn ReplySink,
    ) -> Result<SignedBatch, HostError> {
        // --- Step 1: PREPARING ---
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(1, phases::PREPARATION, "Validating transaction inputs"),
        );
        if transactions.is_empty() {
            return Err(HostError::invalid_request("No transactions provided"));
        }
        for tx in transactions {
            if tx.receiver_id.is_empty() {
                return Err(HostError::invalid_request("receiverId is required"));
            }
            for action in &tx.actions {
                action
                    .to_action()
                    .map_err(HostError::invalid_request)?;
            }
        }

        let login = self
            .login
            .borrow()
            .clone()
            .filter(|l| l.near_account_id == account_id)
            .ok_or_else(|| {
                HostError::invalid_request(format!("Not logged in as {}", account_id))
            })?;
        let key_record = self
            .keys
            .get(account_id, login.device_index)
            .ok_or_else(|| HostError::invalid_request("No encrypted key record"))?;

        // Pre-warm chain data so signing does not race the block refresh.
        let nonce_manager = self.nonce_manager()?;
        let context = nonce_manager
            .get_nonce_block_hash_and_height(true)
            .await
            .map_err(|e| HostError::new(ErrorCode::RpcTransient, e))?;
        self.cancel.ensure_live(request_id)?;

        // --- Step 2: AWAITING_CONFIRMATION ---
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(2, phases::USER_CONFIRMATION, "Awaiting user confirmation"),
        );
        let stored = self.prefs.get(account_id).confirmation_config;
        let effective =
            merge_confirmation_config(options.confirmation_config.as_ref(), Some(&stored));

        let summary = ConfirmationSummary {
            near_account_id: account_id.to_string(),
            intents: transactions
                .iter()
                .flat_map(|tx| {
                    tx.actions.iter().map(|a| {
                        let (action_summary, amount) = summarize_action(a);
                        ConfirmationIntent {
                            receiver_id: tx.receiver_id.clone(),
                            action_summary,
                            amount,
                        }
                    })
                })
                .collect(),
        };

        if self.confirm.clone().present(&summary, &effective).await == Decision::Cancelled {
            self.emit(
                sink,
                request_id,
                ProgressPayload::error(phases::ACTION_ERROR, "User cancelled confirmation"),
            );
            return Err(HostError::cancelled());
        }
        self.cancel.ensure_live(request_id)?;
        self.emit(
            sink,
            request_id,
            ProgressPayload::success(2, phases::USER_CONFIRMATION, "Confirmed"),
        );

        // --- Steps 3-4: VRF challenge + AUTHENTICATING ---
        let config = self.service_config()?;
        let rp_id = compute_rp_id(&self.host_name, config.rp_id_override.as_deref());
        let vrf_challenge = self
            .vrf
            .generate_challenge(VrfChallengeInput {
                user_id: account_id.to_string(),
                rp_id,
                block_height: context.tx_block_height.clone(),
                block_hash: context.tx_block_hash.clone(),
            })
            .await?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(4, phases::WEBAUTHN_AUTHENTICATION, "Authenticating"),
        );
        let outcome = self
            .authenticate(account_id, Some(webauthn_challenge_from_vrf(&vrf_challenge)?))
            .await?;
        self.cancel.ensure_live(request_id)?;
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(5, phases::AUTHENTICATION_COMPLETE, "Authenticated"),
        );

        // --- Step 6: SIGNING ---
        let reserved = nonce_manager
            .reserve_nonces(transactions.len() as u64)
            .map_err(|e| HostError::new(ErrorCode::SigningFailed, e))?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(
                6,
                phases::TRANSACTION_SIGNING_PROGRESS,
                format!("Signing {} transaction(s)", transactions.len()),
            )
            .with_data(json!({ "transactionCount": transactions.len() })),
        );

        let worker_context = TransactionContext {
            near_public_key_str: context.near_public_key_str.clone(),
            next_nonce: reserved[0].to_string(),
            tx_block_height: context.tx_block_height.clone(),
            tx_block_hash: context.tx_block_hash.clone(),
        };
        let tx_signing_requests: Vec<Value> = transactions
            .iter()
            .map(|tx| {
                json!({
                    "nearAccountId": account_id,
                    "receiverId": tx.receiver_id,
                    "actions": tx.actions,
                })
            })
            .collect();

        let sign_result = self
            .signer
            .request::<_, wasm_signer_worker::TransactionSignResult>(
                SignerRequestType::SignTransactionsWithActions,
                &json!({
                    "decryption": DecryptionPayload {
                        encrypted_private_key_data: key_record.ciphertext.clone(),
                        encrypted_private_key_chacha20_nonce_b64u: key_record.iv.clone(),
                        chacha20_prf_output: outcome.prf.chacha20_prf_output.clone(),
                    },
                    "transactionContext": worker_context,
                    "txSigningRequests": tx_signing_requests,
                }),
            )
            .await;

        let sign_result = match sign_result {
            Ok(result) if result.success => result,
            Ok(result) => {
                for nonce in &reserved {
                    nonce_manager.release_nonce(*nonce);
                }
                return Err(signer_error(
                    result.error.unwrap_or_else(|| "Signing failed".to_string()),
                ));
            }
            Err(e) => {
                for nonce in &reserved {
                    nonce_manager.release_nonce(*nonce);
                }
                return Err(signer_error(e));
            }
        };

        if self.cancel.is_cancelled(request_id) {
            for nonce in &reserved {
                nonce_manager.release_nonce(*nonce);
            }
            return Err(HostError::cancelled());
        }

        // --- Step 7: SIGNED ---
        self.emit(
            sink,
            request_id,
            ProgressPayload::success(
                7,
                phases::TRANSACTION_SIGNING_COMPLETE,
                "All transactions signed",
            ),
        );

        Ok(SignedBatch {
            signed: sign_result.signed_transactions,
            reserved_nonces: reserved,
        })
    }

    pub(crate) async fn handle_sign_transactions(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
        broadcast: bool,
    ) -> Result<Value, HostError> {
        let payload: SignTransactionsPayload = parse_payload(payload)?;
        let options = payload.options.clone().unwrap_or_default();

        let batch = self
            .signing_pipeline(
                request_id,
                &payload.near_account_id,
                &payload.transactions,
                &options,
                sink,
            )
            .await?;

        if !broadcast {
            // Nonces stay reserved for the caller's own broadcast; they are
            // reconciled away once the chain consumes them.
            return Ok(json!({
                "success": true,
                "signedTransactions": batch.signed,
                "reservedNonces": batch.reserved_nonces,
            }));
        }

        let results = self
            .broadcast_batch(request_id, batch, &options, sink)
            .await?;

        Ok(json!({
            "success": true,
            "transactions": results,
        }))
    }

    pub(crate) async fn handle_execute_action(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: ExecuteActionPayload = parse_payload(payload)?;
        let options = payload.options.clone().unwrap_or_default();

        let transactions = vec![TransactionInput {
            receiver_id: payload.receiver_id,
            actions: payload.actions,
        }];

        let batch = self
            .signing_pipeline(request_id, &payload.near_account_id, &transactions, &options, sink)
            .await?;
        let results = self
            .broadcast_batch(request_id, batch, &options, sink)
            .await?;

        Ok(json!({
            "success": true,
            "transactions": results,
        }))
    }

    // ========================================================================
    // BROADCAST (steps 8-9)
    // ========================================================================

    /// Broadcast the signed batch. Sequential by default so on-chain order
    /// matches input order; parallel is opt-in and gives that up. Reserved
    /// nonces are released on failure and reconciled on success.
    pub(crate) async fn broadcast_batch(
        &self,
        request_id: &str,
        batch: SignedBatch,
        options: &SignOptions,
        sink: &dyn ReplySink,
    ) -> Result<Vec<Value>, HostError> {
        let rpc = self.rpc_client()?;
        let nonce_manager = self.nonce_manager()?;
        let wait_until = options
            .wait_until
            .clone()
            .unwrap_or_else(|| DEFAULT_WAIT_UNTIL.to_string());
        let sequential = options.execute_sequentially.unwrap_or(true);

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(8, phases::BROADCASTING, "Broadcasting transactions"),
        );

        let mut results = Vec::with_capacity(batch.signed.len());

        if sequential {
            for tx in &batch.signed {
                if self.cancel.is_cancelled(request_id) {
                    release_remaining(&nonce_manager, &batch.reserved_nonces, tx.nonce);
                    return Err(HostError::cancelled());
                }

                match rpc.send_transaction(&tx.borsh_base64, &wait_until).await {
                    Ok(outcome) => {
                        nonce_manager.release_nonce(tx.nonce);
                        self.reconcile_after_broadcast(&nonce_manager, tx.nonce).await;
                        results.push(json!({
                            "transactionId": tx.hash,
                            "nonce": tx.nonce,
                            "receiverId": tx.receiver_id,
                            "outcome": outcome,
                        }));
                    }
                    Err(e) => {
                        release_remaining(&nonce_manager, &batch.reserved_nonces, tx.nonce);
                        return Err(self.map_broadcast_error(&nonce_manager, e).await);
                    }
                }
            }
        } else {
            // Parallel: results keep input order; completion order and
            // on-chain order do not.
            let sends = batch
                .signed
                .iter()
                .map(|tx| rpc.send_transaction(&tx.borsh_base64, &wait_until));
            let outcomes = futures::future::join_all(sends).await;

            let mut first_error: Option<String> = None;
            for (tx, outcome) in batch.signed.iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) => {
                        nonce_manager.release_nonce(tx.nonce);
                        self.reconcile_after_broadcast(&nonce_manager, tx.nonce).await;
                        results.push(json!({
                            "transactionId": tx.hash,
                            "nonce": tx.nonce,
                            "receiverId": tx.receiver_id,
                            "outcome": outcome,
                        }));
                    }
                    Err(e) => {
                        nonce_manager.release_nonce(tx.nonce);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(self.map_broadcast_error(&nonce_manager, e).await);
            }
        }

        self.emit(
            sink,
            request_id,
            ProgressPayload::success(9, phases::ACTION_COMPLETE, "Broadcast complete"),
        );

        Ok(results)
    }

    /// Background reconciliation after a successful broadcast; failures are
    /// logged, never surfaced; the business outcome is unchanged.
    async fn reconcile_after_broadcast(
        &self,
        nonce_manager: &crate::nonce_manager::NonceManager<T>,
        actual_nonce: u64,
    ) {
        if let Err(e) = nonce_manager.update_nonce_from_blockchain(actual_nonce).await {
            debug!("Nonce reconciliation failed (ignored): {}", e);
        }
    }

    async fn map_broadcast_error(
        &self,
        nonce_manager: &crate::nonce_manager::NonceManager<T>,
        error: String,
    ) -> HostError {
        if is_invalid_nonce_error(&error) {
            // Stale nonce: flush reservations and refetch so the caller's
            // retry starts from clean chain state.
            if let Err(e) = nonce_manager.refresh_now(true).await {
                debug!("refresh_now after INVALID_NONCE failed: {}", e);
            }
            HostError::new(ErrorCode::InvalidNonce, error)
        } else if crate::rpc::is_transient_rpc_error(&error) {
            HostError::new(ErrorCode::RpcTransient, error)
        } else {
            HostError::new(ErrorCode::BroadcastFailed, error)
        }
    }

    pub(crate) async fn handle_send_transaction(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: SendTransactionPayload = parse_payload(payload)?;
        if payload.signed_tx_base64.is_empty() {
            return Err(HostError::invalid_request("signedTxBase64 is required"));
        }

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(8, phases::BROADCASTING, "Broadcasting transaction"),
        );

        let rpc = self.rpc_client()?;
        let wait_until = payload
            .wait_until
            .unwrap_or_else(|| DEFAULT_WAIT_UNTIL.to_string());

        let outcome = rpc
            .send_transaction(&payload.signed_tx_base64, &wait_until)
            .await;

        match outcome {
            Ok(outcome) => {
                if let Some(nonce) = payload.nonce {
                    if let Ok(nonce_manager) = self.nonce_manager() {
                        if nonce_manager.is_initialized() {
                            nonce_manager.release_nonce(nonce);
                            self.reconcile_after_broadcast(&nonce_manager, nonce).await;
                        }
                    }
                }
                self.emit(
                    sink,
                    request_id,
                    ProgressPayload::success(9, phases::ACTION_COMPLETE, "Broadcast complete"),
                );
                Ok(json!({ "outcome": outcome }))
            }
            Err(e) => {
                if let Some(nonce) = payload.nonce {
                    if let Ok(nonce_manager) = self.nonce_manager() {
                        nonce_manager.release_nonce(nonce);
                    }
                }
                let nonce_manager = self.nonce_manager()?;
                Err(self.map_broadcast_error(&nonce_manager, e).await)
            }
        }
    }

    // ========================================================================
    // NEP-413 MESSAGE SIGNING
    // ========================================================================

    pub(crate) async fn handle_sign_nep413(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: SignNep413Payload = parse_payload(payload)?;
        let account_id = payload.near_account_id.clone();

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(1, phases::PREPARATION, "Preparing message signing"),
        );

        let login = self
            .login
            .borrow()
            .clone()
            .filter(|l| l.near_account_id == account_id)
            .ok_or_else(|| {
                HostError::invalid_request(format!("Not logged in as {}", account_id))
            })?;
        let key_record = self
            .keys
            .get(&account_id, login.device_index)
            .ok_or_else(|| HostError::invalid_request("No encrypted key record"))?;

        // --- Confirmation ---
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(2, phases::USER_CONFIRMATION, "Awaiting user confirmation"),
        );
        let stored = self.prefs.get(&account_id).confirmation_config;
        let effective =
            merge_confirmation_config(payload.confirmation_config.as_ref(), Some(&stored));
        let summary = ConfirmationSummary {
            near_account_id: account_id.clone(),
            intents: vec![ConfirmationIntent {
                receiver_id: payload.recipient.clone(),
                action_summary: format!("Sign message: {}", payload.message),
                amount: None,
            }],
        };
        if self.confirm.clone().present(&summary, &effective).await == Decision::Cancelled {
            self.emit(
                sink,
                request_id,
                ProgressPayload::error(phases::ACTION_ERROR, "User cancelled confirmation"),
            );
            return Err(HostError::cancelled());
        }
        self.cancel.ensure_live(request_id)?;

        // --- VRF challenge + assertion ---
        let nonce_manager = self.nonce_manager()?;
        let context = nonce_manager
            .get_nonce_block_hash_and_height(false)
            .await
            .map_err(|e| HostError::new(ErrorCode::RpcTransient, e))?;
        let config = self.service_config()?;
        let rp_id = compute_rp_id(&self.host_name, config.rp_id_override.as_deref());
        let vrf_challenge = self
            .vrf
            .generate_challenge(VrfChallengeInput {
                user_id: account_id.clone(),
                rp_id,
                block_height: context.tx_block_height.clone(),
                block_hash: context.tx_block_hash.clone(),
            })
            .await?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(4, phases::WEBAUTHN_AUTHENTICATION, "Authenticating"),
        );
        let outcome = self
            .authenticate(&account_id, Some(webauthn_challenge_from_vrf(&vrf_challenge)?))
            .await?;
        self.cancel.ensure_live(request_id)?;
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(5, phases::AUTHENTICATION_COMPLETE, "Authenticated"),
        );

        // --- Sign in the worker (step 6 differs: NEP-413 payload) ---
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(6, phases::TRANSACTION_SIGNING_PROGRESS, "Signing message"),
        );
        let result: wasm_signer_worker::SignNep413Result = self
            .signer
            .request(
                SignerRequestType::SignNep413Message,
                &json!({
                    "accountId": account_id,
                    "message": payload.message,
                    "recipient": payload.recipient,
                    "nonce": payload.nonce,
                    "state": payload.state,
                    "decryption": DecryptionPayload {
                        encrypted_private_key_data: key_record.ciphertext.clone(),
                        encrypted_private_key_chacha20_nonce_b64u: key_record.iv.clone(),
                        chacha20_prf_output: outcome.prf.chacha20_prf_output.clone(),
                    },
                }),
            )
            .await
            .map_err(signer_error)?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::success(7, phases::TRANSACTION_SIGNING_COMPLETE, "Message signed"),
        );

        serde_json::to_value(result).map_err(|e| HostError::host(e.to_string()))
    }

    // ========================================================================
    // KEY EXPORT
    // ========================================================================

    pub(crate) async fn handle_export_keypair(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: ExportKeypairPayload = parse_payload(payload)?;
        let account_id = payload.near_account_id.clone();

        let login = self
            .login
            .borrow()
            .clone()
            .filter(|l| l.near_account_id == account_id)
            .ok_or_else(|| {
                HostError::invalid_request(format!("Not logged in as {}", account_id))
            })?;
        let key_record = self
            .keys
            .get(&account_id, login.device_index)
            .ok_or_else(|| HostError::invalid_request("No encrypted key record"))?;

        // Export always confirms, regardless of stored auto-proceed prefs.
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(2, phases::USER_CONFIRMATION, "Confirm private key export"),
        );
        let config = wasm_signer_worker::ConfirmationConfig::default();
        let summary = ConfirmationSummary {
            near_account_id: account_id.clone(),
            intents: vec![ConfirmationIntent {
                receiver_id: account_id.clone(),
                action_summary: "Export private key".to_string(),
                amount: None,
            }],
        };
        if self.confirm.clone().present(&summary, &config).await == Decision::Cancelled {
            return Err(HostError::cancelled());
        }
        self.cancel.ensure_live(request_id)?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(4, phases::WEBAUTHN_AUTHENTICATION, "Authenticating"),
        );
        let outcome = self.authenticate(&account_id, None).await?;
        self.cancel.ensure_live(request_id)?;

        let result: wasm_signer_worker::DecryptPrivateKeyResult = self
            .signer
            .request(
                SignerRequestType::DecryptPrivateKeyWithPrf,
                &json!({
                    "nearAccountId": account_id,
                    "decryption": DecryptionPayload {
                        encrypted_private_key_data: key_record.ciphertext.clone(),
                        encrypted_private_key_chacha20_nonce_b64u: key_record.iv.clone(),
                        chacha20_prf_output: outcome.prf.chacha20_prf_output.clone(),
                    },
                }),
            )
            .await
            .map_err(signer_error)?;

        serde_json::to_value(result).map_err(|e| HostError::host(e.to_string()))
    }

    // ========================================================================
    // ACCOUNT RECOVERY
    // ========================================================================

    pub(crate) async fn handle_recover_account(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: RecoverAccountPayload = parse_payload(payload)?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(
                4,
                phases::RECOVERY_AUTHENTICATION,
                "Authenticate with the passkey to recover",
            ),
        );

        // Discoverable-credential assertion: no allowCredentials, so the
        // platform surfaces whatever passkeys exist for this rpId.
        let config = self.service_config()?;
        let rp_id = compute_rp_id(&self.host_name, config.rp_id_override.as_deref());
        let account_hint = payload.account_id_hint.clone();
        let salts_account = account_hint.clone().unwrap_or_default();
        if salts_account.is_empty() {
            return Err(HostError::new(
                ErrorCode::RecoveryFailed,
                "accountIdHint is required to derive recovery keys",
            ));
        }
        let (chacha20_salt, ed25519_salt) = prf_salts_for_account(&salts_account);

        let outcome = self
            .webauthn
            .get_credential(AuthenticationCeremonyOptions {
                rp_id,
                challenge_b64u: random_challenge_b64u()?,
                allow_credentials: vec![],
                user_verification: "preferred".to_string(),
                chacha20_salt_b64u: chacha20_salt,
                ed25519_salt_b64u: ed25519_salt,
            })
            .await
            .map_err(|e| match e.code {
                ErrorCode::Cancelled | ErrorCode::PrfUnavailable => e,
                _ => HostError::new(ErrorCode::RecoveryFailed, e.message),
            })?;
        self.cancel.ensure_live(request_id)?;
        self.emit(
            sink,
            request_id,
            ProgressPayload::step(5, phases::AUTHENTICATION_COMPLETE, "Authenticated"),
        );

        // The account comes from the credential's user handle when present,
        // else from the caller's hint.
        let account_id = outcome
            .credential
            .response
            .user_handle
            .as_deref()
            .and_then(|h| base64_url_decode(h).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(|handle| crate::config::parse_user_handle(&handle).0)
            .or(account_hint)
            .ok_or_else(|| {
                HostError::new(
                    ErrorCode::RecoveryFailed,
                    "Could not determine the account to recover",
                )
            })?;

        // Regenerate and re-encrypt the NEAR keypair from the PRF outputs.
        let recovered: wasm_signer_worker::RecoverKeypairResult = self
            .signer
            .request(
                SignerRequestType::RecoverKeypairFromPasskey,
                &json!({
                    "credential": {
                        "id": &outcome.credential.id,
                        "rawId": &outcome.credential.raw_id,
                        "type": &outcome.credential.credential_type,
                        "authenticatorAttachment": &outcome.credential.authenticator_attachment,
                        "response": &outcome.credential.response,
                        "clientExtensionResults": {
                            "prf": { "results": {
                                "first": &outcome.prf.chacha20_prf_output,
                                "second": &outcome.prf.ed25519_prf_output,
                            }},
                        },
                    },
                    "accountIdHint": &account_id,
                }),
            )
            .await
            .map_err(|e| HostError::new(ErrorCode::RecoveryFailed, e))?;

        // Rebuild the VRF identity deterministically and persist it.
        let vrf_derived = self
            .vrf
            .derive_keypair_from_prf(&account_id, &outcome.prf.chacha20_prf_output, None, true)
            .await?;
        let encrypted_vrf_keypair = vrf_derived
            .get("encrypted_vrf_keypair")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        self.vrf_keys
            .put(
                &account_id,
                &VrfKeypairRecord {
                    encrypted_vrf_keypair,
                    server_encrypted_vrf_keypair: None,
                },
            )
            .map_err(HostError::host)?;

        // The recovered key is surfaced and stored under a fresh device
        // index; it does not overwrite another device's record.
        let device_index = next_device_index(&self.keys.device_indices(&account_id));
        let key_record = EncryptedKeyRecord {
            account_id: account_id.clone(),
            device_index,
            ciphertext: recovered.encrypted_data.clone(),
            iv: recovered.iv.clone(),
            public_key: recovered.public_key.clone(),
            created_at: now_ms(),
        };
        let authenticator_record = AuthenticatorRecord {
            credential_id: outcome.credential.id.clone(),
            transports: vec!["internal".to_string()],
            cose_public_key_b64u: None,
            device_index,
            created_at: now_ms(),
            user_verification: "preferred".to_string(),
        };
        register_atomically(&self.keys, &self.authenticators, &key_record, authenticator_record)
            .map_err(|e| HostError::new(ErrorCode::RecoveryFailed, e))?;

        let nonce_manager = self.nonce_manager()?;
        nonce_manager.initialize(&account_id, &recovered.public_key);
        *self.login.borrow_mut() = Some(LoginState {
            near_account_id: account_id.clone(),
            public_key: recovered.public_key.clone(),
            device_index,
        });
        self.prefs
            .update_last_login(&account_id)
            .map_err(HostError::host)?;

        self.emit(
            sink,
            request_id,
            ProgressPayload::success(9, phases::ACTION_COMPLETE, "Account recovered"),
        );

        Ok(json!({
            "success": true,
            "nearAccountId": account_id,
            "publicKey": recovered.public_key,
            "deviceIndex": device_index,
        }))
    }

    // ========================================================================
    // DEVICE LINKING
    // ========================================================================

    /// Device-1 side: the scanned QR carries the new device's derived public
    /// key; signing an AddKey for it authorizes the new device on-chain.
    pub(crate) async fn handle_link_device_with_qr(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> Result<Value, HostError> {
        let payload: LinkDeviceWithQrPayload = parse_payload(payload)?;
        let qr = payload.qr_data;
        let options = payload.options.unwrap_or_default();

        if qr.device_public_key.is_empty() {
            return Err(HostError::new(
                ErrorCode::LinkDeviceInitFailed,
                "QR payload is missing the device public key",
            ));
        }

        self.emit(
            sink,
            request_id,
            ProgressPayload::step(
                2,
                phases::DEVICE_LINK_AUTHORIZATION,
                format!("Authorize device {} for {}", qr.device_index, qr.near_account_id),
            ),
        );

        let transactions = vec![TransactionInput {
            receiver_id: qr.near_account_id.clone(),
            actions: vec![ActionParams::AddKey {
                public_key: qr.device_public_key.clone(),
                access_key: r#"{"nonce":0,"permission":{"FullAccess":{}}}"#.to_string(),
            }],
        }];

        let batch = self
            .signing_pipeline(request_id, &qr.near_account_id, &transactions, &options, sink)
            .await
            .map_err(|e| match e.code {
                ErrorCode::Cancelled => e,
                _ => HostError::new(ErrorCode::LinkDeviceInitFailed, e.message),
            })?;

        let results = self
            .broadcast_batch(request_id, batch, &options, sink)
            .await
            .map_err(|e| match e.code {
                ErrorCode::Cancelled => e,
                _ => HostError::new(ErrorCode::LinkDeviceInitFailed, e.message),
            })?;

        Ok(json!({
            "success": true,
            "linkedDeviceIndex": qr.device_index,
            "transactions": results,
        }))
    }

    /// Device-2 side. Registers a passkey locally, surfaces the QR payload
    /// (public key + device index) in the terminal result, then keeps
    /// polling the chain until Device-1's AddKey lands; those late events
    /// reach the caller through its sticky progress subscriber.
    pub(crate) async fn handle_start_device2_linking(
        &self,
        request_id: &str,
        payload: Value,
        sink: &dyn ReplySink,
    ) -> RouteOutcome {
        let payload: StartDevice2LinkingPayload = match parse_payload(payload) {
            Ok(p) => p,
            Err(e) => return RouteOutcome::Reply(Err(e)),
        };
        let account_id = payload.near_account_id.clone();

        // Local registration (passkey + derived keys) on the new device.
        let register_result = self
            .handle_register(
                request_id,
                json!({ "nearAccountId": &account_id }),
                sink,
            )
            .await;
        let registered = match register_result {
            Ok(v) => v,
            Err(e) => {
                let mapped = match e.code {
                    ErrorCode::Cancelled | ErrorCode::PrfUnavailable => e,
                    _ => HostError::new(ErrorCode::LinkDeviceInitFailed, e.message),
                };
                return RouteOutcome::Reply(Err(mapped));
            }
        };

        let public_key = registered
            .get("publicKey")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let device_index = registered
            .get("deviceIndex")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;

        // Terminal reply now: the caller renders the QR from this payload.
        sink.send(ChildEnvelope::result(
            request_id,
            crate::dispatcher::wrap_ok(json!({
                "success": true,
                "qrData": LinkDeviceQrPayload {
                    near_account_id: account_id.clone(),
                    device_public_key: public_key.clone(),
                    device_index,
                },
            })),
        ));

        // Post-terminal polling; the router's sticky subscriber keeps
        // receiving these until stop or completion.
        let stop_flag = std::rc::Rc::new(std::cell::Cell::new(false));
        *self.device2_stop.borrow_mut() = Some(stop_flag.clone());

        let poll_interval = payload.poll_interval_ms.unwrap_or(2_000);
        let max_attempts = payload.max_poll_attempts.unwrap_or(30);

        for attempt in 1..=max_attempts {
            if stop_flag.get() || self.cancel.is_cancelled(request_id) {
                self.emit(
                    sink,
                    request_id,
                    ProgressPayload::error(phases::DEVICE_LINK_ERROR, "Device linking stopped"),
                );
                return RouteOutcome::AlreadyReplied;
            }

            let visible = match self.rpc_client() {
                Ok(rpc) => rpc
                    .view_access_key(&account_id, &public_key)
                    .await
                    .is_ok(),
                Err(_) => false,
            };

            if visible {
                self.emit(
                    sink,
                    request_id,
                    ProgressPayload::success(
                        9,
                        phases::DEVICE_LINK_REGISTRATION,
                        "Device key is visible on-chain",
                    ),
                );
                return RouteOutcome::AlreadyReplied;
            }

            self.emit(
                sink,
                request_id,
                ProgressPayload::step(
                    8,
                    phases::DEVICE_LINK_REGISTRATION,
                    format!("Waiting for authorization ({}/{})", attempt, max_attempts),
                ),
            );
            crate::utils::sleep_ms(poll_interval).await;
        }

        self.emit(
            sink,
            request_id,
            ProgressPayload::error(
                phases::DEVICE_LINK_ERROR,
                "Timed out waiting for the device key on-chain",
            ),
        );
        RouteOutcome::AlreadyReplied
    }
}

fn next_device_index(existing: &[u32]) -> u32 {
    existing.iter().copied().max().map(|m| m + 1).unwrap_or(1)
}

fn release_remaining<T: RpcTransport + 'static>(
    nonce_manager: &crate::nonce_manager::NonceManager<T>,
    reserved: &[u64],
    from_nonce: u64,
) {
    for nonce in reserved.iter().filter(|n| **n >= from_nonce) {
        nonce_manager.release_nonce(*nonce);
    }
}
