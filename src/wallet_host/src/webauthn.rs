//! WebAuthn ceremony plumbing. The dispatcher talks to a `WebAuthnProvider`
//! so flows stay testable: the browser implementation drives
//! `navigator.credentials`, the native fake produces deterministic PRF
//! outputs for tests.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use wasm_signer_worker::{DualPrfOutputs, SerializedCredential, SerializedRegistrationCredential};

use crate::error::HostError;
use crate::utils::base64_url_encode;

// === PRF SALTS ===

/// PRF eval inputs for a WebAuthn ceremony: `first` keys encryption,
/// `second` keys signing. The authenticator sees only these digests.
pub fn prf_salts_for_account(account_id: &str) -> (String, String) {
    let chacha20 = Sha256::digest(format!("chacha20-salt:{}", account_id).as_bytes());
    let ed25519 = Sha256::digest(format!("ed25519-salt:{}", account_id).as_bytes());
    (base64_url_encode(&chacha20), base64_url_encode(&ed25519))
}

// === CEREMONY OPTIONS ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowCredential {
    pub id_b64u: String,
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCeremonyOptions {
    pub rp_id: String,
    /// First 32 bytes of the VRF output, base64url.
    pub challenge_b64u: String,
    pub allow_credentials: Vec<AllowCredential>,
    pub user_verification: String,
    pub chacha20_salt_b64u: String,
    pub ed25519_salt_b64u: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCeremonyOptions {
    pub rp_id: String,
    pub rp_name: String,
    pub challenge_b64u: String,
    /// Device-scoped user handle bytes, base64url.
    pub user_id_b64u: String,
    pub user_name: String,
    pub user_display_name: String,
    pub user_verification: String,
    pub chacha20_salt_b64u: String,
    pub ed25519_salt_b64u: String,
}

/// A completed ceremony: the serialized credential plus both PRF outputs.
pub struct CeremonyOutcome<C> {
    pub credential: C,
    pub prf: DualPrfOutputs,
}

pub trait WebAuthnProvider {
    fn create_credential(
        &self,
        options: RegistrationCeremonyOptions,
    ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedRegistrationCredential>, HostError>>;

    fn get_credential(
        &self,
        options: AuthenticationCeremonyOptions,
    ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedCredential>, HostError>>;
}

// === BROWSER PROVIDER ===

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserWebAuthnProvider;

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::*;
    use crate::error::{webauthn_error, ErrorCode};
    use crate::utils::base64_url_decode;
    use futures::FutureExt;
    use js_sys::{Array, Object, Reflect, Uint8Array};
    use log::warn;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use wasm_bindgen_futures::JsFuture;

    /// Drives `navigator.credentials` with the PRF extension enabled.
    pub struct BrowserWebAuthnProvider;

    impl WebAuthnProvider for BrowserWebAuthnProvider {
        fn create_credential(
            &self,
            options: RegistrationCeremonyOptions,
        ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedRegistrationCredential>, HostError>>
        {
            async move { create_credential_impl(options).await }.boxed_local()
        }

        fn get_credential(
            &self,
            options: AuthenticationCeremonyOptions,
        ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedCredential>, HostError>>
        {
            async move { get_credential_impl(options).await }.boxed_local()
        }
    }

    fn set(obj: &Object, key: &str, value: &JsValue) -> Result<(), HostError> {
        Reflect::set(obj, &JsValue::from_str(key), value)
            .map(|_| ())
            .map_err(|_| HostError::host(format!("Failed to set {}", key)))
    }

    fn bytes_value(b64u: &str) -> Result<JsValue, HostError> {
        let bytes = base64_url_decode(b64u)
            .map_err(|e| HostError::host(format!("Invalid base64url: {}", e)))?;
        Ok(Uint8Array::from(bytes.as_slice()).buffer().into())
    }

    fn prf_extension(chacha20_salt_b64u: &str, ed25519_salt_b64u: &str) -> Result<JsValue, HostError> {
        let eval = Object::new();
        set(&eval, "first", &bytes_value(chacha20_salt_b64u)?)?;
        set(&eval, "second", &bytes_value(ed25519_salt_b64u)?)?;
        let prf = Object::new();
        set(&prf, "eval", &eval)?;
        let extensions = Object::new();
        set(&extensions, "prf", &prf)?;
        Ok(extensions.into())
    }

    fn credentials_container() -> Result<JsValue, HostError> {
        let global = js_sys::global();
        let navigator = Reflect::get(&global, &JsValue::from_str("navigator"))
            .map_err(|_| HostError::host("navigator is not available"))?;
        Reflect::get(&navigator, &JsValue::from_str("credentials"))
            .map_err(|_| HostError::host("navigator.credentials is not available"))
    }

    async fn invoke_ceremony(method: &str, public_key: JsValue) -> Result<JsValue, HostError> {
        let container = credentials_container()?;
        let method_fn: js_sys::Function = Reflect::get(&container, &JsValue::from_str(method))
            .map_err(|_| HostError::host(format!("credentials.{} missing", method)))?
            .dyn_into()
            .map_err(|_| HostError::host(format!("credentials.{} is not a function", method)))?;

        let args = Object::new();
        set(&args, "publicKey", &public_key)?;

        let promise: js_sys::Promise = method_fn
            .call1(&container, &args)
            .map_err(|e| webauthn_error(format!("{:?}", e)))?
            .dyn_into()
            .map_err(|_| HostError::host("credentials call did not return a Promise"))?;

        JsFuture::from(promise)
            .await
            .map_err(|e| webauthn_error(format!("{:?}", e)))
    }

    fn get_string(obj: &JsValue, key: &str) -> Option<String> {
        Reflect::get(obj, &JsValue::from_str(key))
            .ok()
            .and_then(|v| v.as_string())
    }

    fn get_buffer_b64u(obj: &JsValue, key: &str) -> Option<String> {
        let value = Reflect::get(obj, &JsValue::from_str(key)).ok()?;
        if value.is_undefined() || value.is_null() {
            return None;
        }
        let array = Uint8Array::new(&value);
        Some(base64_url_encode(&array.to_vec()))
    }

    /// Extract both PRF outputs from `getClientExtensionResults()`. Absence
    /// means the platform authenticator does not support PRF; the flow must
    /// refuse rather than continue with a half-initialized identity.
    fn extract_prf(credential: &JsValue) -> Result<DualPrfOutputs, HostError> {
        let get_ext: js_sys::Function =
            Reflect::get(credential, &JsValue::from_str("getClientExtensionResults"))
                .ok()
                .and_then(|f| f.dyn_into().ok())
                .ok_or_else(|| HostError::host("getClientExtensionResults missing"))?;
        let results = get_ext
            .call0(credential)
            .map_err(|e| HostError::host(format!("getClientExtensionResults failed: {:?}", e)))?;

        let prf = Reflect::get(&results, &JsValue::from_str("prf")).ok();
        let outputs = prf
            .as_ref()
            .and_then(|p| Reflect::get(p, &JsValue::from_str("results")).ok());

        let first = outputs.as_ref().and_then(|o| get_buffer_b64u(o, "first"));
        let second = outputs.as_ref().and_then(|o| get_buffer_b64u(o, "second"));

        match (first, second) {
            (Some(first), Some(second)) => Ok(DualPrfOutputs {
                chacha20_prf_output: first,
                ed25519_prf_output: second,
            }),
            _ => {
                warn!(
                    "Credential response lacked PRF outputs; this authenticator \
                     (or browser) does not support the WebAuthn PRF extension"
                );
                Err(HostError::new(
                    ErrorCode::PrfUnavailable,
                    "Credential response did not include PRF outputs",
                ))
            }
        }
    }

    async fn create_credential_impl(
        options: RegistrationCeremonyOptions,
    ) -> Result<CeremonyOutcome<SerializedRegistrationCredential>, HostError> {
        let public_key = Object::new();
        set(&public_key, "challenge", &bytes_value(&options.challenge_b64u)?)?;

        let rp = Object::new();
        set(&rp, "id", &JsValue::from_str(&options.rp_id))?;
        set(&rp, "name", &JsValue::from_str(&options.rp_name))?;
        set(&public_key, "rp", &rp)?;

        let user = Object::new();
        set(&user, "id", &bytes_value(&options.user_id_b64u)?)?;
        set(&user, "name", &JsValue::from_str(&options.user_name))?;
        set(
            &user,
            "displayName",
            &JsValue::from_str(&options.user_display_name),
        )?;
        set(&public_key, "user", &user)?;

        let params = Array::new();
        let ed25519 = Object::new();
        set(&ed25519, "type", &JsValue::from_str("public-key"))?;
        set(&ed25519, "alg", &JsValue::from_f64(-8.0))?;
        params.push(&ed25519);
        let es256 = Object::new();
        set(&es256, "type", &JsValue::from_str("public-key"))?;
        set(&es256, "alg", &JsValue::from_f64(-7.0))?;
        params.push(&es256);
        set(&public_key, "pubKeyCredParams", &params)?;

        let selection = Object::new();
        set(&selection, "residentKey", &JsValue::from_str("required"))?;
        set(
            &selection,
            "userVerification",
            &JsValue::from_str(&options.user_verification),
        )?;
        set(&public_key, "authenticatorSelection", &selection)?;
        set(&public_key, "attestation", &JsValue::from_str("none"))?;
        set(
            &public_key,
            "extensions",
            &prf_extension(&options.chacha20_salt_b64u, &options.ed25519_salt_b64u)?,
        )?;

        let credential = invoke_ceremony("create", public_key.into()).await?;
        let prf = extract_prf(&credential)?;

        let response = Reflect::get(&credential, &JsValue::from_str("response"))
            .map_err(|_| HostError::host("credential.response missing"))?;

        let transports = Reflect::get(&response, &JsValue::from_str("getTransports"))
            .ok()
            .and_then(|f| f.dyn_into::<js_sys::Function>().ok())
            .and_then(|f| f.call0(&response).ok())
            .map(|arr| {
                Array::from(&arr)
                    .iter()
                    .filter_map(|v| v.as_string())
                    .collect::<Vec<_>>()
            });

        let serialized = SerializedRegistrationCredential {
            id: get_string(&credential, "id").unwrap_or_default(),
            raw_id: get_buffer_b64u(&credential, "rawId").unwrap_or_default(),
            credential_type: "public-key".to_string(),
            authenticator_attachment: get_string(&credential, "authenticatorAttachment"),
            response: wasm_signer_worker::WebAuthnRegistrationResponse {
                client_data_json: get_buffer_b64u(&response, "clientDataJSON").unwrap_or_default(),
                attestation_object: get_buffer_b64u(&response, "attestationObject")
                    .unwrap_or_default(),
                transports,
            },
            client_extension_results: Default::default(),
        };

        Ok(CeremonyOutcome {
            credential: serialized,
            prf,
        })
    }

    async fn get_credential_impl(
        options: AuthenticationCeremonyOptions,
    ) -> Result<CeremonyOutcome<SerializedCredential>, HostError> {
        let public_key = Object::new();
        set(&public_key, "challenge", &bytes_value(&options.challenge_b64u)?)?;
        set(&public_key, "rpId", &JsValue::from_str(&options.rp_id))?;
        set(
            &public_key,
            "userVerification",
            &JsValue::from_str(&options.user_verification),
        )?;

        let allow = Array::new();
        for cred in &options.allow_credentials {
            let entry = Object::new();
            set(&entry, "type", &JsValue::from_str("public-key"))?;
            set(&entry, "id", &bytes_value(&cred.id_b64u)?)?;
            let transports = Array::new();
            for t in &cred.transports {
                transports.push(&JsValue::from_str(t));
            }
            set(&entry, "transports", &transports)?;
            allow.push(&entry);
        }
        if allow.length() > 0 {
            set(&public_key, "allowCredentials", &allow)?;
        }

        set(
            &public_key,
            "extensions",
            &prf_extension(&options.chacha20_salt_b64u, &options.ed25519_salt_b64u)?,
        )?;

        let credential = invoke_ceremony("get", public_key.into()).await?;
        let prf = extract_prf(&credential)?;

        let response = Reflect::get(&credential, &JsValue::from_str("response"))
            .map_err(|_| HostError::host("credential.response missing"))?;

        let serialized = SerializedCredential {
            id: get_string(&credential, "id").unwrap_or_default(),
            raw_id: get_buffer_b64u(&credential, "rawId").unwrap_or_default(),
            credential_type: "public-key".to_string(),
            authenticator_attachment: get_string(&credential, "authenticatorAttachment"),
            response: wasm_signer_worker::WebAuthnAuthenticationResponse {
                client_data_json: get_buffer_b64u(&response, "clientDataJSON").unwrap_or_default(),
                authenticator_data: get_buffer_b64u(&response, "authenticatorData")
                    .unwrap_or_default(),
                signature: get_buffer_b64u(&response, "signature").unwrap_or_default(),
                user_handle: get_buffer_b64u(&response, "userHandle"),
            },
            client_extension_results: Default::default(),
        };

        Ok(CeremonyOutcome {
            credential: serialized,
            prf,
        })
    }
}

// === NATIVE FAKE PROVIDER ===

/// Deterministic provider for native tests: PRF outputs are digests of the
/// (salt, user) pair, so the same "authenticator" always derives the same
/// keys. Failure knobs simulate cancellations and PRF-less authenticators.
#[cfg(not(target_arch = "wasm32"))]
pub struct FakeWebAuthnProvider {
    pub device_seed: String,
    pub fail_with: std::cell::RefCell<Option<String>>,
    pub omit_prf: std::cell::Cell<bool>,
    pub ceremonies: std::cell::Cell<u32>,
}

#[cfg(not(target_arch = "wasm32"))]
impl FakeWebAuthnProvider {
    pub fn new(device_seed: &str) -> Self {
        Self {
            device_seed: device_seed.to_string(),
            fail_with: std::cell::RefCell::new(None),
            omit_prf: std::cell::Cell::new(false),
            ceremonies: std::cell::Cell::new(0),
        }
    }

    fn prf_for(&self, salt_b64u: &str) -> String {
        let digest = Sha256::digest(format!("{}|{}", self.device_seed, salt_b64u).as_bytes());
        base64_url_encode(&digest)
    }

    fn check_failure(&self) -> Result<(), HostError> {
        if let Some(message) = self.fail_with.borrow().clone() {
            return Err(crate::error::webauthn_error(message));
        }
        Ok(())
    }

    fn prf_outputs(
        &self,
        chacha20_salt_b64u: &str,
        ed25519_salt_b64u: &str,
    ) -> Result<DualPrfOutputs, HostError> {
        if self.omit_prf.get() {
            return Err(HostError::new(
                crate::error::ErrorCode::PrfUnavailable,
                "Credential response did not include PRF outputs",
            ));
        }
        Ok(DualPrfOutputs {
            chacha20_prf_output: self.prf_for(chacha20_salt_b64u),
            ed25519_prf_output: self.prf_for(ed25519_salt_b64u),
        })
    }

    fn credential_id(&self, user: &str) -> String {
        base64_url_encode(&Sha256::digest(
            format!("cred|{}|{}", self.device_seed, user).as_bytes(),
        ))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl WebAuthnProvider for FakeWebAuthnProvider {
    fn create_credential(
        &self,
        options: RegistrationCeremonyOptions,
    ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedRegistrationCredential>, HostError>>
    {
        use futures::FutureExt;
        self.ceremonies.set(self.ceremonies.get() + 1);
        let result = self.check_failure().and_then(|_| {
            let prf = self.prf_outputs(&options.chacha20_salt_b64u, &options.ed25519_salt_b64u)?;
            let credential = SerializedRegistrationCredential {
                id: self.credential_id(&options.user_name),
                raw_id: self.credential_id(&options.user_name),
                credential_type: "public-key".to_string(),
                authenticator_attachment: Some("platform".to_string()),
                response: wasm_signer_worker::WebAuthnRegistrationResponse {
                    client_data_json: base64_url_encode(b"{\"type\":\"webauthn.create\"}"),
                    attestation_object: base64_url_encode(b"fake-attestation"),
                    transports: Some(vec!["internal".to_string()]),
                },
                client_extension_results: Default::default(),
            };
            Ok(CeremonyOutcome { credential, prf })
        });
        async move { result }.boxed_local()
    }

    fn get_credential(
        &self,
        options: AuthenticationCeremonyOptions,
    ) -> LocalBoxFuture<'static, Result<CeremonyOutcome<SerializedCredential>, HostError>> {
        use futures::FutureExt;
        self.ceremonies.set(self.ceremonies.get() + 1);
        let result = self.check_failure().and_then(|_| {
            let prf = self.prf_outputs(&options.chacha20_salt_b64u, &options.ed25519_salt_b64u)?;
            let credential = SerializedCredential {
                id: self.credential_id("auth"),
                raw_id: self.credential_id("auth"),
                credential_type: "public-key".to_string(),
                authenticator_attachment: Some("platform".to_string()),
                response: wasm_signer_worker::WebAuthnAuthenticationResponse {
                    client_data_json: base64_url_encode(b"{\"type\":\"webauthn.get\"}"),
                    authenticator_data: base64_url_encode(b"fake-authenticator-data"),
                    signature: base64_url_encode(b"fake-signature"),
                    user_handle: None,
                },
                client_extension_results: Default::default(),
            };
            Ok(CeremonyOutcome { credential, prf })
        });
        async move { result }.boxed_local()
    }
}
