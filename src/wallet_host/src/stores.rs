//! Durable stores inside the wallet origin: encrypted key records,
//! authenticator records, and user preferences. All three sit on a small
//! `StorageBackend` so the browser uses `localStorage` while native tests
//! use an in-memory map.

use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wasm_signer_worker::ConfirmationConfig;

use crate::utils::now_ms;

// === BACKEND ===

pub trait StorageBackend {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str);
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// In-memory backend for native tests and ephemeral sessions.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .borrow()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// `localStorage`-backed store in the wallet origin.
#[cfg(target_arch = "wasm32")]
pub struct LocalStorageBackend {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl LocalStorageBackend {
    pub fn new() -> Result<Self, String> {
        let storage = web_sys::window()
            .ok_or("No window available")?
            .local_storage()
            .map_err(|_| "localStorage is not accessible")?
            .ok_or("localStorage is not available")?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl StorageBackend for LocalStorageBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.storage.get_item(key).ok().flatten()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.storage
            .set_item(key, value)
            .map_err(|e| format!("localStorage write failed: {:?}", e))
    }

    fn remove(&self, key: &str) {
        let _ = self.storage.remove_item(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let len = self.storage.length().unwrap_or(0);
        for i in 0..len {
            if let Ok(Some(key)) = self.storage.key(i) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

// === RECORD TYPES ===

/// The sole on-device custody of a NEAR private key: AEAD ciphertext plus
/// nonce, keyed by `(accountId, deviceIndex)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyRecord {
    pub account_id: String,
    pub device_index: u32,
    pub ciphertext: String,
    pub iv: String,
    pub public_key: String,
    pub created_at: f64,
}

/// Platform authenticator bound at registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorRecord {
    pub credential_id: String,
    pub transports: Vec<String>,
    pub cose_public_key_b64u: Option<String>,
    pub device_index: u32,
    pub created_at: f64,
    pub user_verification: String,
}

/// Per-account preferences plus the host-global login hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPreferences {
    pub confirmation_config: ConfirmationConfig,
    pub theme: String,
    #[serde(default)]
    pub last_login_at: Option<f64>,
}

impl Default for AccountPreferences {
    fn default() -> Self {
        Self {
            confirmation_config: ConfirmationConfig::default(),
            theme: "dark".to_string(),
            last_login_at: None,
        }
    }
}

/// VRF keypair at rest for one account: always the PRF-encrypted form,
/// plus the server-locked variant when the Shamir relay is in use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VrfKeypairRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_vrf_keypair: Option<wasm_vrf_worker::EncryptedVrfKeypair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_encrypted_vrf_keypair: Option<wasm_vrf_worker::ServerEncryptedVrfKeypair>,
}

// === KEY NAMESPACES ===

const KEY_PREFIX: &str = "passlock.keys.";
const AUTH_PREFIX: &str = "passlock.authenticators.";
const PREFS_PREFIX: &str = "passlock.prefs.";
const VRF_PREFIX: &str = "passlock.vrf.";
const LAST_USER_KEY: &str = "passlock.lastUser";
const RECENT_LOGINS_KEY: &str = "passlock.recentLogins";

fn key_record_key(account_id: &str, device_index: u32) -> String {
    format!("{}{}#{}", KEY_PREFIX, account_id, device_index)
}

// === ENCRYPTED KEY STORE ===

pub struct EncryptedKeyStore<B: StorageBackend> {
    backend: Rc<B>,
}

impl<B: StorageBackend> EncryptedKeyStore<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    pub fn get(&self, account_id: &str, device_index: u32) -> Option<EncryptedKeyRecord> {
        self.backend
            .get(&key_record_key(account_id, device_index))
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    /// At most one record per `(accountId, deviceIndex)`: writing replaces.
    pub fn put(&self, record: &EncryptedKeyRecord) -> Result<(), String> {
        let raw = serde_json::to_string(record)
            .map_err(|e| format!("Failed to serialize key record: {}", e))?;
        self.backend
            .set(&key_record_key(&record.account_id, record.device_index), &raw)
    }

    pub fn delete(&self, account_id: &str, device_index: u32) {
        self.backend.remove(&key_record_key(account_id, device_index));
    }

    pub fn device_indices(&self, account_id: &str) -> Vec<u32> {
        let prefix = format!("{}{}#", KEY_PREFIX, account_id);
        let mut indices: Vec<u32> = self
            .backend
            .keys_with_prefix(&prefix)
            .iter()
            .filter_map(|k| k[prefix.len()..].parse().ok())
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn has_key_for_account(&self, account_id: &str) -> bool {
        !self.device_indices(account_id).is_empty()
    }
}

// === AUTHENTICATOR STORE ===

pub struct AuthenticatorStore<B: StorageBackend> {
    backend: Rc<B>,
}

impl<B: StorageBackend> AuthenticatorStore<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    pub fn list(&self, account_id: &str) -> Vec<AuthenticatorRecord> {
        self.backend
            .get(&format!("{}{}", AUTH_PREFIX, account_id))
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn add(&self, account_id: &str, record: AuthenticatorRecord) -> Result<(), String> {
        let mut records = self.list(account_id);
        records.retain(|r| r.credential_id != record.credential_id);
        records.push(record);
        let raw = serde_json::to_string(&records)
            .map_err(|e| format!("Failed to serialize authenticators: {}", e))?;
        self.backend.set(&format!("{}{}", AUTH_PREFIX, account_id), &raw)
    }

    pub fn remove_device(&self, account_id: &str, device_index: u32) -> Result<(), String> {
        let mut records = self.list(account_id);
        records.retain(|r| r.device_index != device_index);
        let raw = serde_json::to_string(&records)
            .map_err(|e| format!("Failed to serialize authenticators: {}", e))?;
        self.backend.set(&format!("{}{}", AUTH_PREFIX, account_id), &raw)
    }
}

// === VRF KEYPAIR STORE ===

pub struct VrfKeypairStore<B: StorageBackend> {
    backend: Rc<B>,
}

impl<B: StorageBackend> VrfKeypairStore<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    pub fn get(&self, account_id: &str) -> Option<VrfKeypairRecord> {
        self.backend
            .get(&format!("{}{}", VRF_PREFIX, account_id))
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    pub fn put(&self, account_id: &str, record: &VrfKeypairRecord) -> Result<(), String> {
        let raw = serde_json::to_string(record)
            .map_err(|e| format!("Failed to serialize VRF keypair record: {}", e))?;
        self.backend.set(&format!("{}{}", VRF_PREFIX, account_id), &raw)
    }

    pub fn delete(&self, account_id: &str) {
        self.backend.remove(&format!("{}{}", VRF_PREFIX, account_id));
    }
}

// === USER PREFERENCES ===

pub struct UserPreferencesStore<B: StorageBackend> {
    backend: Rc<B>,
}

impl<B: StorageBackend> UserPreferencesStore<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    pub fn get(&self, account_id: &str) -> AccountPreferences {
        self.backend
            .get(&format!("{}{}", PREFS_PREFIX, account_id))
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn put(&self, account_id: &str, prefs: &AccountPreferences) -> Result<(), String> {
        let raw = serde_json::to_string(prefs)
            .map_err(|e| format!("Failed to serialize preferences: {}", e))?;
        self.backend.set(&format!("{}{}", PREFS_PREFIX, account_id), &raw)
    }

    pub fn set_confirmation_config(
        &self,
        account_id: &str,
        config: ConfirmationConfig,
    ) -> Result<(), String> {
        let mut prefs = self.get(account_id);
        prefs.confirmation_config = config;
        self.put(account_id, &prefs)
    }

    pub fn set_confirm_behavior(
        &self,
        account_id: &str,
        behavior: wasm_signer_worker::ConfirmationBehavior,
    ) -> Result<(), String> {
        let mut prefs = self.get(account_id);
        prefs.confirmation_config.behavior = behavior;
        self.put(account_id, &prefs)
    }

    pub fn set_theme(&self, account_id: &str, theme: &str) -> Result<(), String> {
        let mut prefs = self.get(account_id);
        prefs.theme = theme.to_string();
        prefs.confirmation_config.theme = Some(theme.to_string());
        self.put(account_id, &prefs)
    }

    pub fn last_user(&self) -> Option<String> {
        self.backend.get(LAST_USER_KEY)
    }

    pub fn set_last_user(&self, account_id: &str) -> Result<(), String> {
        self.backend.set(LAST_USER_KEY, account_id)
    }

    /// Most-recent-first, deduplicated by account id.
    pub fn recent_logins(&self) -> Vec<String> {
        self.backend
            .get(RECENT_LOGINS_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn update_last_login(&self, account_id: &str) -> Result<(), String> {
        let mut recents = self.recent_logins();
        recents.retain(|a| a != account_id);
        recents.insert(0, account_id.to_string());
        let raw = serde_json::to_string(&recents)
            .map_err(|e| format!("Failed to serialize recent logins: {}", e))?;
        self.backend.set(RECENT_LOGINS_KEY, &raw)?;
        self.set_last_user(account_id)?;

        let mut prefs = self.get(account_id);
        prefs.last_login_at = Some(now_ms());
        self.put(account_id, &prefs)
    }
}

// === ATOMIC REGISTRATION WRITE ===

/// Write the encrypted key record and the authenticator record as one
/// logical transaction: if the second write fails, the first is rolled back
/// and the error propagates. No orphan records.
pub fn register_atomically<B: StorageBackend>(
    keys: &EncryptedKeyStore<B>,
    authenticators: &AuthenticatorStore<B>,
    key_record: &EncryptedKeyRecord,
    authenticator_record: AuthenticatorRecord,
) -> Result<(), String> {
    let existing = keys.get(&key_record.account_id, key_record.device_index);

    keys.put(key_record)?;

    if let Err(e) = authenticators.add(&key_record.account_id, authenticator_record) {
        match existing {
            Some(previous) => {
                let _ = keys.put(&previous);
            }
            None => keys.delete(&key_record.account_id, key_record.device_index),
        }
        debug!("Registration write rolled back: {}", e);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (
        EncryptedKeyStore<MemoryBackend>,
        AuthenticatorStore<MemoryBackend>,
        UserPreferencesStore<MemoryBackend>,
        Rc<MemoryBackend>,
    ) {
        let backend = Rc::new(MemoryBackend::default());
        (
            EncryptedKeyStore::new(backend.clone()),
            AuthenticatorStore::new(backend.clone()),
            UserPreferencesStore::new(backend.clone()),
            backend,
        )
    }

    fn key_record(account: &str, device: u32) -> EncryptedKeyRecord {
        EncryptedKeyRecord {
            account_id: account.to_string(),
            device_index: device,
            ciphertext: "ct".to_string(),
            iv: "iv".to_string(),
            public_key: "ed25519:PK".to_string(),
            created_at: 0.0,
        }
    }

    fn authenticator(device: u32) -> AuthenticatorRecord {
        AuthenticatorRecord {
            credential_id: format!("cred-{}", device),
            transports: vec!["internal".to_string()],
            cose_public_key_b64u: None,
            device_index: device,
            created_at: 0.0,
            user_verification: "preferred".to_string(),
        }
    }

    #[test]
    fn one_record_per_account_device_pair() {
        let (keys, _, _, _) = stores();
        keys.put(&key_record("alice.testnet", 1)).unwrap();

        let mut updated = key_record("alice.testnet", 1);
        updated.ciphertext = "ct2".to_string();
        keys.put(&updated).unwrap();

        assert_eq!(keys.get("alice.testnet", 1).unwrap().ciphertext, "ct2");
        assert_eq!(keys.device_indices("alice.testnet"), vec![1]);
    }

    #[test]
    fn device_indices_are_sorted_and_scoped_per_account() {
        let (keys, _, _, _) = stores();
        keys.put(&key_record("alice.testnet", 2)).unwrap();
        keys.put(&key_record("alice.testnet", 1)).unwrap();
        keys.put(&key_record("bob.testnet", 1)).unwrap();

        assert_eq!(keys.device_indices("alice.testnet"), vec![1, 2]);
        assert_eq!(keys.device_indices("bob.testnet"), vec![1]);
        assert!(keys.has_key_for_account("alice.testnet"));
        assert!(!keys.has_key_for_account("carol.testnet"));
    }

    #[test]
    fn recent_logins_dedupe_most_recent_first() {
        let (_, _, prefs, _) = stores();
        prefs.update_last_login("alice.testnet").unwrap();
        prefs.update_last_login("bob.testnet").unwrap();
        prefs.update_last_login("alice.testnet").unwrap();

        assert_eq!(
            prefs.recent_logins(),
            vec!["alice.testnet".to_string(), "bob.testnet".to_string()]
        );
        assert_eq!(prefs.last_user().as_deref(), Some("alice.testnet"));
    }

    #[test]
    fn theme_updates_flow_into_confirmation_config() {
        let (_, _, prefs, _) = stores();
        prefs.set_theme("alice.testnet", "light").unwrap();
        let loaded = prefs.get("alice.testnet");
        assert_eq!(loaded.theme, "light");
        assert_eq!(loaded.confirmation_config.theme.as_deref(), Some("light"));
    }

    #[test]
    fn atomic_registration_rolls_back_on_second_write_failure() {
        // A backend that fails writes to the authenticator namespace.
        #[derive(Clone)]
        struct FailingBackend {
            inner: MemoryBackend,
        }
        impl StorageBackend for FailingBackend {
            fn get(&self, key: &str) -> Option<String> {
                self.inner.get(key)
            }
            fn set(&self, key: &str, value: &str) -> Result<(), String> {
                if key.starts_with(AUTH_PREFIX) {
                    return Err("quota exceeded".to_string());
                }
                self.inner.set(key, value)
            }
            fn remove(&self, key: &str) {
                self.inner.remove(key)
            }
            fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
                self.inner.keys_with_prefix(prefix)
            }
        }

        let backend = Rc::new(FailingBackend {
            inner: MemoryBackend::default(),
        });
        let keys = EncryptedKeyStore::new(backend.clone());
        let authenticators = AuthenticatorStore::new(backend.clone());

        let err = register_atomically(
            &keys,
            &authenticators,
            &key_record("alice.testnet", 1),
            authenticator(1),
        )
        .unwrap_err();

        assert!(err.contains("quota"));
        // No orphan key record left behind.
        assert!(keys.get("alice.testnet", 1).is_none());
    }

    #[test]
    fn atomic_registration_writes_both_records() {
        let (keys, authenticators, _, _) = stores();
        register_atomically(
            &keys,
            &authenticators,
            &key_record("alice.testnet", 1),
            authenticator(1),
        )
        .unwrap();

        assert!(keys.get("alice.testnet", 1).is_some());
        assert_eq!(authenticators.list("alice.testnet").len(), 1);
    }

    #[test]
    fn authenticators_dedupe_by_credential_id() {
        let (_, authenticators, _, _) = stores();
        authenticators.add("alice.testnet", authenticator(1)).unwrap();
        authenticators.add("alice.testnet", authenticator(1)).unwrap();
        assert_eq!(authenticators.list("alice.testnet").len(), 1);

        authenticators.add("alice.testnet", authenticator(2)).unwrap();
        assert_eq!(authenticators.list("alice.testnet").len(), 2);

        authenticators.remove_device("alice.testnet", 1).unwrap();
        let remaining = authenticators.list("alice.testnet");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].device_index, 2);
    }
}
