use serde::{Deserialize, Serialize};

// === TRANSACTION CONTEXT ===

/// Chain data the nonce manager resolved before signing started. Nonces in a
/// batch are assigned from `next_nonce` upward in input order.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub near_public_key_str: String,
    pub next_nonce: String,
    pub tx_block_height: String,
    pub tx_block_hash: String,
}

// === CONFIRMATION CONFIGURATION ===

/// UI mode for confirmation display
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationUIMode {
    #[serde(rename = "skip")]
    Skip,
    #[serde(rename = "modal")]
    Modal,
    #[serde(rename = "drawer")]
    Drawer,
}

/// Behavior mode for the confirmation flow
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationBehavior {
    #[serde(rename = "requireClick")]
    RequireClick,
    #[serde(rename = "autoProceed")]
    AutoProceed,
}

/// Unified confirmation configuration. `uiMode: skip` forces
/// `behavior: autoProceed` with zero delay (see `effective()`).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationConfig {
    pub ui_mode: ConfirmationUIMode,
    pub behavior: ConfirmationBehavior,
    pub auto_proceed_delay_ms: Option<u32>,
    pub theme: Option<String>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ui_mode: ConfirmationUIMode::Modal,
            behavior: ConfirmationBehavior::RequireClick,
            auto_proceed_delay_ms: Some(2000),
            theme: Some("dark".to_string()),
        }
    }
}

impl ConfirmationConfig {
    /// Normalize the stored values into what the signer actually honors.
    pub fn effective(&self) -> ConfirmationConfig {
        let mut config = self.clone();
        if config.ui_mode == ConfirmationUIMode::Skip {
            config.behavior = ConfirmationBehavior::AutoProceed;
            config.auto_proceed_delay_ms = Some(0);
        }
        config
    }
}

// === PRF & DECRYPTION PAYLOADS ===

/// Both PRF extension outputs from one WebAuthn ceremony, base64url-encoded.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DualPrfOutputs {
    /// PRF `first`: ChaCha20 encryption key material
    pub chacha20_prf_output: String,
    /// PRF `second`: Ed25519 signing key material
    pub ed25519_prf_output: String,
}

/// Everything needed to open one encrypted key record: the AEAD ciphertext
/// and nonce from the key store, plus the fresh PRF output that re-derives
/// the encryption key. Private keys are never persisted in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionPayload {
    pub encrypted_private_key_data: String,
    #[serde(alias = "encryptedPrivateKeyIv")]
    pub encrypted_private_key_chacha20_nonce_b64u: String,
    pub chacha20_prf_output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_ui_mode_coerces_behavior_and_delay() {
        let config = ConfirmationConfig {
            ui_mode: ConfirmationUIMode::Skip,
            behavior: ConfirmationBehavior::RequireClick,
            auto_proceed_delay_ms: Some(5000),
            theme: None,
        };
        let effective = config.effective();
        assert_eq!(effective.behavior, ConfirmationBehavior::AutoProceed);
        assert_eq!(effective.auto_proceed_delay_ms, Some(0));
    }

    #[test]
    fn non_skip_modes_are_untouched() {
        let config = ConfirmationConfig::default();
        let effective = config.effective();
        assert_eq!(effective.behavior, ConfirmationBehavior::RequireClick);
        assert_eq!(effective.auto_proceed_delay_ms, Some(2000));
    }
}
