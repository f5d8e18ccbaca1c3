use serde::{Deserialize, Serialize};

/// Log level for the wallet host.
pub const CURRENT_LOG_LEVEL: log::Level = log::Level::Info;

/// Protocol version reported in the READY handshake reply.
pub const PROTOCOL_VERSION: u32 = 1;

// === FRESHNESS & TIMING ===

/// Block hash/height are treated stale after this long.
pub const BLOCK_DATA_STALENESS_MS: f64 = 5_000.0;

/// Access-key nonce data is treated stale after this long.
pub const NONCE_STALENESS_MS: f64 = 5_000.0;

/// Debounce window for non-blocking block-height prefetches.
pub const PREFETCH_DEBOUNCE_MS: f64 = 150.0;

// === RPC RETRY POLICY ===

/// Maximum `send_tx` attempts (first try + retries).
pub const SEND_TX_MAX_ATTEMPTS: u32 = 5;

/// Base backoff delay; attempt n waits `base * 2^(n-1)` plus jitter.
pub const SEND_TX_BACKOFF_BASE_MS: u64 = 200;

/// Upper bound on the random jitter added to each backoff delay.
pub const SEND_TX_BACKOFF_JITTER_MS: u64 = 150;

/// Default `wait_until` for broadcasts when the caller does not specify one.
pub const DEFAULT_WAIT_UNTIL: &str = "EXECUTED_OPTIMISTIC";

// === SERVICE CONFIGURATION ===

/// Configuration pushed by the parent via PM_SET_CONFIG. Everything that
/// talks to the chain or the relay is rebuilt when this changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletServiceConfig {
    /// Comma/whitespace-separated NEAR RPC endpoints, tried in order.
    pub near_rpc_url: String,
    /// Web-authn contract account id.
    pub contract_id: String,
    /// Optional relying-party id override (registrable suffix).
    #[serde(default)]
    pub rp_id_override: Option<String>,
    /// Shamir 3-pass relay, when server-assisted unlock is available.
    #[serde(default)]
    pub relay_server_url: Option<String>,
    #[serde(default)]
    pub shamir_apply_lock_route: Option<String>,
    #[serde(default)]
    pub shamir_remove_lock_route: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
}

/// Compute the effective relying-party id for a WebAuthn ceremony.
/// The override wins when the current host is the override itself or one of
/// its subdomains; anything else falls back to the host, which keeps a
/// misconfigured override from bricking ceremonies.
pub fn compute_rp_id(host: &str, rp_id_override: Option<&str>) -> String {
    match rp_id_override {
        Some(override_id)
            if host == override_id || host.ends_with(&format!(".{}", override_id)) =>
        {
            override_id.to_string()
        }
        _ => host.to_string(),
    }
}

/// Device-scoped WebAuthn user handle. Device 1 uses the bare account id;
/// later devices append ` (n)` so platform passkey sync cannot silently
/// overwrite another device's credential.
pub fn user_handle_for_device(account_id: &str, device_index: u32) -> String {
    if device_index <= 1 {
        account_id.to_string()
    } else {
        format!("{} ({})", account_id, device_index)
    }
}

/// Invert `user_handle_for_device`: recover `(accountId, deviceIndex)`.
pub fn parse_user_handle(user_handle: &str) -> (String, u32) {
    if let Some(open) = user_handle.rfind(" (") {
        if let Some(stripped) = user_handle[open + 2..].strip_suffix(')') {
            if let Ok(n) = stripped.parse::<u32>() {
                return (user_handle[..open].to_string(), n);
            }
        }
    }
    (user_handle.to_string(), 1)
}
