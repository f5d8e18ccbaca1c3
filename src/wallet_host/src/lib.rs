mod cancel;
mod config;
mod confirm;
mod dispatcher;
mod error;
mod flows;
mod nonce_manager;
mod protocol;
mod requests;
mod rpc;
#[cfg(target_arch = "wasm32")]
mod runtime;
mod stores;
#[cfg(test)]
mod tests;
mod utils;
mod webauthn;
mod workers;

pub use cancel::CancelRegistry;
pub use config::{
    compute_rp_id, parse_user_handle, user_handle_for_device, WalletServiceConfig,
    PROTOCOL_VERSION,
};
pub use confirm::{
    merge_confirmation_config, ConfirmationIntent, ConfirmationSummary, ConfirmationUiController,
    Decision,
};
pub use dispatcher::{LoginState, WalletHost};
pub use error::{is_user_cancellation, webauthn_error, ErrorCode, HostError};
pub use nonce_manager::NonceManager;
pub use protocol::{
    phases, ChildEnvelope, ParentEnvelope, ProgressPayload, ProgressStatus, ReplySink, RequestTag,
};
pub use rpc::{
    backoff_base_delay_ms, is_invalid_nonce_error, is_transient_rpc_error, NearRpcClient,
    RpcTransport,
};
pub use stores::{
    register_atomically, AccountPreferences, AuthenticatorRecord, AuthenticatorStore,
    EncryptedKeyRecord, EncryptedKeyStore, MemoryBackend, StorageBackend, UserPreferencesStore,
    VrfKeypairRecord, VrfKeypairStore,
};
pub use webauthn::{
    prf_salts_for_account, AllowCredential, AuthenticationCeremonyOptions, CeremonyOutcome,
    RegistrationCeremonyOptions, WebAuthnProvider,
};
pub use workers::{SignerWorkerBridge, SignerWorkerManager, VrfWorkerBridge, VrfWorkerManager};

#[cfg(not(target_arch = "wasm32"))]
pub use webauthn::FakeWebAuthnProvider;
#[cfg(not(target_arch = "wasm32"))]
pub use workers::{InProcessSignerBridge, InProcessVrfBridge};

#[cfg(target_arch = "wasm32")]
pub use rpc::FetchTransport;
#[cfg(target_arch = "wasm32")]
pub use stores::LocalStorageBackend;
