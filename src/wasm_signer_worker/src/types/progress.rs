//! Progress message types.
//!
//! Handlers stream progress while an operation runs; the wallet host tags
//! each message with the active request id and forwards it to the parent as
//! a `PROGRESS` envelope. Final results travel separately as the handler's
//! return value, exactly one per operation.

use serde::{Deserialize, Serialize};

/// Progress message channels. Values sit above the response-type range so
/// the host can tell progress apart from success/failure by numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ProgressMessageType {
    RegistrationProgress = 100,
    RegistrationComplete = 101,
    ExecuteActionsProgress = 102,
    ExecuteActionsComplete = 103,
}

impl TryFrom<u32> for ProgressMessageType {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, <Self as TryFrom<u32>>::Error> {
        match value {
            100 => Ok(ProgressMessageType::RegistrationProgress),
            101 => Ok(ProgressMessageType::RegistrationComplete),
            102 => Ok(ProgressMessageType::ExecuteActionsProgress),
            103 => Ok(ProgressMessageType::ExecuteActionsComplete),
            _ => Err(format!("Invalid ProgressMessageType value: {}", value)),
        }
    }
}

/// The canonical signing pipeline steps (0 = error). These numbers appear
/// verbatim in `PROGRESS.payload.step` on the parent port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ProgressStep {
    Error = 0,
    Preparation = 1,
    UserConfirmation = 2,
    ContractVerification = 3,
    WebauthnAuthentication = 4,
    AuthenticationComplete = 5,
    TransactionSigningProgress = 6,
    TransactionSigningComplete = 7,
    Broadcasting = 8,
    ActionComplete = 9,
}

impl TryFrom<u32> for ProgressStep {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, <Self as TryFrom<u32>>::Error> {
        match value {
            0 => Ok(ProgressStep::Error),
            1 => Ok(ProgressStep::Preparation),
            2 => Ok(ProgressStep::UserConfirmation),
            3 => Ok(ProgressStep::ContractVerification),
            4 => Ok(ProgressStep::WebauthnAuthentication),
            5 => Ok(ProgressStep::AuthenticationComplete),
            6 => Ok(ProgressStep::TransactionSigningProgress),
            7 => Ok(ProgressStep::TransactionSigningComplete),
            8 => Ok(ProgressStep::Broadcasting),
            9 => Ok(ProgressStep::ActionComplete),
            _ => Err(format!("Invalid ProgressStep value: {}", value)),
        }
    }
}

/// Phase string for a step, as carried on `PROGRESS.payload.phase`.
pub fn progress_step_phase(step: ProgressStep) -> &'static str {
    match step {
        ProgressStep::Error => "error",
        ProgressStep::Preparation => "preparation",
        ProgressStep::UserConfirmation => "user-confirmation",
        ProgressStep::ContractVerification => "contract-verification",
        ProgressStep::WebauthnAuthentication => "webauthn-authentication",
        ProgressStep::AuthenticationComplete => "authentication-complete",
        ProgressStep::TransactionSigningProgress => "transaction-signing-progress",
        ProgressStep::TransactionSigningComplete => "transaction-signing-complete",
        ProgressStep::Broadcasting => "broadcasting",
        ProgressStep::ActionComplete => "action-complete",
    }
}

pub fn progress_message_type_name(message_type: ProgressMessageType) -> &'static str {
    match message_type {
        ProgressMessageType::RegistrationProgress => "REGISTRATION_PROGRESS",
        ProgressMessageType::RegistrationComplete => "REGISTRATION_COMPLETE",
        ProgressMessageType::ExecuteActionsProgress => "EXECUTE_ACTIONS_PROGRESS",
        ProgressMessageType::ExecuteActionsComplete => "EXECUTE_ACTIONS_COMPLETE",
    }
}

/// Structured data payload attached to progress messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ProgressData {
    pub fn new(current: u32, total: u32) -> Self {
        Self {
            current: Some(current),
            total: Some(total),
            ..Default::default()
        }
    }

    pub fn with_transaction_count(mut self, count: usize) -> Self {
        self.transaction_count = Some(count);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_hash(mut self, hash: String) -> Self {
        self.hash = Some(hash);
        self
    }
}

/// Type-safe helper for emitting a progress message from a handler.
pub fn send_progress_message<T: Serialize + ?Sized>(
    msg_type: ProgressMessageType,
    step: ProgressStep,
    message: &str,
    data: Option<&T>,
) {
    let data_json = data.and_then(|d| serde_json::to_string(d).ok());
    crate::send_progress_message_raw(msg_type as u32, step as u32, message, data_json.as_deref());
}

/// Completion variant; identical wire shape, named for call-site clarity.
pub fn send_completion_message<T: Serialize + ?Sized>(
    msg_type: ProgressMessageType,
    step: ProgressStep,
    message: &str,
    data: Option<&T>,
) {
    send_progress_message(msg_type, step, message, data);
}
