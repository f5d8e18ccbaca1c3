// ******************************************************************************
// *                                                                            *
// *                  HANDLER: CHECK CAN REGISTER USER                          *
// *                                                                            *
// ******************************************************************************

use serde::Deserialize;

use crate::rpc_calls::{
    check_can_register_user_rpc_call, RegistrationCheckResult, VrfChallenge, VrfData,
};
use crate::types::{
    progress::{send_progress_message, ProgressData, ProgressMessageType, ProgressStep},
    SerializedRegistrationCredential, WebAuthnRegistrationCredential,
};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckCanRegisterUserRequest {
    pub contract_id: String,
    pub near_rpc_url: String,
    pub vrf_challenge: VrfChallenge,
    pub credential: SerializedRegistrationCredential,
}

/// **Handles:** `WorkerRequestType::CheckCanRegisterUser`
///
/// Registration pre-check: a view call that validates the VRF challenge and
/// WebAuthn registration against the contract without writing anything.
/// Registration aborts early when the account/credential pair is rejected.
pub async fn handle_check_can_register_user(
    request: CheckCanRegisterUserRequest,
) -> Result<RegistrationCheckResult, String> {
    send_progress_message(
        ProgressMessageType::RegistrationProgress,
        ProgressStep::ContractVerification,
        "Checking registration eligibility with the contract...",
        Some(&ProgressData::new(1, 1)),
    );

    let vrf_data = VrfData::try_from(&request.vrf_challenge)
        .map_err(|e| format!("Failed to convert VRF challenge: {}", e))?;

    let webauthn_registration = WebAuthnRegistrationCredential::from(&request.credential);

    check_can_register_user_rpc_call(
        &request.contract_id,
        &request.near_rpc_url,
        vrf_data,
        webauthn_registration,
    )
    .await
}
