//! Activation overlay policy. The wallet iframe is invisible by default;
//! phases that need a user gesture inside it (confirmation clicks, WebAuthn
//! prompts) make it cover the viewport, and non-interactive phases hide it
//! again. Terminal replies always hide.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Show,
    Hide,
}

/// The phase heuristic. Unlisted phases leave the overlay untouched.
pub fn overlay_action_for_phase(phase: &str) -> Option<OverlayAction> {
    match phase {
        // Needs a user gesture inside the iframe
        "user-confirmation"
        | "webauthn-authentication"
        | "device-link-authorization"
        | "device-link-registration"
        | "recovery-authentication" => Some(OverlayAction::Show),

        // Activation finished or the phase is non-interactive
        "authentication-complete"
        | "contract-verification"
        | "preparation"
        | "transaction-signing-progress"
        | "transaction-signing-complete"
        | "broadcasting"
        | "action-complete"
        | "device-link-error"
        | "error" => Some(OverlayAction::Hide),

        _ => None,
    }
}
