//! Confirmation UI controller. Presents a summary of the queued actions and
//! resolves with the user's decision. The DOM rendering is browser-only;
//! the decision plumbing (pending presentation, auto-proceed, close-on-
//! cancel) is target-independent and unit-tested natively.

use futures::channel::oneshot;
use log::debug;
use std::cell::RefCell;

use wasm_signer_worker::{ConfirmationBehavior, ConfirmationConfig, ConfirmationUIMode};

/// What the user sees: one line per transaction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationSummary {
    pub near_account_id: String,
    pub intents: Vec<ConfirmationIntent>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationIntent {
    pub receiver_id: String,
    /// e.g. "Transfer", "FunctionCall: set_greeting"
    pub action_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirmed,
    Cancelled,
}

struct ActivePresentation {
    resolver: oneshot::Sender<Decision>,
}

/// Merge the effective confirmation config: per-call override wins over the
/// stored preference, which wins over the default; then the `skip` coercion
/// is applied.
pub fn merge_confirmation_config(
    call_override: Option<&ConfirmationConfig>,
    stored: Option<&ConfirmationConfig>,
) -> ConfirmationConfig {
    let base = call_override
        .or(stored)
        .cloned()
        .unwrap_or_default();
    base.effective()
}

#[derive(Default)]
pub struct ConfirmationUiController {
    active: RefCell<Option<ActivePresentation>>,
}

impl ConfirmationUiController {
    /// Present the summary and wait for a decision.
    ///
    /// `skip` resolves Confirmed without rendering. `autoProceed` renders
    /// (so an attentive user can still cancel) and resolves Confirmed after
    /// the delay unless a decision arrived first. `requireClick` waits for
    /// an explicit decision.
    pub async fn present(
        self: std::rc::Rc<Self>,
        summary: &ConfirmationSummary,
        config: &ConfirmationConfig,
    ) -> Decision {
        let effective = config.effective();

        if effective.ui_mode == ConfirmationUIMode::Skip {
            return Decision::Confirmed;
        }

        let (sender, receiver) = oneshot::channel();

        // A new presentation displaces any stale one.
        if let Some(previous) = self.active.borrow_mut().replace(ActivePresentation {
            resolver: sender,
        }) {
            let _ = previous.resolver.send(Decision::Cancelled);
        }

        #[cfg(target_arch = "wasm32")]
        dom::render(summary, &effective, self.clone());
        #[cfg(not(target_arch = "wasm32"))]
        let _ = summary;

        match effective.behavior {
            ConfirmationBehavior::AutoProceed => {
                let delay = effective.auto_proceed_delay_ms.unwrap_or(0) as u64;
                let timer = Box::pin(crate::utils::sleep_ms(delay));
                match futures::future::select(receiver, timer).await {
                    futures::future::Either::Left((decision, _)) => {
                        decision.unwrap_or(Decision::Cancelled)
                    }
                    futures::future::Either::Right((_, _)) => {
                        // Timer won: auto-proceed unless a cancel landed first.
                        self.take_active();
                        Decision::Confirmed
                    }
                }
            }
            ConfirmationBehavior::RequireClick => {
                receiver.await.unwrap_or(Decision::Cancelled)
            }
        }
    }

    /// Resolve the pending presentation. Wired to the confirm/cancel buttons
    /// in the browser; called directly by native tests.
    pub fn resolve_active(&self, decision: Decision) {
        if let Some(active) = self.take_active() {
            let _ = active.resolver.send(decision);
        } else {
            debug!("resolve_active with no pending presentation (ignored)");
        }
    }

    /// Router-driven close (PM_CANCEL): rejects the pending presentation.
    pub fn close(&self) {
        self.resolve_active(Decision::Cancelled);
    }

    pub fn has_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    fn take_active(&self) -> Option<ActivePresentation> {
        self.active.borrow_mut().take()
    }
}

// === BROWSER RENDERING ===

#[cfg(target_arch = "wasm32")]
mod dom {
    use super::*;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;

    const CONTAINER_ID: &str = "passlock-confirm-root";

    /// Render a minimal modal/drawer into the iframe document. Styling is
    /// intentionally spartan; the summary rows and two buttons are the whole
    /// surface.
    pub(super) fn render(
        summary: &ConfirmationSummary,
        config: &ConfirmationConfig,
        controller: std::rc::Rc<ConfirmationUiController>,
    ) {
        let Some(document) = web_sys::window().and_then(|w| w.document()) else {
            return;
        };

        remove_existing(&document);

        let Ok(container) = document.create_element("div") else {
            return;
        };
        container.set_id(CONTAINER_ID);
        let theme = config.theme.as_deref().unwrap_or("dark");
        let position = match config.ui_mode {
            ConfirmationUIMode::Drawer => "bottom:0;left:0;right:0;",
            _ => "top:20%;left:50%;transform:translateX(-50%);",
        };
        let colors = if theme == "light" {
            "background:#ffffff;color:#111111;"
        } else {
            "background:#1c1c1e;color:#f2f2f7;"
        };
        let _ = container.set_attribute(
            "style",
            &format!(
                "position:fixed;{}z-index:2147483646;padding:16px;border-radius:12px;{}",
                position, colors
            ),
        );

        let mut body = format!("<div><strong>{}</strong></div>", summary.near_account_id);
        for intent in &summary.intents {
            body.push_str(&format!(
                "<div>{} → {}{}</div>",
                intent.action_summary,
                intent.receiver_id,
                intent
                    .amount
                    .as_deref()
                    .map(|a| format!(" ({})", a))
                    .unwrap_or_default()
            ));
        }
        body.push_str(
            "<button data-confirm=\"1\">Confirm</button> \
             <button data-cancel=\"1\">Cancel</button>",
        );
        container.set_inner_html(&body);

        if let Some(root) = document.body() {
            let _ = root.append_child(&container);
        }

        attach_button(
            &container,
            "[data-confirm]",
            controller.clone(),
            Decision::Confirmed,
        );
        attach_button(&container, "[data-cancel]", controller, Decision::Cancelled);
    }

    fn attach_button(
        container: &web_sys::Element,
        selector: &str,
        controller: std::rc::Rc<ConfirmationUiController>,
        decision: Decision,
    ) {
        let Some(button) = container.query_selector(selector).ok().flatten() else {
            return;
        };
        let closure = Closure::<dyn FnMut()>::new(move || {
            controller.resolve_active(decision);
            if let Some(document) = web_sys::window().and_then(|w| w.document()) {
                remove_existing(&document);
            }
        });
        if let Some(target) = button.dyn_ref::<web_sys::HtmlElement>() {
            let _ = target
                .add_event_listener_with_callback("click", closure.as_ref().unchecked_ref());
        }
        closure.forget();
    }

    fn remove_existing(document: &web_sys::Document) {
        if let Some(existing) = document.get_element_by_id(CONTAINER_ID) {
            existing.remove();
        }
    }
}
