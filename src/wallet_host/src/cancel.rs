use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::HostError;

/// Tracks cancelled request ids. Handlers call `ensure_live` after every
/// await boundary; PM_CANCEL marks the id and best-effort closes any open
/// confirmation UI at the dispatcher level.
#[derive(Default)]
pub struct CancelRegistry {
    cancelled: RefCell<HashSet<String>>,
}

impl CancelRegistry {
    pub fn mark_cancelled(&self, request_id: &str) {
        self.cancelled.borrow_mut().insert(request_id.to_string());
    }

    pub fn is_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.borrow().contains(request_id)
    }

    /// Error with `CANCELLED` when the request has been cancelled.
    pub fn ensure_live(&self, request_id: &str) -> Result<(), HostError> {
        if self.is_cancelled(request_id) {
            Err(HostError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Forget a finished request so ids can be garbage-collected.
    pub fn clear(&self, request_id: &str) {
        self.cancelled.borrow_mut().remove(request_id);
    }

    pub fn clear_all(&self) {
        self.cancelled.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn cancelled_requests_fail_ensure_live() {
        let registry = CancelRegistry::default();
        assert!(registry.ensure_live("req-1").is_ok());

        registry.mark_cancelled("req-1");
        let err = registry.ensure_live("req-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);

        // Other requests are unaffected.
        assert!(registry.ensure_live("req-2").is_ok());

        registry.clear("req-1");
        assert!(registry.ensure_live("req-1").is_ok());
    }
}
