use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging once per worker. Repeated calls are no-ops, so every
/// entry point can call this defensively.
pub fn init(level: log::Level) {
    INIT.call_once(|| {
        #[cfg(target_arch = "wasm32")]
        {
            wasm_logger::init(wasm_logger::Config::new(level));
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            // Native unit tests rely on cargo's captured output.
            let _ = level;
        }
    });
}
