use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use datasocket_payload::Payload;
use tracing::{debug, error};

use crate::outbound::IDLE_WAIT;
use crate::shutdown::Shutdown;
use crate::slot::LatestValue;

/// Callback invoked with every value a receive socket delivers.
pub type Handler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Run `handler` once, containing any panic. Returns false if it panicked.
pub(crate) fn invoke(handler: &Handler, payload: Payload) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(()) => true,
        Err(panic_info) => {
            let msg = panic_info
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic_info.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            error!(panic = msg, "data handler panicked");
            false
        }
    }
}

/// Hand each fresh value to `handler`. Values published while the handler
/// runs are not queued: the next wake delivers only the newest.
pub(crate) fn dispatch_loop(slot: Arc<LatestValue<Payload>>, handler: Handler, shutdown: Arc<Shutdown>) {
    while !shutdown.is_triggered() {
        if let Some(payload) = slot.wait_fresh(IDLE_WAIT) {
            invoke(&handler, payload);
        }
    }
    debug!("dispatch loop stopped");
}
