use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::error::Result;
use crate::registry::Registry;

/// Install handlers for SIGTERM and SIGINT.
///
/// Returns a flag that is set when either signal arrives. Blocking loops
/// check it between polls and return early so the caller can still save the
/// registry before exiting.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&flag))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))?;
    Ok(flag)
}

/// Persist in-memory registry changes before the process exits.
pub fn save_before_exit(registry: &Registry) -> Result<()> {
    registry.save().inspect_err(|e| {
        tracing::error!(error = %e, "Failed to save registry on exit");
    })
}
