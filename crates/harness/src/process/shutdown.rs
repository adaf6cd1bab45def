//! Process-wide shutdown hook
//!
//! Interrupts, termination requests and panics all stop every registered
//! process before the harness goes away.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, warn};

use super::registry::{ProcessRegistry, ProcessSupervisor};

/// Exit code after SIGINT
pub const EXIT_INTERRUPTED: i32 = 130;
/// Exit code after SIGTERM
pub const EXIT_TERMINATED: i32 = 143;

/// Install signal and panic handlers that empty `registry` before exiting.
///
/// Must be called from within a tokio runtime.
pub fn install_shutdown_hook(registry: Arc<ProcessRegistry>) {
    let panic_registry = Arc::clone(&registry);
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_registry.kill_all_blocking();
        previous(info);
    }));

    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                return;
            }
        };

        let code = tokio::select! {
            _ = tokio::signal::ctrl_c() => EXIT_INTERRUPTED,
            _ = terminate.recv() => EXIT_TERMINATED,
        };

        warn!("Interrupted, stopping {} process(es)", registry.len());
        registry.kill_all().await;
        std::process::exit(code);
    });
}
