//! Subprocess ownership: spawning, tracking, port recovery and shutdown

mod port;
mod registry;
mod shutdown;

pub use port::{PortControl, SystemPorts};
pub use registry::{
    ManagedProcess, ProcessRegistry, ProcessState, ProcessSupervisor, SpawnOptions, KILL_GRACE,
};
pub use shutdown::{install_shutdown_hook, EXIT_INTERRUPTED, EXIT_TERMINATED};

pub use nix::sys::signal::Signal;
