//! Lifecycle of one ephemeral database instance.
//!
//! `start` runs: working directory preparation, stale process reaping, free
//! port negotiation, engine launch and client connection. `stop` tears the
//! same pieces down in reverse and reaps again as a safety net.

pub mod controller;
pub mod launcher;
pub mod mongod;
pub mod ports;
pub mod reaper;

pub use controller::{LifecycleController, LifecycleState};
pub use launcher::{
    ConnectionHandle, EngineProcess, InstanceLauncher, LaunchSpec, MemberSpec, build_launch_spec,
};
pub use mongod::MongodLauncher;
pub use ports::{PortNegotiator, candidate_ports};
pub use reaper::{ProcessHandle, ProcessMatcher, ProcessReaper, ProcessRegistry, SystemRegistry};
