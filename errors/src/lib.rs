//! # scratchdb Errors
//!
//! Error taxonomy for the ephemeral database harness.
//!
//! Each component reports its own enum; callers of the harness facade see
//! them wrapped in [`HarnessError`]. Every variant carries the operation
//! target (pid, port, path, collection) needed to diagnose the failure.

use std::path::PathBuf;
use thiserror::Error;

/// Stale-process reaping errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process enumeration failed: {reason}")]
    Enumerate { reason: String },

    #[error("Failed to terminate pid {pid} ({command}): {reason}")]
    Terminate {
        pid: u32,
        command: String,
        reason: String
    }
}

/// Port negotiation errors
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No free port between {first} and {last}")]
    Exhausted { first: u16, last: u16 },

    #[error("Probing port {port} failed: {source}")]
    Probe {
        port: u16,
        #[source]
        source: std::io::Error
    }
}

/// Engine launch errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn engine {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error
    },

    #[error("Unable to create data directory {path:?}: {source}")]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error
    },

    #[error("Could not determine version of {binary}: {reason}")]
    VersionProbe { binary: String, reason: String },

    #[error("Engine version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Engine on port {port} exited before becoming ready ({status}), see {log_path:?}")]
    ExitedEarly {
        port: u16,
        status: String,
        log_path: PathBuf
    },

    #[error("Engine on port {port} not ready after {timeout_ms}ms")]
    Timeout { port: u16, timeout_ms: u64 },

    #[error("Client connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Replica set {name} initiation failed: {reason}")]
    ReplicaSetInit { name: String, reason: String },

    #[error("Failed to stop engine pid {pid}: {reason}")]
    Stop { pid: u32, reason: String }
}

/// Fixture data errors
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Insert into {collection} failed: {reason}")]
    Insert { collection: String, reason: String },

    #[error("Drop of collection {collection} failed: {reason}")]
    Drop { collection: String, reason: String },

    #[error("Collection {collection} not found")]
    CollectionNotFound { collection: String },

    #[error("Listing collections of {database} failed: {reason}")]
    ListCollections { database: String, reason: String },

    #[error("Drop of database {database} failed: {reason}")]
    DropDatabase { database: String, reason: String },

    #[error("Invalid fixture data: {reason}")]
    InvalidFixture { reason: String }
}

/// Working directory preparation errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Unable to prepare working directory {path:?}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error
    }
}

/// Errors surfaced by the harness facade and the lifecycle controller
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("The client has not been instantiated ({operation})")]
    NotInstantiated { operation: &'static str },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Data(#[from] DataError)
}

impl HarnessError {
    pub fn not_instantiated(operation: &'static str) -> Self {
        Self::NotInstantiated { operation }
    }

    pub fn is_not_instantiated(&self) -> bool {
        matches!(self, Self::NotInstantiated { .. })
    }
}
