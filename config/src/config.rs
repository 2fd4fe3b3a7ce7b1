//! # Configuration Structures
//!
//! Caller-facing [`InstanceOptions`] and the fully-populated
//! [`InstanceConfig`] produced by [`resolve`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Port the negotiation scan starts from when none is configured.
pub const DEFAULT_PORT: u16 = 27777;

/// Database name used when the context name is blank.
pub const FALLBACK_DB_NAME: &str = "scratchdb-test";

/// Startup bound for the engine to report ready.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Grace period after `stop` for the OS to release sockets and files.
pub const DEFAULT_STOP_GRACE_MS: u64 = 100;

/// Number of candidate ports probed before negotiation gives up.
pub const DEFAULT_PORT_SCAN_LIMIT: u16 = 1_000;

const WORKDIR_PREFIX: &str = ".scratchdb_";

/// Storage engine the database engine is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageEngine {
    /// Non-persistent engine intended for disposable test data
    EphemeralForTest,
    /// Durable engine required by the replica-set machinery
    WiredTiger,
    /// In-memory engine (enterprise builds)
    InMemory
}

impl StorageEngine {
    /// Value passed to the engine's `--storageEngine` flag.
    pub fn as_arg(&self) -> &'static str {
        match self {
            StorageEngine::EphemeralForTest => "ephemeralForTest",
            StorageEngine::WiredTiger => "wiredTiger",
            StorageEngine::InMemory => "inMemory"
        }
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeralForTest" => Ok(StorageEngine::EphemeralForTest),
            "wiredTiger" => Ok(StorageEngine::WiredTiger),
            "inMemory" => Ok(StorageEngine::InMemory),
            other => Err(format!("unknown storage engine: {other}"))
        }
    }
}

/// Deployment shape of the ephemeral instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// A single engine process
    Standalone { storage_engine: StorageEngine },
    /// A coordinated group of engine processes forming one replica set
    ReplicaSet {
        set_name: String,
        members: usize,
        storage_engine: StorageEngine
    }
}

impl Topology {
    pub fn storage_engine(&self) -> StorageEngine {
        match self {
            Topology::Standalone { storage_engine }
            | Topology::ReplicaSet { storage_engine, .. } => *storage_engine
        }
    }

    /// Number of engine processes this topology launches.
    pub fn member_count(&self) -> usize {
        match self {
            Topology::Standalone { .. } => 1,
            Topology::ReplicaSet { members, .. } => (*members).max(1)
        }
    }

    pub fn is_replica_set(&self) -> bool {
        matches!(self, Topology::ReplicaSet { .. })
    }
}

/// Construction-time options.
///
/// Every field is optional; unset fields fall back to the defaults derived
/// from the context name by [`resolve`]. Set fields replace the default
/// wholesale (shallow merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    /// Database the fixtures are loaded into
    pub db_name: Option<String>,

    /// Working directory of the instance, replacing the derived one
    pub db_path: Option<PathBuf>,

    /// Port the free-port scan starts from
    pub db_port: Option<u16>,

    /// Launch a replica set instead of a single process
    pub use_replica_set: Option<bool>,

    /// Engine version pin, checked against the binary before launch
    pub version: Option<String>,

    /// Engine executable (looked up on `PATH` when relative)
    pub binary: Option<PathBuf>,

    /// Base location the derived working directory is namespaced under
    pub base_dir: Option<PathBuf>,

    /// Member count for replica-set topology
    pub replica_members: Option<usize>,

    /// Storage engine replacing the topology default
    pub storage_engine: Option<StorageEngine>,

    pub startup_timeout_ms: Option<u64>,

    pub stop_grace_period_ms: Option<u64>,

    pub port_scan_limit: Option<u16>
}

/// Fully-populated configuration of one ephemeral instance.
///
/// Immutable once the instance has started; the lifecycle controller owns
/// its copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub context_name: String,
    pub db_name: String,
    pub working_directory: PathBuf,
    pub base_port: u16,
    pub topology: Topology,
    /// Storage engine was chosen by the caller rather than defaulted
    pub storage_engine_pinned: bool,
    pub engine_version: Option<String>,
    pub binary: PathBuf,
    pub startup_timeout: Duration,
    pub stop_grace_period: Duration,
    pub port_scan_limit: u16
}

impl InstanceConfig {
    /// Executable name used to recognise engine processes.
    pub fn executable_name(&self) -> String {
        self.binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mongod".to_string())
    }
}

/// Resolves a context name and optional overrides into an [`InstanceConfig`].
///
/// Defaults:
/// - `db_name`: the trimmed context name, or [`FALLBACK_DB_NAME`] if blank
/// - `working_directory`: `<base_dir>/.scratchdb_<label>` where `base_dir`
///   defaults to the OS temp directory
/// - `base_port`: [`DEFAULT_PORT`]
/// - topology: standalone with the ephemeral storage engine
///
/// No validation happens beyond trimming; malformed paths or ports surface
/// as launch failures.
pub fn resolve(context_name: &str, options: InstanceOptions) -> InstanceConfig {
    let trimmed = context_name.trim();
    let label = if trimmed.is_empty() {
        FALLBACK_DB_NAME
    } else {
        trimmed
    };

    let db_name = options.db_name.unwrap_or_else(|| label.to_string());
    let base_dir = options.base_dir.unwrap_or_else(std::env::temp_dir);
    let working_directory = options
        .db_path
        .unwrap_or_else(|| base_dir.join(format!("{WORKDIR_PREFIX}{label}")));

    let storage_engine_pinned = options.storage_engine.is_some();
    let topology = if options.use_replica_set.unwrap_or(false) {
        Topology::ReplicaSet {
            set_name: db_name.clone(),
            members: options.replica_members.unwrap_or(1),
            storage_engine: options.storage_engine.unwrap_or(StorageEngine::WiredTiger)
        }
    } else {
        Topology::Standalone {
            storage_engine: options
                .storage_engine
                .unwrap_or(StorageEngine::EphemeralForTest)
        }
    };

    InstanceConfig {
        context_name: label.to_string(),
        db_name,
        working_directory,
        base_port: options.db_port.unwrap_or(DEFAULT_PORT),
        topology,
        storage_engine_pinned,
        engine_version: options.version,
        binary: options.binary.unwrap_or_else(|| PathBuf::from("mongod")),
        startup_timeout: Duration::from_millis(
            options
                .startup_timeout_ms
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS)
        ),
        stop_grace_period: Duration::from_millis(
            options.stop_grace_period_ms.unwrap_or(DEFAULT_STOP_GRACE_MS)
        ),
        port_scan_limit: options.port_scan_limit.unwrap_or(DEFAULT_PORT_SCAN_LIMIT)
    }
}
