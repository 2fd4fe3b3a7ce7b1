//! # Configuration System
//!
//! Resolves the configuration of one ephemeral database instance.
//!
//! This crate provides:
//! - Instance option and resolved configuration structures
//! - Context-derived defaults (database name, working directory, port)
//! - Environment variable loading (`SCRATCHDB_*`)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (explicit > env > file > defaults)

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod precedence;

pub use config::{
    DEFAULT_PORT, DEFAULT_PORT_SCAN_LIMIT, DEFAULT_STARTUP_TIMEOUT_MS, DEFAULT_STOP_GRACE_MS,
    FALLBACK_DB_NAME, InstanceConfig, InstanceOptions, StorageEngine, Topology, resolve,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{EnvError, load_from_env};
pub use precedence::{merge_options, merge_sources};
