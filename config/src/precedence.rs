//! # Configuration Precedence
//!
//! Merges instance options from multiple sources.
//!
//! # Precedence Order
//! 1. Explicit options passed by the caller (highest priority)
//! 2. Environment variables
//! 3. Configuration file
//! 4. Context-derived defaults, applied later by [`crate::resolve`]

use crate::config::InstanceOptions;

/// Merge file, environment and explicit options, highest priority last.
///
/// ```rust,no_run
/// use config::{InstanceOptions, load_from_env, load_from_file, merge_sources, resolve};
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let from_file = load_from_file(Path::new("scratchdb.toml"))?;
///     let from_env = load_from_env()?;
///     let options = merge_sources(from_file, from_env, InstanceOptions::default());
///     let _config = resolve("orders-suite", options);
///     Ok(())
/// }
/// ```
pub fn merge_sources(
    file_options: InstanceOptions,
    env_options: InstanceOptions,
    explicit_options: InstanceOptions
) -> InstanceOptions {
    let merged = merge_options(file_options, env_options, "env");
    merge_options(merged, explicit_options, "explicit")
}

/// Shallow, field-by-field merge: every field set in `overlay` replaces the
/// corresponding field of `base`.
pub fn merge_options(
    base: InstanceOptions,
    overlay: InstanceOptions,
    source_name: &str
) -> InstanceOptions {
    let mut changes = Vec::new();

    let merged = InstanceOptions {
        db_name: pick(base.db_name, overlay.db_name, "db_name", &mut changes),
        db_path: pick(base.db_path, overlay.db_path, "db_path", &mut changes),
        db_port: pick(base.db_port, overlay.db_port, "db_port", &mut changes),
        use_replica_set: pick(
            base.use_replica_set,
            overlay.use_replica_set,
            "use_replica_set",
            &mut changes
        ),
        version: pick(base.version, overlay.version, "version", &mut changes),
        binary: pick(base.binary, overlay.binary, "binary", &mut changes),
        base_dir: pick(base.base_dir, overlay.base_dir, "base_dir", &mut changes),
        replica_members: pick(
            base.replica_members,
            overlay.replica_members,
            "replica_members",
            &mut changes
        ),
        storage_engine: pick(
            base.storage_engine,
            overlay.storage_engine,
            "storage_engine",
            &mut changes
        ),
        startup_timeout_ms: pick(
            base.startup_timeout_ms,
            overlay.startup_timeout_ms,
            "startup_timeout_ms",
            &mut changes
        ),
        stop_grace_period_ms: pick(
            base.stop_grace_period_ms,
            overlay.stop_grace_period_ms,
            "stop_grace_period_ms",
            &mut changes
        ),
        port_scan_limit: pick(
            base.port_scan_limit,
            overlay.port_scan_limit,
            "port_scan_limit",
            &mut changes
        )
    };

    if !changes.is_empty() {
        tracing::debug!(
            source = source_name,
            fields = ?changes,
            "instance options overridden"
        );
    }

    merged
}

fn pick<T>(
    base: Option<T>,
    overlay: Option<T>,
    field: &'static str,
    changes: &mut Vec<&'static str>
) -> Option<T> {
    match overlay {
        Some(value) => {
            changes.push(field);
            Some(value)
        }
        None => base
    }
}
