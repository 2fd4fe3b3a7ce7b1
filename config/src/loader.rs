//! # Environment Variable Loader
//!
//! Loads instance options from `SCRATCHDB_*` environment variables. Unset
//! variables leave the option unset so lower-precedence sources apply.
//!
//! - `SCRATCHDB_DB_NAME`: Database name
//! - `SCRATCHDB_DB_PATH`: Working directory
//! - `SCRATCHDB_DB_PORT`: Base port of the free-port scan
//! - `SCRATCHDB_REPLICA_SET`: Use replica-set topology (true/false/1/0)
//! - `SCRATCHDB_VERSION`: Engine version pin
//! - `SCRATCHDB_BINARY`: Engine executable
//! - `SCRATCHDB_BASE_DIR`: Base location for derived working directories
//! - `SCRATCHDB_REPLICA_MEMBERS`: Replica-set member count
//! - `SCRATCHDB_STORAGE_ENGINE`: Storage engine override
//! - `SCRATCHDB_STARTUP_TIMEOUT_MS`: Engine startup bound
//! - `SCRATCHDB_STOP_GRACE_MS`: Grace period after stop

use crate::config::InstanceOptions;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable parsing error.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String
    }
}

/// Load instance options from environment variables.
///
/// A variable that is set but cannot be parsed is an error rather than being
/// silently ignored.
pub fn load_from_env() -> Result<InstanceOptions, EnvError> {
    Ok(InstanceOptions {
        db_name: string_env("SCRATCHDB_DB_NAME"),
        db_path: string_env("SCRATCHDB_DB_PATH").map(PathBuf::from),
        db_port: parse_env("SCRATCHDB_DB_PORT")?,
        use_replica_set: bool_env("SCRATCHDB_REPLICA_SET")?,
        version: string_env("SCRATCHDB_VERSION"),
        binary: string_env("SCRATCHDB_BINARY").map(PathBuf::from),
        base_dir: string_env("SCRATCHDB_BASE_DIR").map(PathBuf::from),
        replica_members: parse_env("SCRATCHDB_REPLICA_MEMBERS")?,
        storage_engine: parse_env("SCRATCHDB_STORAGE_ENGINE")?,
        startup_timeout_ms: parse_env("SCRATCHDB_STARTUP_TIMEOUT_MS")?,
        stop_grace_period_ms: parse_env("SCRATCHDB_STOP_GRACE_MS")?,
        port_scan_limit: None
    })
}

fn string_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    match string_env(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string()
            }),
        None => Ok(None)
    }
}

fn bool_env(key: &str) -> Result<Option<bool>, EnvError> {
    match string_env(key) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(EnvError::InvalidValue {
                key: key.to_string(),
                value,
                reason: "expected a boolean".to_string()
            })
        },
        None => Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageEngine;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "SCRATCHDB_DB_NAME",
        "SCRATCHDB_DB_PATH",
        "SCRATCHDB_DB_PORT",
        "SCRATCHDB_REPLICA_SET",
        "SCRATCHDB_VERSION",
        "SCRATCHDB_BINARY",
        "SCRATCHDB_BASE_DIR",
        "SCRATCHDB_REPLICA_MEMBERS",
        "SCRATCHDB_STORAGE_ENGINE",
        "SCRATCHDB_STARTUP_TIMEOUT_MS",
        "SCRATCHDB_STOP_GRACE_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_unset_leaves_options_empty() {
        clear_env();
        let options = load_from_env().unwrap();
        assert_eq!(options, InstanceOptions::default());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("SCRATCHDB_DB_NAME", "orders");
            env::set_var("SCRATCHDB_DB_PORT", "28000");
            env::set_var("SCRATCHDB_REPLICA_SET", "1");
            env::set_var("SCRATCHDB_REPLICA_MEMBERS", "3");
            env::set_var("SCRATCHDB_STORAGE_ENGINE", "wiredTiger");
            env::set_var("SCRATCHDB_STOP_GRACE_MS", "250");
        }

        let options = load_from_env().unwrap();
        assert_eq!(options.db_name.as_deref(), Some("orders"));
        assert_eq!(options.db_port, Some(28000));
        assert_eq!(options.use_replica_set, Some(true));
        assert_eq!(options.replica_members, Some(3));
        assert_eq!(options.storage_engine, Some(StorageEngine::WiredTiger));
        assert_eq!(options.stop_grace_period_ms, Some(250));
        assert_eq!(options.version, None);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_invalid_port() {
        clear_env();
        unsafe {
            env::set_var("SCRATCHDB_DB_PORT", "not-a-port");
        }

        let result = load_from_env();
        assert!(matches!(
            result,
            Err(EnvError::InvalidValue { ref key, .. }) if key == "SCRATCHDB_DB_PORT"
        ));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_invalid_bool() {
        clear_env();
        unsafe {
            env::set_var("SCRATCHDB_REPLICA_SET", "maybe");
        }

        assert!(load_from_env().is_err());

        clear_env();
    }
}
