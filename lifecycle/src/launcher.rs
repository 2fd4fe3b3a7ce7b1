//! Engine launch parameters and the launcher seam.
//!
//! [`build_launch_spec`] is the single place where topology turns into
//! engine arguments. An [`InstanceLauncher`] consumes the spec, starts the
//! engine members, waits for readiness and hands back a
//! [`ConnectionHandle`].

use async_trait::async_trait;
use config::{InstanceConfig, StorageEngine, Topology};
use errors::LaunchError;
use mongodb::{Client, Database};
use std::path::PathBuf;
use std::time::Duration;

/// Address every engine member binds.
pub const BIND_HOST: &str = "127.0.0.1";

/// One engine process of a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub args: Vec<String>
}

/// Everything needed to start the engine for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub engine_version: Option<String>,
    pub replica_set: Option<String>,
    pub storage_engine: StorageEngine,
    pub storage_engine_pinned: bool,
    pub members: Vec<MemberSpec>,
    pub startup_timeout: Duration
}

/// First engine major version without the `ephemeralForTest` storage engine.
const EPHEMERAL_REMOVED_IN: u32 = 7;

impl LaunchSpec {
    /// Client connection string reaching every member.
    pub fn connection_url(&self) -> String {
        let hosts = self
            .members
            .iter()
            .map(|member| format!("{BIND_HOST}:{}", member.port))
            .collect::<Vec<_>>()
            .join(",");
        match &self.replica_set {
            Some(name) => format!("mongodb://{hosts}/?replicaSet={name}"),
            None => format!("mongodb://{hosts}/")
        }
    }

    /// Adjusts the members to what the engine at `version` supports.
    ///
    /// Engines from 7.0 on have no `ephemeralForTest`; a defaulted
    /// `ephemeralForTest` becomes `wiredTiger` there. A storage engine the
    /// caller chose is left alone. Returns whether anything changed.
    pub fn adapt_to_engine(&mut self, version: &str) -> bool {
        let major = version
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok());
        let removed = major.is_some_and(|major| major >= EPHEMERAL_REMOVED_IN);
        if !removed
            || self.storage_engine_pinned
            || self.storage_engine != StorageEngine::EphemeralForTest
        {
            return false;
        }

        tracing::warn!(
            version,
            from = %StorageEngine::EphemeralForTest,
            to = %StorageEngine::WiredTiger,
            "engine has no ephemeral storage, switching storage engine"
        );
        self.storage_engine = StorageEngine::WiredTiger;
        for member in &mut self.members {
            if let Some(index) = member.args.iter().position(|arg| arg == "--storageEngine") {
                if let Some(value) = member.args.get_mut(index + 1) {
                    *value = StorageEngine::WiredTiger.as_arg().to_string();
                }
            }
        }
        true
    }
}

/// Builds the engine startup parameters for `config` on the negotiated
/// `ports`, one member per port.
///
/// Standalone members use the topology's non-persistent storage engine and
/// the working directory itself as data path. Replica-set members get a
/// `member-<i>` data path below the working directory, the replica-set name
/// and a durable storage engine.
pub fn build_launch_spec(config: &InstanceConfig, ports: &[u16], verbose: bool) -> LaunchSpec {
    let workdir = &config.working_directory;
    let storage_engine = config.topology.storage_engine();

    let (replica_set, members) = match &config.topology {
        Topology::Standalone { .. } => {
            let members = ports
                .iter()
                .take(1)
                .map(|&port| {
                    member_spec(port, workdir.clone(), storage_engine.as_arg(), None, verbose)
                })
                .collect();
            (None, members)
        }
        Topology::ReplicaSet {
            set_name, members, ..
        } => {
            let members = ports
                .iter()
                .take((*members).max(1))
                .enumerate()
                .map(|(index, &port)| {
                    member_spec(
                        port,
                        workdir.join(format!("member-{index}")),
                        storage_engine.as_arg(),
                        Some(set_name),
                        verbose
                    )
                })
                .collect();
            (Some(set_name.clone()), members)
        }
    };

    LaunchSpec {
        binary: config.binary.clone(),
        engine_version: config.engine_version.clone(),
        replica_set,
        storage_engine,
        storage_engine_pinned: config.storage_engine_pinned,
        members,
        startup_timeout: config.startup_timeout
    }
}

fn member_spec(
    port: u16,
    db_path: PathBuf,
    storage_engine: &str,
    replica_set: Option<&String>,
    verbose: bool
) -> MemberSpec {
    let log_path = db_path.join("mongod.log");
    let mut args = vec![
        "--port".to_string(),
        port.to_string(),
        "--bind_ip".to_string(),
        BIND_HOST.to_string(),
        "--dbpath".to_string(),
        db_path.display().to_string(),
        "--storageEngine".to_string(),
        storage_engine.to_string(),
        "--logpath".to_string(),
        log_path.display().to_string(),
    ];
    if let Some(name) = replica_set {
        args.push("--replSet".to_string());
        args.push(name.clone());
    }
    if !verbose {
        args.push("--quiet".to_string());
    }
    MemberSpec {
        port,
        db_path,
        log_path,
        args
    }
}

/// Running engine member processes.
#[async_trait]
pub trait EngineProcess: Send + Sync {
    fn pids(&self) -> Vec<u32>;

    /// Stops every member, forcibly if it does not exit in time.
    async fn stop(&mut self) -> Result<(), LaunchError>;
}

/// Starts the engine described by a [`LaunchSpec`].
///
/// On failure no member process may be left running.
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<ConnectionHandle, LaunchError>;
}

/// Open client connection to a running instance, owned by one controller.
pub struct ConnectionHandle {
    url: String,
    client: Client,
    engine: Box<dyn EngineProcess>
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("url", &self.url)
            .field("pids", &self.engine.pids())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(url: String, client: Client, engine: Box<dyn EngineProcess>) -> Self {
        Self {
            url,
            client,
            engine
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.engine.pids()
    }

    /// Closes the client connection, then stops the engine.
    pub async fn close(self) -> Result<(), LaunchError> {
        let Self {
            url,
            client,
            mut engine
        } = self;
        client.shutdown().await;
        tracing::debug!(url = %url, "client connection closed");
        engine.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{InstanceOptions, StorageEngine, resolve};

    fn config(replica: bool, members: usize) -> InstanceConfig {
        resolve(
            "specs",
            InstanceOptions {
                base_dir: Some(PathBuf::from("/tmp/base")),
                use_replica_set: Some(replica),
                replica_members: Some(members),
                ..Default::default()
            }
        )
    }

    fn arg_after<'a>(member: &'a MemberSpec, flag: &str) -> Option<&'a str> {
        let index = member.args.iter().position(|arg| arg == flag)?;
        member.args.get(index + 1).map(String::as_str)
    }

    #[test]
    fn test_standalone_spec() {
        let spec = build_launch_spec(&config(false, 1), &[28001], false);

        assert_eq!(spec.replica_set, None);
        assert_eq!(spec.members.len(), 1);
        let member = &spec.members[0];
        assert_eq!(member.port, 28001);
        assert_eq!(member.db_path, PathBuf::from("/tmp/base/.scratchdb_specs"));
        assert_eq!(arg_after(member, "--port"), Some("28001"));
        assert_eq!(arg_after(member, "--bind_ip"), Some(BIND_HOST));
        assert_eq!(
            arg_after(member, "--storageEngine"),
            Some(StorageEngine::EphemeralForTest.as_arg())
        );
        assert_eq!(
            arg_after(member, "--logpath"),
            Some("/tmp/base/.scratchdb_specs/mongod.log")
        );
        assert!(!member.args.contains(&"--replSet".to_string()));
        assert!(member.args.contains(&"--quiet".to_string()));
        assert_eq!(spec.connection_url(), "mongodb://127.0.0.1:28001/");
    }

    #[test]
    fn test_replica_set_spec() {
        let spec = build_launch_spec(&config(true, 3), &[28001, 28002, 28003], true);

        assert_eq!(spec.replica_set.as_deref(), Some("specs"));
        assert_eq!(spec.members.len(), 3);
        for (index, member) in spec.members.iter().enumerate() {
            assert_eq!(
                member.db_path,
                PathBuf::from(format!("/tmp/base/.scratchdb_specs/member-{index}"))
            );
            assert_eq!(arg_after(member, "--replSet"), Some("specs"));
            assert_eq!(
                arg_after(member, "--storageEngine"),
                Some(StorageEngine::WiredTiger.as_arg())
            );
            assert!(!member.args.contains(&"--quiet".to_string()));
        }
        assert_eq!(
            spec.connection_url(),
            "mongodb://127.0.0.1:28001,127.0.0.1:28002,127.0.0.1:28003/?replicaSet=specs"
        );
    }

    #[test]
    fn test_spec_carries_version_pin_and_timeout() {
        let mut config = config(false, 1);
        config.engine_version = Some("7.0.2".to_string());
        let spec = build_launch_spec(&config, &[28001], false);
        assert_eq!(spec.engine_version.as_deref(), Some("7.0.2"));
        assert_eq!(spec.startup_timeout, config.startup_timeout);
        assert_eq!(spec.binary, PathBuf::from("mongod"));
    }

    #[test]
    fn test_defaulted_ephemeral_storage_switches_on_engine_7() {
        let mut spec = build_launch_spec(&config(false, 1), &[28001], false);

        assert!(spec.adapt_to_engine("7.0.2"));

        assert_eq!(spec.storage_engine, StorageEngine::WiredTiger);
        assert_eq!(
            arg_after(&spec.members[0], "--storageEngine"),
            Some(StorageEngine::WiredTiger.as_arg())
        );
    }

    #[test]
    fn test_ephemeral_storage_kept_on_older_engines() {
        let mut spec = build_launch_spec(&config(false, 1), &[28001], false);

        assert!(!spec.adapt_to_engine("6.0.14"));
        assert!(!spec.adapt_to_engine("unparseable"));

        assert_eq!(
            arg_after(&spec.members[0], "--storageEngine"),
            Some(StorageEngine::EphemeralForTest.as_arg())
        );
    }

    #[test]
    fn test_chosen_storage_engine_is_never_switched() {
        let config = resolve(
            "specs",
            InstanceOptions {
                base_dir: Some(PathBuf::from("/tmp/base")),
                storage_engine: Some(StorageEngine::EphemeralForTest),
                ..Default::default()
            }
        );
        let mut spec = build_launch_spec(&config, &[28001], false);

        assert!(!spec.adapt_to_engine("8.0.0"));
        assert_eq!(
            arg_after(&spec.members[0], "--storageEngine"),
            Some(StorageEngine::EphemeralForTest.as_arg())
        );
    }
}
