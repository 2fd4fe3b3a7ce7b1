//! `mongod`-backed [`InstanceLauncher`].

use crate::launcher::{
    BIND_HOST, ConnectionHandle, EngineProcess, InstanceLauncher, LaunchSpec, MemberSpec
};
use async_trait::async_trait;
use errors::LaunchError;
use mongodb::Client;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PING_TIMEOUT: Duration = Duration::from_millis(250);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches `mongod` members as child processes of the current process.
#[derive(Debug, Clone, Default)]
pub struct MongodLauncher;

impl MongodLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InstanceLauncher for MongodLauncher {
    async fn launch(&self, mut spec: LaunchSpec) -> Result<ConnectionHandle, LaunchError> {
        match read_engine_version(&spec.binary).await {
            Ok(found) => {
                if let Some(expected) = &spec.engine_version {
                    ensure_version(&found, expected)?;
                }
                spec.adapt_to_engine(&found);
            }
            // without a pin an unreadable version is left to the spawn to report
            Err(e) if spec.engine_version.is_none() => {
                tracing::debug!(error = %e, "engine version unknown");
            }
            Err(e) => return Err(e)
        }

        let deadline = Instant::now() + spec.startup_timeout;
        let mut group = MongodGroup::default();

        match start_group(&spec, &mut group, deadline).await {
            Ok(client) => {
                let url = spec.connection_url();
                tracing::info!(url = %url, pids = ?group.pids(), "engine ready");
                Ok(ConnectionHandle::new(url, client, Box::new(group)))
            }
            Err(e) => {
                if let Err(stop_error) = group.stop().await {
                    tracing::warn!(error = %stop_error, "failed to stop partially started engine");
                }
                Err(e)
            }
        }
    }
}

async fn start_group(
    spec: &LaunchSpec,
    group: &mut MongodGroup,
    deadline: Instant
) -> Result<Client, LaunchError> {
    for member in &spec.members {
        let child = spawn_member(&spec.binary, member)?;
        group.members.push(MongodMember {
            port: member.port,
            pid: child.id(),
            child
        });
    }

    for (member, running) in spec.members.iter().zip(group.members.iter_mut()) {
        wait_ready(running, member, deadline, spec.startup_timeout).await?;
    }

    if let Some(name) = &spec.replica_set {
        initiate_replica_set(name, &spec.members, deadline, spec.startup_timeout).await?;
    }

    connect(&spec.connection_url(), deadline).await
}

fn spawn_member(binary: &Path, member: &MemberSpec) -> Result<Child, LaunchError> {
    std::fs::create_dir_all(&member.db_path).map_err(|source| LaunchError::DataDirectory {
        path: member.db_path.clone(),
        source
    })?;

    let child = Command::new(binary)
        .args(&member.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            binary: binary.display().to_string(),
            source
        })?;

    tracing::debug!(
        pid = ?child.id(),
        port = member.port,
        dbpath = %member.db_path.display(),
        "engine member spawned"
    );
    Ok(child)
}

async fn direct_client(port: u16) -> Result<Client, LaunchError> {
    let url = format!("mongodb://{BIND_HOST}:{port}/?directConnection=true");
    let mut options = ClientOptions::parse(&url)
        .await
        .map_err(|e| LaunchError::Connect {
            url: url.clone(),
            reason: e.to_string()
        })?;
    options.server_selection_timeout = Some(PING_TIMEOUT);
    options.connect_timeout = Some(PING_TIMEOUT);
    Client::with_options(options).map_err(|e| LaunchError::Connect {
        url,
        reason: e.to_string()
    })
}

async fn wait_ready(
    running: &mut MongodMember,
    member: &MemberSpec,
    deadline: Instant,
    startup_timeout: Duration
) -> Result<(), LaunchError> {
    let client = direct_client(member.port).await?;
    let admin = client.database("admin");

    let result = loop {
        if let Ok(Some(status)) = running.child.try_wait() {
            break Err(LaunchError::ExitedEarly {
                port: member.port,
                status: status.to_string(),
                log_path: member.log_path.clone()
            });
        }
        if admin.run_command(doc! { "ping": 1 }).await.is_ok() {
            tracing::debug!(port = member.port, "engine member accepting connections");
            break Ok(());
        }
        if Instant::now() >= deadline {
            break Err(LaunchError::Timeout {
                port: member.port,
                timeout_ms: startup_timeout.as_millis() as u64
            });
        }
        sleep(POLL_INTERVAL).await;
    };

    client.shutdown().await;
    result
}

async fn initiate_replica_set(
    name: &str,
    members: &[MemberSpec],
    deadline: Instant,
    startup_timeout: Duration
) -> Result<(), LaunchError> {
    let Some(first) = members.first() else {
        return Err(LaunchError::ReplicaSetInit {
            name: name.to_string(),
            reason: "no members".to_string()
        });
    };

    let config_members: Vec<Document> = members
        .iter()
        .enumerate()
        .map(|(index, member)| {
            doc! {
                "_id": index as i32,
                "host": format!("{BIND_HOST}:{}", member.port),
            }
        })
        .collect();

    let client = direct_client(first.port).await?;
    let admin = client.database("admin");

    let result: Result<(), LaunchError> = async {
        admin
            .run_command(doc! {
                "replSetInitiate": {
                    "_id": name,
                    "members": config_members,
                }
            })
            .await
            .map_err(|e| LaunchError::ReplicaSetInit {
                name: name.to_string(),
                reason: e.to_string()
            })?;

        loop {
            let writable = admin
                .run_command(doc! { "hello": 1 })
                .await
                .ok()
                .and_then(|reply| reply.get_bool("isWritablePrimary").ok())
                .unwrap_or(false);
            if writable {
                tracing::debug!(replica_set = name, port = first.port, "primary elected");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LaunchError::Timeout {
                    port: first.port,
                    timeout_ms: startup_timeout.as_millis() as u64
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
    .await;

    client.shutdown().await;
    result
}

async fn connect(url: &str, deadline: Instant) -> Result<Client, LaunchError> {
    let connect_error = |reason: String| LaunchError::Connect {
        url: url.to_string(),
        reason
    };

    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(PING_TIMEOUT);
    let mut options = ClientOptions::parse(url)
        .await
        .map_err(|e| connect_error(e.to_string()))?;
    options.server_selection_timeout = Some(remaining);
    let client = Client::with_options(options).map_err(|e| connect_error(e.to_string()))?;

    let admin = client.database("admin");
    match timeout(remaining, admin.run_command(doc! { "ping": 1 })).await {
        Ok(Ok(_)) => Ok(client),
        Ok(Err(e)) => {
            client.shutdown().await;
            Err(connect_error(e.to_string()))
        }
        Err(_) => {
            client.shutdown().await;
            Err(connect_error(format!(
                "no reply within {}ms",
                remaining.as_millis()
            )))
        }
    }
}

/// Reads the version `<binary> --version` reports.
async fn read_engine_version(binary: &Path) -> Result<String, LaunchError> {
    let output = Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| LaunchError::VersionProbe {
            binary: binary.display().to_string(),
            reason: e.to_string()
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version(&stdout).ok_or_else(|| LaunchError::VersionProbe {
        binary: binary.display().to_string(),
        reason: "no `db version` line in output".to_string()
    })
}

/// Compares a reported version with the pin. A pin of `7.0` accepts any
/// `7.0.x` build.
fn ensure_version(found: &str, expected: &str) -> Result<(), LaunchError> {
    if version_satisfies(found, expected) {
        Ok(())
    } else {
        Err(LaunchError::VersionMismatch {
            expected: expected.to_string(),
            found: found.to_string()
        })
    }
}

fn parse_version(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("db version v")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

fn version_satisfies(found: &str, expected: &str) -> bool {
    let expected = expected.trim().trim_start_matches('v');
    found == expected || found.starts_with(&format!("{expected}."))
}

struct MongodMember {
    port: u16,
    pid: Option<u32>,
    child: Child
}

impl MongodMember {
    async fn stop(&mut self) -> Result<(), LaunchError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let stop_error = |reason: String| LaunchError::Stop { pid, reason };

        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        let raw = i32::try_from(pid).map_err(|e| stop_error(e.to_string()))?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(stop_error(errno.to_string()))
        }

        match timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid, port = self.port, %status, "engine member exited");
                Ok(())
            }
            Ok(Err(e)) => Err(stop_error(e.to_string())),
            Err(_) => {
                tracing::warn!(pid, port = self.port, "engine member ignored SIGTERM, killing");
                self.child.kill().await.map_err(|e| stop_error(e.to_string()))
            }
        }
    }
}

#[derive(Default)]
struct MongodGroup {
    members: Vec<MongodMember>
}

#[async_trait]
impl EngineProcess for MongodGroup {
    fn pids(&self) -> Vec<u32> {
        self.members.iter().filter_map(|member| member.pid).collect()
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        let mut first_error = None;
        for member in self.members.iter_mut().rev() {
            if let Err(e) = member.stop().await {
                first_error.get_or_insert(e);
            }
        }
        self.members.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(())
        }
    }
}
