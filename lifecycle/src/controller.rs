//! Lifecycle state machine of one ephemeral instance.

use crate::launcher::{ConnectionHandle, InstanceLauncher, build_launch_spec};
use crate::mongod::MongodLauncher;
use crate::ports::PortNegotiator;
use crate::reaper::{ProcessReaper, ProcessRegistry, SystemRegistry};
use config::InstanceConfig;
use errors::{HarnessError, WorkspaceError};
use std::io::ErrorKind;
use std::path::Path;

/// Lifecycle of a controller.
///
/// `Uninitialized -> Starting -> Ready -> Stopped`, with `Starting -> Failed`
/// on any start step failure. `start` is allowed again from `Stopped` and
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Ready,
    Stopped,
    Failed
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Failed => write!(f, "failed")
        }
    }
}

/// Owns the configuration, the single connection and the engine of one
/// context.
///
/// Lifecycle transitions take `&mut self`, so one controller never runs two
/// of them at once. Two controllers sharing a context name share a working
/// directory; that collision is not guarded against.
pub struct LifecycleController<R = SystemRegistry, L = MongodLauncher> {
    config: InstanceConfig,
    reaper: ProcessReaper<R>,
    ports: PortNegotiator,
    launcher: L,
    state: LifecycleState,
    connection: Option<ConnectionHandle>
}

impl LifecycleController {
    pub fn new(config: InstanceConfig) -> Self {
        Self::with_parts(config, SystemRegistry, MongodLauncher::new())
    }
}

impl<R: ProcessRegistry, L: InstanceLauncher> LifecycleController<R, L> {
    pub fn with_parts(config: InstanceConfig, registry: R, launcher: L) -> Self {
        let reaper = ProcessReaper::with_registry(registry, config.executable_name());
        let ports = PortNegotiator::new(config.port_scan_limit);
        Self {
            config,
            reaper,
            ports,
            launcher,
            state: LifecycleState::Uninitialized,
            connection: None
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    pub fn connection_url(&self) -> Result<&str, HarnessError> {
        self.connection
            .as_ref()
            .map(ConnectionHandle::url)
            .ok_or(HarnessError::not_instantiated("connection_url"))
    }

    /// Brings the instance up and returns its connection URL.
    ///
    /// Returns the existing URL unchanged when already ready. Otherwise:
    /// working directory reset, stale process reaping, port negotiation,
    /// launch. Any failure leaves the controller `Failed` with no engine
    /// running.
    pub async fn start(&mut self, verbose: bool) -> Result<String, HarnessError> {
        if let (LifecycleState::Ready, Some(connection)) = (self.state, &self.connection) {
            tracing::debug!(url = %connection.url(), "instance already running");
            return Ok(connection.url().to_string());
        }

        self.state = LifecycleState::Starting;
        match self.bring_up(verbose).await {
            Ok(connection) => {
                let url = connection.url().to_string();
                self.connection = Some(connection);
                self.state = LifecycleState::Ready;
                tracing::info!(context = %self.config.context_name, url = %url, "instance ready");
                Ok(url)
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                tracing::warn!(context = %self.config.context_name, error = %e, "instance start failed");
                Err(e)
            }
        }
    }

    async fn bring_up(&self, verbose: bool) -> Result<ConnectionHandle, HarnessError> {
        let workdir = &self.config.working_directory;
        log_step(verbose, "preparing working directory", workdir);
        prepare_working_directory(workdir).await?;

        log_step(verbose, "reaping stale engine processes", workdir);
        self.reaper.cleanup(workdir).await?;

        let ports = self
            .ports
            .acquire_many(self.config.base_port, self.config.topology.member_count())
            .await?;
        if verbose {
            tracing::info!(ports = ?ports, "ports negotiated");
        } else {
            tracing::debug!(ports = ?ports, "ports negotiated");
        }

        let spec = build_launch_spec(&self.config, &ports, verbose);
        Ok(self.launcher.launch(spec).await?)
    }

    /// Closes the connection, stops the engine, reaps again and waits the
    /// configured grace period.
    ///
    /// Reaping and the grace period happen even when closing fails; the
    /// close error is reported afterwards.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        let connection = self
            .connection
            .take()
            .ok_or(HarnessError::not_instantiated("stop"))?;

        tracing::info!(context = %self.config.context_name, pids = ?connection.pids(), "stopping instance");
        let closed = connection.close().await;
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "engine did not stop cleanly");
        }

        let reaped = self.reaper.cleanup(&self.config.working_directory).await;
        tokio::time::sleep(self.config.stop_grace_period).await;
        self.state = LifecycleState::Stopped;

        closed?;
        reaped?;
        Ok(())
    }
}

fn log_step(verbose: bool, step: &str, workdir: &Path) {
    if verbose {
        tracing::info!(directory = %workdir.display(), "{step}");
    } else {
        tracing::debug!(directory = %workdir.display(), "{step}");
    }
}

/// Removes and recreates `path`. A concurrent creation (`AlreadyExists`) is
/// benign.
async fn prepare_working_directory(path: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(WorkspaceError::Prepare {
                path: path.to_path_buf(),
                source
            });
        }
    }
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(WorkspaceError::Prepare {
            path: path.to_path_buf(),
            source
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{EngineProcess, LaunchSpec};
    use crate::reaper::{ProcessHandle, ProcessMatcher};
    use async_trait::async_trait;
    use config::{InstanceOptions, resolve};
    use errors::{LaunchError, ProcessError};
    use mongodb::Client;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        stops: AtomicUsize,
        reaps: AtomicUsize
    }

    #[derive(Clone, Default)]
    struct FakeRegistry {
        counters: Arc<Counters>
    }

    #[async_trait]
    impl ProcessRegistry for FakeRegistry {
        async fn find(
            &self,
            _matcher: &ProcessMatcher
        ) -> Result<Vec<ProcessHandle>, ProcessError> {
            self.counters.reaps.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn terminate(&self, _process: &ProcessHandle) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    struct FakeEngine {
        counters: Arc<Counters>,
        fail_stop: bool
    }

    #[async_trait]
    impl EngineProcess for FakeEngine {
        fn pids(&self) -> Vec<u32> {
            vec![4242]
        }

        async fn stop(&mut self) -> Result<(), LaunchError> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(LaunchError::Stop {
                    pid: 4242,
                    reason: "EPERM".to_string()
                });
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeLauncher {
        counters: Arc<Counters>,
        fail: bool,
        fail_stop: bool
    }

    #[async_trait]
    impl InstanceLauncher for FakeLauncher {
        async fn launch(&self, spec: LaunchSpec) -> Result<ConnectionHandle, LaunchError> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LaunchError::Timeout {
                    port: spec.members[0].port,
                    timeout_ms: 10
                });
            }
            let url = spec.connection_url();
            let client = Client::with_uri_str(&url)
                .await
                .map_err(|e| LaunchError::Connect {
                    url: url.clone(),
                    reason: e.to_string()
                })?;
            let engine = FakeEngine {
                counters: self.counters.clone(),
                fail_stop: self.fail_stop
            };
            Ok(ConnectionHandle::new(url, client, Box::new(engine)))
        }
    }

    fn controller(
        dir: &TempDir,
        fail: bool
    ) -> (LifecycleController<FakeRegistry, FakeLauncher>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let config = resolve(
            "controller",
            InstanceOptions {
                base_dir: Some(dir.path().to_path_buf()),
                stop_grace_period_ms: Some(1),
                ..Default::default()
            }
        );
        let registry = FakeRegistry {
            counters: counters.clone()
        };
        let launcher = FakeLauncher {
            counters: counters.clone(),
            fail,
            fail_stop: false
        };
        (
            LifecycleController::with_parts(config, registry, launcher),
            counters
        )
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut controller, counters) = controller(&dir, false);
        assert_eq!(controller.state(), LifecycleState::Uninitialized);

        let first = controller.start(false).await.unwrap();
        let second = controller.start(false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(controller.state(), LifecycleState::Ready);
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.reaps.load(Ordering::SeqCst), 1);
        assert_eq!(controller.connection_url().unwrap(), first);
    }

    #[tokio::test]
    async fn test_start_resets_working_directory() {
        let dir = TempDir::new().unwrap();
        let (mut controller, _counters) = controller(&dir, false);
        let workdir = controller.config().working_directory.clone();
        std::fs::create_dir_all(&workdir).unwrap();
        std::fs::write(workdir.join("leftover.lock"), "stale").unwrap();

        controller.start(false).await.unwrap();

        assert!(workdir.is_dir());
        assert!(!workdir.join("leftover.lock").exists());
    }

    #[tokio::test]
    async fn test_stop_then_start_relaunches() {
        let dir = TempDir::new().unwrap();
        let (mut controller, counters) = controller(&dir, false);

        controller.start(true).await.unwrap();
        controller.stop().await.unwrap();

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.connection_url().unwrap_err().is_not_instantiated());
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        // one reap on start, one safety-net reap on stop
        assert_eq!(counters.reaps.load(Ordering::SeqCst), 2);

        controller.start(false).await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Ready);
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_reaps_even_when_engine_fails_to_stop() {
        let dir = TempDir::new().unwrap();
        let counters = Arc::new(Counters::default());
        let config = resolve(
            "failing-stop",
            InstanceOptions {
                base_dir: Some(dir.path().to_path_buf()),
                stop_grace_period_ms: Some(50),
                ..Default::default()
            }
        );
        let registry = FakeRegistry {
            counters: counters.clone()
        };
        let launcher = FakeLauncher {
            counters: counters.clone(),
            fail: false,
            fail_stop: true
        };
        let mut controller = LifecycleController::with_parts(config, registry, launcher);
        controller.start(false).await.unwrap();

        let started = std::time::Instant::now();
        let err = controller.stop().await.unwrap_err();

        assert!(matches!(err, HarnessError::Launch(LaunchError::Stop { pid: 4242, .. })));
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counters.reaps.load(Ordering::SeqCst), 2);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.connection_url().unwrap_err().is_not_instantiated());
    }

    #[test]
    fn test_lifecycle_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let dir = TempDir::new().unwrap();
        let mut controller = LifecycleController::new(resolve(
            "send",
            InstanceOptions {
                base_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }
        ));
        assert_send(&controller.start(false));
        assert_send(&controller.stop());
    }

    #[tokio::test]
    async fn test_operations_before_start_are_not_instantiated() {
        let dir = TempDir::new().unwrap();
        let (mut controller, counters) = controller(&dir, false);

        assert!(controller.connection_url().unwrap_err().is_not_instantiated());
        assert!(controller.stop().await.unwrap_err().is_not_instantiated());
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_launch_failure_transitions_to_failed() {
        let dir = TempDir::new().unwrap();
        let (mut controller, counters) = controller(&dir, true);

        let err = controller.start(false).await.unwrap_err();

        assert!(matches!(err, HarnessError::Launch(LaunchError::Timeout { .. })));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.connection().is_none());
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_working_directory_creates_missing_parents() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        prepare_working_directory(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
