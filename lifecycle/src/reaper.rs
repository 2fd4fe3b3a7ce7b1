//! Stale engine process reaping.
//!
//! A crashed or improperly stopped run can leave an engine process holding
//! the working directory's files and its port. Before launching, and again
//! after stopping, every engine process whose arguments reference the
//! working directory is terminated. Processes of other contexts are never
//! touched: the directory matcher is the only filter.
//!
//! The process table comes from `/proc/<pid>/cmdline` where it exists and
//! from `ps -ww` elsewhere.

use async_trait::async_trait;
use errors::ProcessError;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;
use tokio::process::Command;

/// A process observed in the host's process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub command: String,
    pub arguments: String
}

impl ProcessHandle {
    /// Builds a handle from a NUL-separated `/proc/<pid>/cmdline`. Kernel
    /// threads have an empty command line and yield `None`.
    pub fn from_cmdline(pid: u32, cmdline: &[u8]) -> Option<Self> {
        let mut argv = cmdline
            .split(|&byte| byte == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned());
        let command = argv.next()?;
        Some(Self {
            pid,
            command,
            arguments: argv.collect::<Vec<_>>().join(" ")
        })
    }

    /// Parses one line of `ps -ww -A -o pid= -o args=` output.
    pub fn parse_ps_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (pid, args) = line.split_once(char::is_whitespace)?;
        let pid = pid.parse::<u32>().ok()?;
        let args = args.trim();
        let (command, arguments) = match args.split_once(char::is_whitespace) {
            Some((command, arguments)) => (command, arguments.trim()),
            None => (args, "")
        };
        if command.is_empty() {
            return None;
        }
        Some(Self {
            pid,
            command: command.to_string(),
            arguments: arguments.to_string()
        })
    }
}

/// Selects engine processes bound to one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMatcher {
    executable: String,
    directory: String
}

impl ProcessMatcher {
    pub fn new(executable: impl Into<String>, directory: &Path) -> Self {
        let directory = directory.to_string_lossy();
        Self {
            executable: executable.into(),
            directory: directory.trim_end_matches('/').to_string()
        }
    }

    /// True when the command's basename is the engine executable and its
    /// arguments name the directory or a path below it.
    ///
    /// The directory may contain spaces. Sibling directories sharing a
    /// prefix (`.scratchdb_a` vs `.scratchdb_ab`) do not match.
    pub fn matches(&self, process: &ProcessHandle) -> bool {
        if self.directory.is_empty() {
            return false;
        }
        let basename = process
            .command
            .rsplit('/')
            .next()
            .unwrap_or(process.command.as_str());
        if basename != self.executable {
            return false;
        }
        let arguments = process.arguments.as_str();
        arguments
            .match_indices(self.directory.as_str())
            .any(|(start, found)| {
                let before = arguments[..start].chars().next_back();
                let after = arguments[start + found.len()..].chars().next();
                before.is_none_or(|c| c == '=' || c.is_whitespace())
                    && after.is_none_or(|c| c == '/' || c.is_whitespace())
            })
    }
}

/// Host process table capability.
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    async fn find(&self, matcher: &ProcessMatcher) -> Result<Vec<ProcessHandle>, ProcessError>;

    async fn terminate(&self, process: &ProcessHandle) -> Result<(), ProcessError>;
}

/// [`ProcessRegistry`] over the host process table, terminating with
/// `SIGTERM`.
#[derive(Debug, Clone, Default)]
pub struct SystemRegistry;

#[async_trait]
impl ProcessRegistry for SystemRegistry {
    async fn find(&self, matcher: &ProcessMatcher) -> Result<Vec<ProcessHandle>, ProcessError> {
        let table = match proc_table().await {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!(error = %e, "no readable /proc, listing processes with ps");
                ps_table().await?
            }
        };

        let own_pid = std::process::id();
        Ok(table
            .into_iter()
            .filter(|process| process.pid != own_pid && matcher.matches(process))
            .collect())
    }

    async fn terminate(&self, process: &ProcessHandle) -> Result<(), ProcessError> {
        let pid = i32::try_from(process.pid).map_err(|e| ProcessError::Terminate {
            pid: process.pid,
            command: process.command.clone(),
            reason: e.to_string()
        })?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(ProcessError::Terminate {
                pid: process.pid,
                command: process.command.clone(),
                reason: errno.to_string()
            })
        }
    }
}

/// Reads every process's command line from `/proc`.
async fn proc_table() -> std::io::Result<Vec<ProcessHandle>> {
    let mut entries = tokio::fs::read_dir("/proc").await?;
    let mut table = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        // processes exiting mid-scan are skipped
        let Ok(cmdline) = tokio::fs::read(entry.path().join("cmdline")).await else {
            continue;
        };
        table.extend(ProcessHandle::from_cmdline(pid, &cmdline));
    }
    Ok(table)
}

/// Lists processes with `ps`. `-ww` keeps the argument column from being
/// cut to the terminal width.
async fn ps_table() -> Result<Vec<ProcessHandle>, ProcessError> {
    let output = Command::new("ps")
        .args(["-ww", "-A", "-o", "pid=", "-o", "args="])
        .output()
        .await
        .map_err(|e| ProcessError::Enumerate {
            reason: e.to_string()
        })?;

    if !output.status.success() {
        return Err(ProcessError::Enumerate {
            reason: format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(ProcessHandle::parse_ps_line)
        .collect())
}

/// Finds and terminates engine processes left over from previous runs.
#[derive(Debug, Clone)]
pub struct ProcessReaper<R = SystemRegistry> {
    registry: R,
    executable: String
}

impl ProcessReaper<SystemRegistry> {
    pub fn new(executable: impl Into<String>) -> Self {
        Self::with_registry(SystemRegistry, executable)
    }
}

impl<R: ProcessRegistry> ProcessReaper<R> {
    pub fn with_registry(registry: R, executable: impl Into<String>) -> Self {
        Self {
            registry,
            executable: executable.into()
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Terminates every engine process referencing `working_directory` and
    /// returns how many were signalled.
    ///
    /// Zero matches is a success. Every match is attempted even when one
    /// termination fails; the first failure is returned afterwards.
    pub async fn cleanup(&self, working_directory: &Path) -> Result<usize, ProcessError> {
        let matcher = ProcessMatcher::new(self.executable.clone(), working_directory);
        let stale = self.registry.find(&matcher).await?;

        if stale.is_empty() {
            tracing::debug!(
                directory = %working_directory.display(),
                "no stale engine processes"
            );
            return Ok(0);
        }

        let mut first_error = None;
        let mut terminated = 0;
        for process in &stale {
            tracing::warn!(
                pid = process.pid,
                command = %process.command,
                arguments = %process.arguments,
                "killing stale engine process"
            );
            match self.registry.terminate(process).await {
                Ok(()) => terminated += 1,
                Err(e) => {
                    tracing::warn!(pid = process.pid, error = %e, "failed to kill stale process");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(terminated)
        }
    }
}
