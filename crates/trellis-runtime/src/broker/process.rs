//! Process lifecycle boundary: discovering processes to observe,
//! injecting observers into them, and probing whether they still run.

use std::collections::HashSet;
use std::path::PathBuf;

use sysinfo::{Pid, ProcessesToUpdate, System};
use trellis_core::config::BrokerConfig;
use trellis_core::{ProcessId, RelayError, Result};

/// A process seen by a [`ProcessFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedProcess {
    pub pid: ProcessId,
    pub name: String,
}

/// Source of "new process observed" notifications.
pub trait ProcessFeed: Send {
    /// Returns processes that appeared since the previous poll.
    fn poll(&mut self) -> Vec<ObservedProcess>;
}

/// Loads an observer into a running process.
pub trait Injector: Send + Sync {
    /// Returns `CapabilityDenied` when the OS refuses the injection.
    fn inject(&self, process: &ObservedProcess) -> Result<()>;
}

/// Answers whether a process is still running.
pub trait ProcessProbe: Send {
    fn is_alive(&mut self, pid: ProcessId) -> bool;
}

/// Which processes get an observer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionPolicy {
    /// Empty means every process not excluded.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl InjectionPolicy {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            include: config.include.clone(),
            exclude: config.exclude.clone(),
        }
    }

    /// Exclusions win over inclusions. Names compare case-insensitively.
    pub fn allows(&self, name: &str) -> bool {
        let listed = |list: &[String]| list.iter().any(|n| n.eq_ignore_ascii_case(name));
        if listed(&self.exclude) {
            return false;
        }
        self.include.is_empty() || listed(&self.include)
    }
}

/// [`ProcessFeed`] that polls the OS process table.
///
/// The first poll reports every running process.
pub struct ProcessWatcher {
    system: System,
    seen: HashSet<Pid>,
}

impl ProcessWatcher {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            seen: HashSet::new(),
        }
    }
}

impl Default for ProcessWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFeed for ProcessWatcher {
    fn poll(&mut self) -> Vec<ObservedProcess> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let mut fresh = Vec::new();
        let mut current = HashSet::with_capacity(self.system.processes().len());
        for (pid, process) in self.system.processes() {
            current.insert(*pid);
            if !self.seen.contains(pid) {
                fresh.push(ObservedProcess {
                    pid: ProcessId(pid.as_u32()),
                    name: process.name().to_string_lossy().into_owned(),
                });
            }
        }
        self.seen = current;
        fresh.sort_by_key(|p| p.pid);
        fresh
    }
}

/// [`ProcessProbe`] backed by the OS process table.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_alive(&mut self, pid: ProcessId) -> bool {
        let pid = Pid::from_u32(pid.0);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).is_some()
    }
}

/// Terminates a process. Returns whether a signal was delivered.
///
/// Used to clean up a daemon that holds its PID file but no longer
/// answers on the control socket.
pub fn kill_process(pid: ProcessId) -> bool {
    let pid = Pid::from_u32(pid.0);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some_and(|process| process.kill())
}

/// [`Injector`] that runs a helper executable:
/// `<program> --pid <pid> --broker <addr>`.
#[derive(Debug, Clone)]
pub struct CommandInjector {
    program: PathBuf,
    broker_addr: String,
}

impl CommandInjector {
    pub fn new(program: PathBuf, broker_addr: impl Into<String>) -> Self {
        Self {
            program,
            broker_addr: broker_addr.into(),
        }
    }
}

impl Injector for CommandInjector {
    fn inject(&self, process: &ObservedProcess) -> Result<()> {
        let status = std::process::Command::new(&self.program)
            .arg("--pid")
            .arg(process.pid.0.to_string())
            .arg("--broker")
            .arg(&self.broker_addr)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(RelayError::CapabilityDenied {
                pid: process.pid,
                reason: format!("{} exited with {status}", self.program.display()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_wins_over_inclusion() {
        // Arrange
        let policy = InjectionPolicy {
            include: vec!["editor".into(), "Shell".into()],
            exclude: vec!["shell".into()],
        };

        // Act / Assert
        assert!(policy.allows("Editor"));
        assert!(!policy.allows("shell"));
        assert!(!policy.allows("browser"));
    }

    #[test]
    fn empty_include_allows_everything_not_excluded() {
        let policy = InjectionPolicy {
            include: Vec::new(),
            exclude: vec!["init".into()],
        };

        assert!(policy.allows("anything"));
        assert!(!policy.allows("init"));
    }

    #[test]
    fn current_process_is_alive() {
        let mut probe = SysinfoProbe::new();

        assert!(probe.is_alive(ProcessId(std::process::id())));
    }

    #[test]
    fn watcher_reports_processes_once() {
        // Arrange
        let mut watcher = ProcessWatcher::new();
        let me = ProcessId(std::process::id());

        // Act
        let first = watcher.poll();
        let second = watcher.poll();

        // Assert
        assert!(first.iter().any(|p| p.pid == me));
        assert!(!second.iter().any(|p| p.pid == me));
    }

    #[test]
    fn failing_helper_is_capability_denied() {
        // Arrange
        let injector = CommandInjector::new(PathBuf::from("false"), "127.0.0.1:1");
        let process = ObservedProcess {
            pid: ProcessId(1),
            name: "init".into(),
        };

        // Act
        let result = injector.inject(&process);

        // Assert
        assert!(matches!(
            result,
            Err(RelayError::CapabilityDenied { .. }) | Err(RelayError::Io(_))
        ));
    }
}
