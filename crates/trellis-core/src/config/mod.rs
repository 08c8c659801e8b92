mod loader;

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::layout::LayoutKind;
use crate::log::LogConfig;
use crate::workspace::{Monitor, MonitorId, Workspace, WorkspaceId};
use crate::Rect;

pub use loader::{config_dir, config_path, load, load_from, try_load};

/// Errors raised while locating, reading or checking the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns true when the config file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Top-level configuration for Trellis.
///
/// Loaded once at daemon start from `~/.config/trellis/config.toml`.
/// Missing sections fall back to defaults thanks to `#[serde(default)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Layout used by workspaces that do not name their own.
    pub layout: LayoutKind,
    pub monitors: Vec<MonitorConfig>,
    /// Tiling rules, first match wins.
    pub rules: Vec<WindowRule>,
    pub relay: RelayConfig,
    pub broker: BrokerConfig,
    pub control: ControlConfig,
    pub daemon: DaemonConfig,
    pub logging: LogConfig,
}

/// One display and the workspaces it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub id: MonitorId,
    pub rect: Rect,
    pub workspaces: Vec<WorkspaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutKind>,
}

/// Relay channel tuning shared by observers and the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of the observer capture queue before oldest events drop.
    pub queue_capacity: usize,
    /// Idle interval after which a heartbeat frame is sent.
    pub heartbeat_ms: u64,
    /// Silence after which a session is considered dead.
    pub session_timeout_ms: u64,
    /// Socket write timeout.
    pub io_timeout_ms: u64,
}

/// Broker listener and process injection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address observers connect to.
    pub listen: String,
    /// Interval of the process liveness probe.
    pub liveness_ms: u64,
    /// Interval between process table scans for injection.
    pub watch_ms: u64,
    /// Helper executable invoked with the target pid to load an observer.
    /// Injection is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injector: Option<PathBuf>,
    /// Process names eligible for injection. Empty means all.
    pub include: Vec<String>,
    /// Process names never injected. Wins over `include`.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub listen: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Supervisor restarts allowed after a fatal broker/coordinator error.
    pub max_restarts: u32,
}

/// A rule that determines whether a window should be tiled.
///
/// Rules are evaluated in order. The first matching rule wins.
/// If no rule matches, the window is tiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRule {
    /// Match windows whose owning process has this name (case-insensitive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_process: Option<String>,
    /// Match windows whose title contains this string (case-insensitive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_title: Option<String>,
    /// Whether matching windows are tiled (`false` leaves them floating).
    pub manage: bool,
}

/// Monitors and workspaces built from the configuration.
#[derive(Debug, Clone)]
pub struct Topology {
    pub monitors: Vec<Monitor>,
    pub workspaces: Vec<Workspace>,
}

/// Returns the default window rules.
///
/// Picture-in-picture overlays pin their own size and position.
pub fn default_rules() -> Vec<WindowRule> {
    vec![WindowRule {
        match_process: None,
        match_title: Some("Picture-in-Picture".into()),
        manage: false,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: LayoutKind::default(),
            monitors: vec![MonitorConfig::default()],
            rules: default_rules(),
            relay: RelayConfig::default(),
            broker: BrokerConfig::default(),
            control: ControlConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            id: MonitorId(0),
            rect: Rect::new(0, 0, 1920, 1080),
            workspaces: (1..=3)
                .map(|id| WorkspaceConfig {
                    id: WorkspaceId(id),
                    layout: None,
                })
                .collect(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            heartbeat_ms: 500,
            session_timeout_ms: 3000,
            io_timeout_ms: 1000,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:47801".into(),
            liveness_ms: 1000,
            watch_ms: 2000,
            injector: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:47800".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { max_restarts: 3 }
    }
}

impl Config {
    /// Clamps numeric values to safe ranges.
    ///
    /// Keeps the session timeout at least two heartbeats long so an idle
    /// but healthy observer is never declared dead.
    pub fn validate(&mut self) {
        self.layout.validate();
        for monitor in &mut self.monitors {
            for ws in &mut monitor.workspaces {
                if let Some(layout) = ws.layout.as_mut() {
                    layout.validate();
                }
            }
        }
        let relay = &mut self.relay;
        relay.queue_capacity = relay.queue_capacity.clamp(16, 65_536);
        relay.heartbeat_ms = relay.heartbeat_ms.clamp(50, 10_000);
        relay.session_timeout_ms = relay
            .session_timeout_ms
            .clamp(relay.heartbeat_ms * 2, 120_000);
        relay.io_timeout_ms = relay.io_timeout_ms.clamp(50, 30_000);
        self.broker.liveness_ms = self.broker.liveness_ms.clamp(100, 60_000);
        self.broker.watch_ms = self.broker.watch_ms.clamp(250, 60_000);
        self.control.timeout_ms = self.control.timeout_ms.clamp(100, 60_000);
        self.daemon.max_restarts = self.daemon.max_restarts.min(100);
    }

    /// Builds the monitor/workspace snapshot the coordinator starts from.
    ///
    /// Rejects configurations where a workspace id repeats, a monitor has
    /// no workspaces or a monitor has an empty rectangle.
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        if self.monitors.is_empty() {
            return Err(ConfigError::Invalid("at least one monitor is required".into()));
        }

        let mut monitor_ids = HashSet::new();
        let mut workspace_ids = HashSet::new();
        let mut monitors = Vec::with_capacity(self.monitors.len());
        let mut workspaces = Vec::new();

        for mc in &self.monitors {
            if !monitor_ids.insert(mc.id) {
                return Err(ConfigError::Invalid(format!("duplicate monitor {}", mc.id)));
            }
            if mc.rect.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "monitor {} has an empty rectangle",
                    mc.id
                )));
            }
            if mc.workspaces.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "monitor {} has no workspaces",
                    mc.id
                )));
            }

            for wc in &mc.workspaces {
                if !workspace_ids.insert(wc.id) {
                    return Err(ConfigError::Invalid(format!("duplicate workspace {}", wc.id)));
                }
                let layout = wc.layout.clone().unwrap_or_else(|| self.layout.clone());
                workspaces.push(Workspace::new(wc.id, mc.id, mc.rect, layout));
            }
            monitors.push(Monitor {
                id: mc.id,
                rect: mc.rect,
                workspaces: mc.workspaces.iter().map(|w| w.id).collect(),
                active: 0,
            });
        }

        Ok(Topology {
            monitors,
            workspaces,
        })
    }
}

/// Evaluates window rules to decide if a window should be tiled.
///
/// Returns `true` if the window should be tiled. When no rule matches,
/// defaults to `true`.
pub fn should_manage(process: &str, title: &str, rules: &[WindowRule]) -> bool {
    rules
        .iter()
        .find(|rule| matches_rule(process, title, rule))
        .is_none_or(|rule| rule.manage)
}

fn matches_rule(process: &str, title: &str, rule: &WindowRule) -> bool {
    if let Some(ref mp) = rule.match_process
        && !process.eq_ignore_ascii_case(mp)
    {
        return false;
    }
    if let Some(ref mt) = rule.match_title
        && !title
            .to_ascii_lowercase()
            .contains(&mt.to_ascii_lowercase())
    {
        return false;
    }
    rule.match_process.is_some() || rule.match_title.is_some()
}
