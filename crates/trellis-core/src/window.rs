use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Rect;
use crate::workspace::WorkspaceId;

/// Operating-system process identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a window: an opaque per-process handle plus the owning process.
///
/// Handles are only unique within a process, so the pair is the key
/// everywhere a window is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId {
    pub pid: ProcessId,
    pub handle: u64,
}

impl WindowId {
    pub fn new(pid: u32, handle: u64) -> Self {
        Self {
            pid: ProcessId(pid),
            handle,
        }
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{:X}", self.pid, self.handle)
    }
}

/// Parses the display form `pid:0xHANDLE`. A handle without the `0x`
/// prefix is read as decimal.
impl FromStr for WindowId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pid, handle) = s
            .split_once(':')
            .ok_or_else(|| format!("expected pid:handle, got {s:?}"))?;
        let pid = pid
            .trim()
            .parse()
            .map_err(|e| format!("invalid pid {pid:?}: {e}"))?;
        let handle = handle.trim();
        let parsed = match handle
            .strip_prefix("0x")
            .or_else(|| handle.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => handle.parse(),
        };
        let handle = parsed.map_err(|e| format!("invalid handle {handle:?}: {e}"))?;
        Ok(Self::new(pid, handle))
    }
}

/// Display state of a window as tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Normal,
    Minimized,
    Maximized,
    Floating,
    Tiled,
    /// A close was requested; the window lingers until its `Destroyed`
    /// event arrives.
    Closed,
}

/// Structural traits the observer inspects before reporting a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowTraits {
    /// The window is its own root ancestor.
    pub top_level: bool,
    /// The window has a caption (title bar).
    pub captioned: bool,
    /// The window is a tool window (palettes, floating toolbars).
    pub tool_window: bool,
}

impl WindowTraits {
    /// Traits of an ordinary application window.
    pub fn app() -> Self {
        Self {
            top_level: true,
            captioned: true,
            tool_window: false,
        }
    }

    /// Returns whether lifecycle events for this window are worth relaying.
    ///
    /// Child windows, caption-less popups and tool windows never take part
    /// in tiling, so the observer drops their events at capture time.
    pub fn is_eligible(&self) -> bool {
        self.top_level && self.captioned && !self.tool_window
    }
}

/// A read-only view of a window returned by workspace snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDescriptor {
    pub id: WindowId,
    pub title: String,
    pub rect: Rect,
    pub state: WindowState,
    pub workspace: WorkspaceId,
    pub focused: bool,
}
