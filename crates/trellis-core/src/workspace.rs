use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Rect;
use crate::layout::LayoutKind;
use crate::window::WindowId;

/// Identity of a workspace. Ordering is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub u32);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws{}", self.0)
    }
}

/// Identity of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(pub u32);

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mon{}", self.0)
    }
}

/// A physical display and the workspaces it hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: MonitorId,
    pub rect: Rect,
    /// Workspaces in display order.
    pub workspaces: Vec<WorkspaceId>,
    /// Index into `workspaces` of the one receiving new windows.
    pub active: usize,
}

impl Monitor {
    /// Returns the workspace new windows on this monitor are placed in.
    pub fn active_workspace(&self) -> Option<WorkspaceId> {
        self.workspaces
            .get(self.active)
            .or_else(|| self.workspaces.first())
            .copied()
    }
}

/// An ordered collection of windows sharing one monitor's geometry.
///
/// The ordering determines layout positions: the first tiled window
/// gets the first slot the layout strategy hands out.
#[derive(Debug, Clone)]
pub struct Workspace {
    id: WorkspaceId,
    monitor: MonitorId,
    rect: Rect,
    layout: LayoutKind,
    /// Ordered list of member windows (tiled and floating alike).
    windows: Vec<WindowId>,
}

impl Workspace {
    /// Creates an empty workspace.
    pub fn new(id: WorkspaceId, monitor: MonitorId, rect: Rect, layout: LayoutKind) -> Self {
        Self {
            id,
            monitor,
            rect,
            layout,
            windows: Vec::new(),
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn monitor(&self) -> MonitorId {
        self.monitor
    }

    /// The area available for tiling.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    pub fn layout(&self) -> &LayoutKind {
        &self.layout
    }

    /// Adds a window to the end of the workspace.
    ///
    /// Returns `false` if the window is already a member.
    pub fn add(&mut self, id: WindowId) -> bool {
        if self.windows.contains(&id) {
            return false;
        }
        self.windows.push(id);
        true
    }

    /// Removes a window from the workspace.
    ///
    /// Returns `true` if the window was found and removed.
    pub fn remove(&mut self, id: WindowId) -> bool {
        if let Some(pos) = self.index_of(id) {
            self.windows.remove(pos);
            true
        } else {
            false
        }
    }

    /// Returns whether the workspace holds the given window.
    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains(&id)
    }

    /// Returns the number of member windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns whether the workspace has no windows.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Returns the ordered list of member windows.
    pub fn windows(&self) -> &[WindowId] {
        &self.windows
    }

    /// Swaps two windows by their position indices.
    pub fn swap(&mut self, a: usize, b: usize) {
        if a < self.windows.len() && b < self.windows.len() {
            self.windows.swap(a, b);
        }
    }

    /// Returns the index of the given window, if present.
    pub fn index_of(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|&w| w == id)
    }

    /// Computes the layout for `tiled` windows inside this workspace.
    ///
    /// `tiled` must be a subsequence of [`Workspace::windows`]; floating
    /// and minimized members are excluded by the caller.
    pub fn compute_layout(&self, tiled: &[WindowId]) -> Vec<(WindowId, Rect)> {
        self.layout.strategy().apply(tiled, &self.rect)
    }
}
