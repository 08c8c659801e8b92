//! Canonical window, workspace and monitor state.
//!
//! The coordinator is driven by hook events arriving from the broker and
//! by commands from the control server. It keeps one lock per workspace
//! so unrelated workspaces update concurrently; the window locator,
//! tombstones, focus and session cursors are leaf locks that are only
//! ever taken after (never before) a workspace lock.

mod commands;
mod events;
mod layout;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use trellis_core::config::{Topology, WindowRule};
use trellis_core::ipc::{StatusReport, WorkspaceStatus};
use trellis_core::{
    Command, Monitor, MonitorId, ProcessId, Rect, RelayError, Result, SeqGap, SessionId,
    WindowDescriptor, WindowId, WindowState, Workspace, WorkspaceId,
};

/// What applying one event produced.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    /// Commands to hand to the broker.
    pub commands: Vec<Command>,
    /// Sequence numbers skipped before this event, if any.
    pub gap: Option<SeqGap>,
}

#[derive(Debug, Clone)]
pub(crate) struct WindowRecord {
    pub(crate) title: String,
    /// Last geometry the observer reported.
    pub(crate) rect: Rect,
    pub(crate) state: WindowState,
    /// Whether the window rules allow tiling it.
    pub(crate) managed: bool,
}

pub(crate) struct WorkspaceState {
    pub(crate) workspace: Workspace,
    pub(crate) windows: HashMap<WindowId, WindowRecord>,
    /// Rectangles from the last valid layout.
    pub(crate) assigned: HashMap<WindowId, Rect>,
    pub(crate) halted: Option<String>,
}

impl WorkspaceState {
    fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            windows: HashMap::new(),
            assigned: HashMap::new(),
            halted: None,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(RelayError::Halted {
                workspace: self.workspace.id(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionCursor {
    pid: ProcessId,
    process: String,
    /// `None` until the first event: an observer that reconnects keeps
    /// numbering from where its previous session stopped.
    last_seq: Option<u64>,
    gaps: u64,
    lost: u64,
}

impl SessionCursor {
    fn new(pid: ProcessId, process: String) -> Self {
        Self {
            pid,
            process,
            last_seq: None,
            gaps: 0,
            lost: 0,
        }
    }
}

pub struct Coordinator {
    monitors: Mutex<Vec<Monitor>>,
    workspaces: BTreeMap<WorkspaceId, Mutex<WorkspaceState>>,
    locator: Mutex<HashMap<WindowId, WorkspaceId>>,
    /// Windows whose `Destroyed` event has been applied.
    tombstones: Mutex<HashSet<WindowId>>,
    sessions: Mutex<HashMap<SessionId, SessionCursor>>,
    focused: Mutex<Option<WindowId>>,
    rules: Vec<WindowRule>,
    lost_events: AtomicU64,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Coordinator {
    pub fn new(topology: Topology, rules: Vec<WindowRule>) -> Self {
        let workspaces = topology
            .workspaces
            .into_iter()
            .map(|ws| (ws.id(), Mutex::new(WorkspaceState::new(ws))))
            .collect();
        Self {
            monitors: Mutex::new(topology.monitors),
            workspaces,
            locator: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            focused: Mutex::new(None),
            rules,
            lost_events: AtomicU64::new(0),
        }
    }

    pub(crate) fn lock_workspace(&self, id: WorkspaceId) -> Result<MutexGuard<'_, WorkspaceState>> {
        self.workspaces
            .get(&id)
            .map(relock)
            .ok_or(RelayError::UnknownWorkspace { workspace: id })
    }

    fn locate(&self, window: WindowId) -> Option<WorkspaceId> {
        relock(&self.locator).get(&window).copied()
    }

    /// Locks the workspace currently holding `window`.
    ///
    /// Retries when a concurrent reparent moves the window between the
    /// locator lookup and the workspace lock.
    pub(crate) fn lock_window(
        &self,
        window: WindowId,
    ) -> Option<(WorkspaceId, MutexGuard<'_, WorkspaceState>)> {
        loop {
            let ws = self.locate(window)?;
            let guard = self.lock_workspace(ws).ok()?;
            if guard.windows.contains_key(&window) {
                return Some((ws, guard));
            }
            if self.locate(window) == Some(ws) {
                return None;
            }
        }
    }

    pub fn is_tombstoned(&self, window: WindowId) -> bool {
        relock(&self.tombstones).contains(&window)
    }

    pub fn workspace_of(&self, window: WindowId) -> Option<WorkspaceId> {
        self.lock_window(window).map(|(ws, _)| ws)
    }

    pub fn workspace_ids(&self) -> Vec<WorkspaceId> {
        self.workspaces.keys().copied().collect()
    }

    pub fn focused(&self) -> Option<WindowId> {
        *relock(&self.focused)
    }

    pub fn window_count(&self) -> usize {
        relock(&self.locator).len()
    }

    pub fn lost_events(&self) -> u64 {
        self.lost_events.load(Ordering::Relaxed)
    }

    /// Registers a session so window rules can see its process name.
    pub fn open_session(&self, session: SessionId, pid: ProcessId, process: &str) {
        relock(&self.sessions).insert(session, SessionCursor::new(pid, process.to_string()));
        tracing::debug!(%session, %pid, process, "session registered");
    }

    /// Forgets a session and removes any windows of its process that
    /// are still tracked.
    ///
    /// The broker reports every owned window destroyed before closing a
    /// session, so this normally finds nothing to remove.
    pub fn close_session(&self, session: SessionId) -> Vec<Command> {
        let Some(cursor) = relock(&self.sessions).remove(&session) else {
            return Vec::new();
        };
        if cursor.gaps > 0 {
            tracing::info!(%session, gaps = cursor.gaps, lost = cursor.lost, "session closed with lost events");
        }

        let leftovers: Vec<WindowId> = relock(&self.locator)
            .keys()
            .filter(|w| w.pid == cursor.pid)
            .copied()
            .collect();
        let mut commands = Vec::new();
        for window in leftovers {
            match self.remove_window(window) {
                Ok(mut relaid) => commands.append(&mut relaid),
                Err(e) => tracing::warn!(%session, %window, code = e.error_code(), "cleanup relayout failed: {e}"),
            }
        }
        commands
    }

    /// Ordered descriptors of every window in `workspace`.
    pub fn snapshot(&self, workspace: WorkspaceId) -> Result<Vec<WindowDescriptor>> {
        let state = self.lock_workspace(workspace)?;
        let focused = self.focused();
        Ok(state
            .workspace
            .windows()
            .iter()
            .filter_map(|id| {
                state.windows.get(id).map(|record| WindowDescriptor {
                    id: *id,
                    title: record.title.clone(),
                    rect: record.rect,
                    state: record.state,
                    workspace,
                    focused: focused == Some(*id),
                })
            })
            .collect())
    }

    pub fn status(&self) -> StatusReport {
        let workspaces = self
            .workspaces
            .values()
            .map(|ws| {
                let state = relock(ws);
                WorkspaceStatus {
                    id: state.workspace.id(),
                    monitor: state.workspace.monitor(),
                    windows: state.workspace.len(),
                    layout: state.workspace.layout().strategy().name().to_string(),
                    halted: state.halted.clone(),
                }
            })
            .collect();
        StatusReport {
            pid: std::process::id(),
            sessions: relock(&self.sessions).len(),
            windows: self.window_count(),
            lost_events: self.lost_events(),
            workspaces,
        }
    }

    /// Applies a display configuration change to one monitor.
    ///
    /// Every workspace of the monitor takes the new geometry and is laid
    /// out again; a halted workspace gets another chance.
    pub fn reconfigure_monitor(&self, monitor: MonitorId, rect: Rect) -> Result<Vec<Command>> {
        if rect.is_empty() {
            return Err(RelayError::invalid_state(format!(
                "monitor {monitor} cannot have an empty rectangle"
            )));
        }
        let members = {
            let mut monitors = relock(&self.monitors);
            let entry = monitors
                .iter_mut()
                .find(|m| m.id == monitor)
                .ok_or_else(|| RelayError::invalid_state(format!("unknown monitor {monitor}")))?;
            entry.rect = rect;
            entry.workspaces.clone()
        };

        let mut commands = Vec::new();
        for id in members {
            let mut state = self.lock_workspace(id)?;
            state.workspace.set_rect(rect);
            if let Some(reason) = state.halted.take() {
                tracing::info!(workspace = %id, %reason, "resuming halted workspace");
            }
            match layout::relayout(&mut state, None) {
                Ok(mut moves) => commands.append(&mut moves),
                Err(e) => tracing::warn!(workspace = %id, code = e.error_code(), "workspace stays halted"),
            }
        }
        tracing::info!(%monitor, ?rect, moves = commands.len(), "monitor reconfigured");
        Ok(commands)
    }

    /// Workspace new windows at `rect` are placed in: the active workspace
    /// of the monitor containing the window's center, else of the first
    /// monitor.
    fn placement(&self, rect: &Rect) -> Option<WorkspaceId> {
        let monitors = relock(&self.monitors);
        monitors
            .iter()
            .find(|m| m.rect.contains_point(rect.center_x(), rect.center_y()))
            .or_else(|| monitors.first())
            .and_then(Monitor::active_workspace)
    }

    fn process_of(&self, session: SessionId) -> String {
        relock(&self.sessions)
            .get(&session)
            .map(|c| c.process.clone())
            .unwrap_or_default()
    }

    fn should_manage(&self, process: &str, title: &str) -> bool {
        trellis_core::config::should_manage(process, title, &self.rules)
    }

    /// Drops a window from its workspace and tombstones it.
    fn remove_window(&self, window: WindowId) -> Result<Vec<Command>> {
        let Some((ws, mut state)) = self.lock_window(window) else {
            return Ok(Vec::new());
        };
        state.workspace.remove(window);
        state.windows.remove(&window);
        state.assigned.remove(&window);
        relock(&self.locator).remove(&window);
        relock(&self.tombstones).insert(window);
        {
            let mut focused = relock(&self.focused);
            if *focused == Some(window) {
                *focused = None;
            }
        }
        tracing::debug!(workspace = %ws, %window, "window removed");
        layout::relayout(&mut state, None)
    }
}

#[cfg(test)]
mod tests;
