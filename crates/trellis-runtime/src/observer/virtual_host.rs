//! In-memory window host.
//!
//! Windows live in a map. User actions (`open`, `drag`, `close`, ...)
//! and applied commands feed the capture path the same way real hook
//! callbacks would, so everything above the [`WindowHost`] seam runs
//! unmodified against it.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use trellis_core::window::WindowTraits;
use trellis_core::{
    Command, CommandKind, HookEventKind, ProcessId, Rect, RelayError, Result, WindowId,
    WindowState,
};

use super::{CaptureSink, WindowHost};

/// A window owned by a [`VirtualHost`].
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualWindow {
    pub title: String,
    pub rect: Rect,
    pub state: WindowState,
    pub traits: WindowTraits,
}

pub struct VirtualHost {
    pid: ProcessId,
    name: String,
    deny: Option<String>,
    state: Mutex<HostState>,
}

struct HostState {
    windows: BTreeMap<u64, VirtualWindow>,
    focused: Option<u64>,
    sink: Option<CaptureSink>,
    next_handle: u64,
}

impl HostState {
    fn emit(&self, pid: ProcessId, handle: u64, kind: HookEventKind) {
        let (Some(sink), Some(window)) = (&self.sink, self.windows.get(&handle)) else {
            return;
        };
        sink.capture_window(WindowId { pid, handle }, window.traits, kind);
    }
}

impl VirtualHost {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid: ProcessId(pid),
            name: name.into(),
            deny: None,
            state: Mutex::new(HostState {
                windows: BTreeMap::new(),
                focused: None,
                sink: None,
                next_handle: 0x100,
            }),
        }
    }

    /// Makes `install` fail the way a sandboxed process would.
    pub fn denying(mut self, reason: impl Into<String>) -> Self {
        self.deny = Some(reason.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id(&self, handle: u64) -> WindowId {
        WindowId {
            pid: self.pid,
            handle,
        }
    }

    /// Opens an ordinary application window.
    pub fn open(&self, title: &str, rect: Rect) -> WindowId {
        self.open_with(title, rect, WindowTraits::app())
    }

    pub fn open_with(&self, title: &str, rect: Rect, traits: WindowTraits) -> WindowId {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.windows.insert(
            handle,
            VirtualWindow {
                title: title.to_string(),
                rect,
                state: WindowState::Normal,
                traits,
            },
        );
        state.emit(
            self.pid,
            handle,
            HookEventKind::Created {
                rect,
                title: title.to_string(),
            },
        );
        self.id(handle)
    }

    /// The user closed the window.
    pub fn close(&self, id: WindowId) -> bool {
        let mut state = self.lock();
        Self::destroy(&mut state, self.pid, id.handle)
    }

    /// The user dragged the window to `rect`.
    pub fn drag(&self, id: WindowId, rect: Rect) -> bool {
        let mut state = self.lock();
        Self::reposition(&mut state, self.pid, id.handle, rect)
    }

    pub fn retitle(&self, id: WindowId, title: &str) -> bool {
        let mut state = self.lock();
        let Some(window) = state.windows.get_mut(&id.handle) else {
            return false;
        };
        window.title = title.to_string();
        state.emit(
            self.pid,
            id.handle,
            HookEventKind::TitleChanged {
                title: title.to_string(),
            },
        );
        true
    }

    /// The user minimized, maximized or restored the window.
    pub fn set_state(&self, id: WindowId, new_state: WindowState) -> bool {
        let mut state = self.lock();
        let Some(window) = state.windows.get_mut(&id.handle) else {
            return false;
        };
        if window.state == new_state {
            return true;
        }
        window.state = new_state;
        state.emit(
            self.pid,
            id.handle,
            HookEventKind::StateChanged { state: new_state },
        );
        true
    }

    /// The user clicked the window.
    pub fn click(&self, id: WindowId) -> bool {
        let mut state = self.lock();
        Self::focus(&mut state, self.pid, id.handle)
    }

    pub fn window(&self, id: WindowId) -> Option<VirtualWindow> {
        self.lock().windows.get(&id.handle).cloned()
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.lock().focused.map(|h| self.id(h))
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.lock().windows.keys().map(|&h| self.id(h)).collect()
    }

    fn destroy(state: &mut HostState, pid: ProcessId, handle: u64) -> bool {
        if !state.windows.contains_key(&handle) {
            return false;
        }
        // Emit while the window is still known so its traits are checked.
        state.emit(pid, handle, HookEventKind::Destroyed);
        state.windows.remove(&handle);
        if state.focused == Some(handle) {
            state.focused = None;
        }
        true
    }

    fn reposition(state: &mut HostState, pid: ProcessId, handle: u64, rect: Rect) -> bool {
        let Some(window) = state.windows.get_mut(&handle) else {
            return false;
        };
        if window.rect != rect {
            window.rect = rect;
            state.emit(pid, handle, HookEventKind::Moved { rect });
        }
        true
    }

    fn focus(state: &mut HostState, pid: ProcessId, handle: u64) -> bool {
        if !state.windows.contains_key(&handle) {
            return false;
        }
        if state.focused != Some(handle) {
            state.focused = Some(handle);
            state.emit(pid, handle, HookEventKind::FocusChanged);
        }
        true
    }
}

impl WindowHost for VirtualHost {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn process_name(&self) -> String {
        self.name.clone()
    }

    fn install(&self, sink: CaptureSink) -> Result<()> {
        if let Some(reason) = &self.deny {
            return Err(RelayError::CapabilityDenied {
                pid: self.pid,
                reason: reason.clone(),
            });
        }
        let mut state = self.lock();
        state.sink = Some(sink);
        // Report windows that existed before the hook was attached.
        let existing: Vec<(u64, Rect, String)> = state
            .windows
            .iter()
            .map(|(&h, w)| (h, w.rect, w.title.clone()))
            .collect();
        for (handle, rect, title) in existing {
            state.emit(self.pid, handle, HookEventKind::Created { rect, title });
        }
        Ok(())
    }

    fn uninstall(&self) {
        self.lock().sink = None;
    }

    fn apply(&self, command: &Command) -> Result<()> {
        let handle = command.target.handle;
        let mut state = self.lock();
        let Some(current) = state.windows.get(&handle).map(|w| w.rect) else {
            return Err(RelayError::StaleReference {
                window: command.target,
            });
        };

        match command.kind {
            CommandKind::Move { rect } => {
                Self::reposition(&mut state, self.pid, handle, rect);
            }
            CommandKind::Resize { width, height } => {
                let rect = Rect::new(current.x, current.y, width, height);
                Self::reposition(&mut state, self.pid, handle, rect);
            }
            CommandKind::Focus => {
                Self::focus(&mut state, self.pid, handle);
            }
            CommandKind::Close => {
                Self::destroy(&mut state, self.pid, handle);
            }
            // Workspace membership is coordinator bookkeeping only.
            CommandKind::Reparent { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Captured;

    fn installed() -> (VirtualHost, CaptureSink) {
        let host = VirtualHost::new(7, "editor");
        let sink = CaptureSink::new(32);
        host.install(sink.clone()).unwrap();
        (host, sink)
    }

    #[test]
    fn repeated_move_is_a_no_op() {
        // Arrange
        let (host, sink) = installed();
        let id = host.open("doc", Rect::new(0, 0, 100, 100));
        sink.drain();
        let cmd = Command::move_to(id, Rect::new(5, 5, 300, 200));

        // Act
        host.apply(&cmd).unwrap();
        host.apply(&cmd).unwrap();

        // Assert
        assert_eq!(sink.drain().len(), 1);
        assert_eq!(host.window(id).unwrap().rect, Rect::new(5, 5, 300, 200));
    }

    #[test]
    fn resize_keeps_top_left_corner() {
        // Arrange
        let (host, _sink) = installed();
        let id = host.open("doc", Rect::new(40, 30, 100, 100));

        // Act
        host.apply(&Command::new(
            id,
            CommandKind::Resize {
                width: 640,
                height: 480,
            },
        ))
        .unwrap();

        // Assert
        assert_eq!(host.window(id).unwrap().rect, Rect::new(40, 30, 640, 480));
    }

    #[test]
    fn close_command_emits_destroyed_and_forgets_window() {
        // Arrange
        let (host, sink) = installed();
        let id = host.open("doc", Rect::new(0, 0, 100, 100));
        host.click(id);
        sink.drain();

        // Act
        host.apply(&Command::new(id, CommandKind::Close)).unwrap();

        // Assert
        let drained = sink.drain();
        assert!(matches!(
            &drained[..],
            [Captured::Event(e)] if e.kind == HookEventKind::Destroyed
        ));
        assert!(host.window(id).is_none());
        assert_eq!(host.focused(), None);
        assert!(matches!(
            host.apply(&Command::new(id, CommandKind::Focus)),
            Err(RelayError::StaleReference { .. })
        ));
    }

    #[test]
    fn tool_windows_exist_but_are_not_reported() {
        // Arrange
        let (host, sink) = installed();
        let traits = WindowTraits {
            tool_window: true,
            ..WindowTraits::app()
        };

        // Act
        let id = host.open_with("palette", Rect::new(0, 0, 50, 50), traits);

        // Assert
        assert!(host.window(id).is_some());
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn nothing_is_captured_after_uninstall() {
        // Arrange
        let (host, sink) = installed();
        host.uninstall();

        // Act
        host.open("late", Rect::new(0, 0, 10, 10));

        // Assert
        assert!(sink.drain().is_empty());
    }
}
