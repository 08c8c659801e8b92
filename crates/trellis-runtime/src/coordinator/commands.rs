//! Validating commands against canonical state.

use trellis_core::{Command, CommandKind, RelayError, Result, WindowId, WindowState, WorkspaceId};

use super::{Coordinator, WorkspaceState, layout, relock};

impl Coordinator {
    /// Checks a command against canonical state and updates it.
    ///
    /// Returns the commands to hand to the broker: the command itself
    /// when it must reach the observer, followed by any moves the
    /// resulting relayout requires. A window that is not active (never
    /// seen, or already destroyed) is a `StaleReference` and leaves all
    /// state untouched.
    pub fn execute(&self, command: &Command) -> Result<Vec<Command>> {
        let window = command.target;
        let Some((ws, mut state)) = self.lock_window(window) else {
            return Err(RelayError::StaleReference { window });
        };
        state.ensure_running()?;
        let current = state
            .windows
            .get(&window)
            .map(|r| r.state)
            .ok_or(RelayError::StaleReference { window })?;

        let mut commands = Vec::new();
        match (&command.kind, current) {
            (CommandKind::Close, WindowState::Closed) => {}
            (_, WindowState::Closed) => {
                return Err(RelayError::invalid_state(format!(
                    "{window} is closing, cannot {}",
                    command.kind.label()
                )));
            }
            (CommandKind::Move { .. } | CommandKind::Resize { .. }, WindowState::Minimized) => {
                return Err(RelayError::invalid_state(format!(
                    "{window} is minimized, cannot {}",
                    command.kind.label()
                )));
            }
            (CommandKind::Focus, _) => commands.push(command.clone()),
            (CommandKind::Move { .. } | CommandKind::Resize { .. }, _) => {
                // An explicit placement takes the window out of tiling.
                set_state(&mut state, window, WindowState::Floating, false);
                commands.push(command.clone());
                commands.append(&mut layout::relayout(&mut state, None)?);
            }
            (CommandKind::Close, _) => {
                set_state(&mut state, window, WindowState::Closed, false);
                commands.push(command.clone());
                commands.append(&mut layout::relayout(&mut state, None)?);
            }
            (CommandKind::Reparent { workspace }, _) => {
                let workspace = *workspace;
                drop(state);
                return self.reparent(window, workspace);
            }
        }

        tracing::debug!(workspace = %ws, %window, command = command.kind.label(), dispatched = commands.len(), "command accepted");
        Ok(commands)
    }

    /// Moves a window to another workspace.
    ///
    /// Locks both workspaces in ascending id order.
    fn reparent(&self, window: WindowId, target: WorkspaceId) -> Result<Vec<Command>> {
        if !self.workspaces.contains_key(&target) {
            return Err(RelayError::UnknownWorkspace { workspace: target });
        }

        loop {
            let Some(source) = self.locate(window) else {
                return Err(RelayError::StaleReference { window });
            };
            if source == target {
                return Ok(Vec::new());
            }

            let (low, high) = if source < target {
                (source, target)
            } else {
                (target, source)
            };
            let mut low_state = self.lock_workspace(low)?;
            let mut high_state = self.lock_workspace(high)?;
            let (from, to) = if source == low {
                (&mut *low_state, &mut *high_state)
            } else {
                (&mut *high_state, &mut *low_state)
            };

            if !from.windows.contains_key(&window) {
                if self.locate(window) == Some(source) {
                    return Err(RelayError::StaleReference { window });
                }
                // Moved concurrently; look it up again.
                continue;
            }
            from.ensure_running()?;
            to.ensure_running()?;

            let Some(record) = from.windows.remove(&window) else {
                return Err(RelayError::StaleReference { window });
            };
            from.workspace.remove(window);
            from.assigned.remove(&window);
            to.workspace.add(window);
            to.windows.insert(window, record);
            relock(&self.locator).insert(window, target);

            let mut commands = layout::relayout(from, None)?;
            commands.append(&mut layout::relayout(to, None)?);
            tracing::info!(%window, from = %source, to = %target, moves = commands.len(), "window reparented");
            return Ok(commands);
        }
    }
}

fn set_state(state: &mut WorkspaceState, window: WindowId, to: WindowState, managed: bool) {
    if let Some(record) = state.windows.get_mut(&window) {
        record.state = to;
        record.managed = managed;
    }
    state.assigned.remove(&window);
}
