//! Running the layout strategy over one workspace.

use std::collections::HashMap;

use trellis_core::layout::validate_assignment;
use trellis_core::{Command, Result, WindowId, WindowState};

use super::WorkspaceState;

/// Windows of the workspace that take part in tiling, in workspace order.
pub(crate) fn tiled_windows(state: &WorkspaceState) -> Vec<WindowId> {
    state
        .workspace
        .windows()
        .iter()
        .filter(|id| {
            state
                .windows
                .get(id)
                .is_some_and(|r| r.state == WindowState::Tiled)
        })
        .copied()
        .collect()
}

/// Recomputes the workspace layout and returns the moves it requires.
///
/// A window gets a `Move` when its assigned rectangle changed, or when it
/// is `drifted` (it just reported a geometry different from its slot).
/// An invalid assignment halts the workspace and keeps the previous one.
/// A halted workspace is not laid out at all.
pub(crate) fn relayout(
    state: &mut WorkspaceState,
    drifted: Option<WindowId>,
) -> Result<Vec<Command>> {
    if state.halted.is_some() {
        return Ok(Vec::new());
    }

    let tiled = tiled_windows(state);
    let work_area = state.workspace.rect();
    let assignment = state.workspace.compute_layout(&tiled);
    if let Err(e) = validate_assignment(&tiled, &work_area, &assignment) {
        let workspace = state.workspace.id();
        tracing::error!(%workspace, code = e.error_code(), "layout rejected, workspace halted: {e}");
        state.halted = Some(e.to_string());
        return Err(e);
    }

    let mut commands = Vec::new();
    let mut next = HashMap::with_capacity(assignment.len());
    for (id, rect) in assignment {
        let changed = state.assigned.get(&id) != Some(&rect);
        let reported = state.windows.get(&id).map(|r| r.rect);
        if changed || (drifted == Some(id) && reported != Some(rect)) {
            commands.push(Command::move_to(id, rect));
        }
        next.insert(id, rect);
    }
    state.assigned = next;
    Ok(commands)
}
