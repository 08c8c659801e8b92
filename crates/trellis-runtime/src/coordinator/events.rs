//! Applying hook events to canonical state.

use std::sync::atomic::Ordering;

use trellis_core::{
    Command, HookEvent, HookEventKind, Rect, RelayError, Result, SeqGap, SessionId, WindowId,
    WindowState,
};

use super::{Applied, Coordinator, SessionCursor, WindowRecord, layout, relock};

impl Coordinator {
    /// Applies one event from `session`.
    ///
    /// Events must arrive with strictly increasing sequence numbers per
    /// session. A repeated or older number is rejected with
    /// `ProtocolDesync` and changes nothing. A number that skips ahead is
    /// applied and the skipped range is returned as a gap. The first event
    /// of a session sets its starting point. Events for
    /// windows the coordinator does not know are ignored.
    pub fn apply_event(&self, session: SessionId, event: &HookEvent) -> Result<Applied> {
        let gap = self.advance_cursor(session, event)?;

        let commands = match &event.kind {
            HookEventKind::Created { rect, title } => {
                self.on_created(session, event.window, *rect, title)?
            }
            HookEventKind::Destroyed => self.remove_window(event.window)?,
            HookEventKind::Moved { rect } => self.on_moved(event.window, *rect)?,
            HookEventKind::FocusChanged => self.on_focus(event.window),
            HookEventKind::TitleChanged { title } => {
                self.update(event.window, |record| record.title = title.clone())?
            }
            HookEventKind::StateChanged { state } => {
                let state = *state;
                self.update(event.window, |record| {
                    record.state = match state {
                        WindowState::Normal if record.managed => WindowState::Tiled,
                        WindowState::Normal => WindowState::Floating,
                        other => other,
                    };
                })?
            }
        };

        tracing::trace!(%session, seq = event.seq, window = %event.window, event = event.kind.label(), moves = commands.len(), "event applied");
        Ok(Applied { commands, gap })
    }

    /// Records events an observer reported dropped before delivery.
    ///
    /// The session cursor jumps to the end of the gap so the next event is
    /// not reported a second time.
    pub fn record_gap(&self, session: SessionId, gap: SeqGap) {
        let mut sessions = relock(&self.sessions);
        let Some(cursor) = sessions.get_mut(&session) else {
            tracing::warn!(%session, "gap for unknown session ignored");
            return;
        };
        if gap.is_empty() || cursor.last_seq.is_some_and(|last| gap.last <= last) {
            return;
        }
        let first = cursor
            .last_seq
            .map_or(gap.first, |last| gap.first.max(last + 1));
        let lost = gap.last - first + 1;
        cursor.last_seq = Some(gap.last);
        cursor.gaps += 1;
        cursor.lost += lost;
        self.lost_events.fetch_add(lost, Ordering::Relaxed);
        tracing::warn!(%session, first, last = gap.last, "observer dropped events");
    }

    fn advance_cursor(&self, session: SessionId, event: &HookEvent) -> Result<Option<SeqGap>> {
        let mut sessions = relock(&self.sessions);
        let cursor = sessions
            .entry(session)
            .or_insert_with(|| SessionCursor::new(event.window.pid, String::new()));
        let gap = match cursor.last_seq {
            Some(last) if event.seq <= last => {
                return Err(RelayError::desync(format!(
                    "session {session} sent seq {} after {last}",
                    event.seq
                )));
            }
            Some(last) => SeqGap::between(last, event.seq),
            None => None,
        };
        if let Some(gap) = gap {
            cursor.gaps += 1;
            cursor.lost += gap.len();
            self.lost_events.fetch_add(gap.len(), Ordering::Relaxed);
            tracing::warn!(%session, first = gap.first, last = gap.last, "sequence gap, events lost");
        }
        cursor.last_seq = Some(event.seq);
        Ok(gap)
    }

    fn on_created(
        &self,
        session: SessionId,
        window: WindowId,
        rect: Rect,
        title: &str,
    ) -> Result<Vec<Command>> {
        if let Some((_, mut state)) = self.lock_window(window) {
            // Re-announced after a reconnect: refresh, keep membership.
            if let Some(record) = state.windows.get_mut(&window) {
                record.rect = rect;
                record.title = title.to_string();
            }
            return layout::relayout(&mut state, Some(window));
        }

        let workspace = self.placement(&rect).ok_or_else(|| {
            RelayError::invalid_state("no workspace available for new windows")
        })?;
        let managed = self.should_manage(&self.process_of(session), title);
        let mut state = self.lock_workspace(workspace)?;
        state.workspace.add(window);
        state.windows.insert(
            window,
            WindowRecord {
                title: title.to_string(),
                rect,
                state: if managed {
                    WindowState::Tiled
                } else {
                    WindowState::Floating
                },
                managed,
            },
        );
        relock(&self.locator).insert(window, workspace);
        if relock(&self.tombstones).remove(&window) {
            tracing::debug!(%window, "handle reused after destroy");
        }
        tracing::debug!(%workspace, %window, managed, "window created");
        layout::relayout(&mut state, None)
    }

    fn on_moved(&self, window: WindowId, rect: Rect) -> Result<Vec<Command>> {
        let Some((_, mut state)) = self.lock_window(window) else {
            return Ok(Vec::new());
        };
        if let Some(record) = state.windows.get_mut(&window) {
            record.rect = rect;
        }
        layout::relayout(&mut state, Some(window))
    }

    fn on_focus(&self, window: WindowId) -> Vec<Command> {
        if self.lock_window(window).is_some() {
            *relock(&self.focused) = Some(window);
        }
        Vec::new()
    }

    fn update(
        &self,
        window: WindowId,
        change: impl FnOnce(&mut WindowRecord),
    ) -> Result<Vec<Command>> {
        let Some((_, mut state)) = self.lock_window(window) else {
            return Ok(Vec::new());
        };
        if let Some(record) = state.windows.get_mut(&window) {
            change(record);
        }
        layout::relayout(&mut state, None)
    }
}
