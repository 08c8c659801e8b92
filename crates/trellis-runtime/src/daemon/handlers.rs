use trellis_core::RelayError;

use crate::broker::{CommandSink, Upstream};
use crate::control;
use crate::coordinator::Coordinator;

/// Applies one upstream message to the coordinator and routes the
/// resulting commands back through the broker.
///
/// Nothing here is fatal: a bad event or a failed dispatch only affects
/// the session or workspace it belongs to.
pub(super) fn handle_upstream(coordinator: &Coordinator, sink: &dyn CommandSink, message: Upstream) {
    match message {
        Upstream::SessionOpened {
            session,
            pid,
            process,
        } => {
            coordinator.open_session(session, pid, &process);
            tracing::info!(%session, %pid, process, "observer connected");
        }
        Upstream::Event { session, event } => match coordinator.apply_event(session, &event) {
            Ok(applied) => {
                if !applied.commands.is_empty() {
                    control::dispatch_all(sink, applied.commands);
                }
            }
            Err(e) => log_rejected(&e, session.0, event.seq),
        },
        Upstream::Gap { session, gap } => coordinator.record_gap(session, gap),
        Upstream::SessionClosed {
            session,
            pid,
            reason,
        } => {
            let commands = coordinator.close_session(session);
            tracing::info!(%session, %pid, reason, "observer disconnected");
            if !commands.is_empty() {
                control::dispatch_all(sink, commands);
            }
        }
    }
}

fn log_rejected(e: &RelayError, session: u32, seq: u64) {
    match e {
        RelayError::LayoutInvariantViolation { .. } | RelayError::Halted { .. } => {
            tracing::error!(session, seq, code = e.error_code(), "event left workspace halted: {e}");
        }
        RelayError::ProtocolDesync { .. } => {
            tracing::warn!(session, seq, code = e.error_code(), "event rejected: {e}");
        }
        _ => tracing::debug!(session, seq, code = e.error_code(), "event not applied: {e}"),
    }
}
