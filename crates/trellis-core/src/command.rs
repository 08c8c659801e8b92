use serde::{Deserialize, Serialize};

use crate::Rect;
use crate::window::WindowId;
use crate::workspace::WorkspaceId;

/// A window mutation requested by the coordinator or a control client.
///
/// Commands are idempotent: applying the same command twice leaves the
/// window exactly as applying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    /// Position and size the window.
    Move { rect: Rect },
    /// Change the size, keeping the top-left corner.
    Resize { width: i32, height: i32 },
    /// Give the window keyboard focus.
    Focus,
    /// Ask the window to close.
    Close,
    /// Move the window to another workspace.
    Reparent { workspace: WorkspaceId },
}

impl CommandKind {
    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Resize { .. } => "resize",
            Self::Focus => "focus",
            Self::Close => "close",
            Self::Reparent { .. } => "reparent",
        }
    }

    /// Returns whether the command is carried out by the observer.
    ///
    /// `Reparent` only changes coordinator bookkeeping; the observer sees
    /// its effect as the follow-up `Move` commands of the new layout.
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Self::Reparent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub target: WindowId,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(target: WindowId, kind: CommandKind) -> Self {
        Self { target, kind }
    }

    pub fn move_to(target: WindowId, rect: Rect) -> Self {
        Self::new(target, CommandKind::Move { rect })
    }
}

/// Result of applying a command inside the owning process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied,
    /// The window vanished before the command arrived.
    NotFound,
    Failed { reason: String },
}

/// Observer acknowledgement for the command frame with sequence `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub seq: u64,
    pub outcome: CommandOutcome,
}
