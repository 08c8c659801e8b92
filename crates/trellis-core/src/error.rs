//! Error taxonomy shared by every Trellis component.

use crate::ipc::FailureKind;
use crate::window::{ProcessId, WindowId};
use crate::workspace::WorkspaceId;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Framing failure, timeout or closed stream. Tears the session down.
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// A command targeted a window that is not (or no longer) active.
    #[error("Window {window} not found")]
    StaleReference { window: WindowId },

    #[error("Workspace {workspace} not found")]
    UnknownWorkspace { workspace: WorkspaceId },

    /// Hook registration or injection was refused by OS policy.
    #[error("Capability denied for process {pid}: {reason}")]
    CapabilityDenied { pid: ProcessId, reason: String },

    /// Unparseable or out-of-order frame sequence.
    #[error("Protocol desync: {reason}")]
    ProtocolDesync { reason: String },

    /// The layout strategy produced an unusable assignment.
    #[error("Layout invariant violated: {reason}")]
    LayoutInvariantViolation { reason: String },

    /// The workspace stopped processing after an invariant violation.
    #[error("Workspace {workspace} is halted: {reason}")]
    Halted { workspace: WorkspaceId, reason: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl RelayError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn desync(reason: impl Into<String>) -> Self {
        Self::ProtocolDesync {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT",
            Self::StaleReference { .. } => "STALE_REFERENCE",
            Self::UnknownWorkspace { .. } => "UNKNOWN_WORKSPACE",
            Self::CapabilityDenied { .. } => "CAPABILITY_DENIED",
            Self::ProtocolDesync { .. } => "PROTOCOL_DESYNC",
            Self::LayoutInvariantViolation { .. } => "LAYOUT_INVARIANT",
            Self::Halted { .. } => "WORKSPACE_HALTED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
            Self::Config(_) => "CONFIG",
        }
    }

    /// The typed failure reported to control-plane clients.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::StaleReference { .. } | Self::UnknownWorkspace { .. } => FailureKind::NotFound,
            Self::CapabilityDenied { .. }
            | Self::LayoutInvariantViolation { .. }
            | Self::Halted { .. }
            | Self::InvalidState { .. }
            | Self::Config(_) => FailureKind::InvalidState,
            Self::Transport { .. } | Self::ProtocolDesync { .. } | Self::Io(_) | Self::Json(_) => {
                FailureKind::TransportError
            }
        }
    }

    /// Returns whether the error is a read/write timeout or closed stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_))
    }
}
