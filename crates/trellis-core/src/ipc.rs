use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind};
use crate::window::{WindowDescriptor, WindowId};
use crate::workspace::{MonitorId, WorkspaceId};
use crate::Rect;

/// A request sent from a control client to the daemon.
///
/// These are serialized as one JSON line per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    Move { window: WindowId, rect: Rect },
    Resize { window: WindowId, width: i32, height: i32 },
    Focus { window: WindowId },
    Close { window: WindowId },
    Reparent { window: WindowId, workspace: WorkspaceId },
    /// Ordered window descriptors of one workspace.
    Query { workspace: WorkspaceId },
    /// Daemon-wide counters and per-workspace health.
    Status,
    /// A monitor's geometry changed (display reconfiguration).
    Monitor { monitor: MonitorId, rect: Rect },
    /// Request the daemon to stop.
    Stop,
}

impl Request {
    /// Converts a command-shaped request into the internal command form.
    pub fn as_command(&self) -> Option<Command> {
        let (window, kind) = match self {
            Self::Move { window, rect } => (*window, CommandKind::Move { rect: *rect }),
            Self::Resize {
                window,
                width,
                height,
            } => (
                *window,
                CommandKind::Resize {
                    width: *width,
                    height: *height,
                },
            ),
            Self::Focus { window } => (*window, CommandKind::Focus),
            Self::Close { window } => (*window, CommandKind::Close),
            Self::Reparent { window, workspace } => (
                *window,
                CommandKind::Reparent {
                    workspace: *workspace,
                },
            ),
            Self::Query { .. } | Self::Status | Self::Monitor { .. } | Self::Stop => return None,
        };
        Some(Command::new(window, kind))
    }

    /// Checks parameter shape before the request reaches the coordinator.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Move { rect, .. } | Self::Monitor { rect, .. } if rect.is_empty() => {
                Err(format!("rectangle must have positive size, got {rect:?}"))
            }
            Self::Resize { width, height, .. } if *width <= 0 || *height <= 0 => {
                Err(format!("size must be positive, got {width}x{height}"))
            }
            _ => Ok(()),
        }
    }
}

/// Typed failure reported to control clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    InvalidState,
    TransportError,
}

/// Health of one workspace in a status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub id: WorkspaceId,
    pub monitor: MonitorId,
    pub windows: usize,
    pub layout: String,
    /// Set once an invariant violation stopped event processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Daemon-wide status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub pid: u32,
    pub sessions: usize,
    pub windows: usize,
    /// Total events known lost across all sessions.
    pub lost_events: u64,
    pub workspaces: Vec<WorkspaceStatus>,
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Windows { windows: Vec<WindowDescriptor> },
    Status(StatusReport),
    /// Outcome of a state-changing request. The coordinator change is
    /// committed either way; `undelivered` lists commands no observer
    /// session accepted.
    Dispatched {
        commands: Vec<Command>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        undelivered: Vec<Undelivered>,
    },
}

/// A command the broker could not hand to its target's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Undelivered {
    pub command: Command,
    pub failure: FailureKind,
    pub reason: String,
}

/// A response sent from the daemon back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

/// Status of a daemon response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl Response {
    /// Creates a successful response with no message.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            failure: None,
            message: None,
            payload: None,
        }
    }

    /// Creates a successful response with a message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    /// Creates a successful response carrying a payload.
    pub fn ok_with_payload(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::ok()
        }
    }

    /// Creates a typed failure response.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            failure: Some(kind),
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

impl From<crate::RelayError> for Response {
    fn from(err: crate::RelayError) -> Self {
        Self::failure(err.failure_kind(), err.to_string())
    }
}
