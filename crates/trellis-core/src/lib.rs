pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod ipc;
pub mod layout;
pub mod log;
pub mod pid;
pub mod rect;
pub mod window;
pub mod workspace;

pub use command::{Command, CommandKind};
pub use error::{RelayError, Result};
pub use event::{HookEvent, HookEventKind, SeqGap};
pub use frame::{Frame, FrameKind, SessionId};
pub use ipc::{Request, Response};
pub use layout::{BspLayout, ColumnsLayout, Layout, LayoutKind};
pub use rect::Rect;
pub use window::{ProcessId, WindowDescriptor, WindowId, WindowState};
pub use workspace::{Monitor, MonitorId, Workspace, WorkspaceId};
