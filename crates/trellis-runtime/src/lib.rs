/// Observer-to-daemon session multiplexer.
pub mod broker;

/// JSON-lines control server and client.
pub mod control;

/// Canonical window and workspace state.
pub mod coordinator;

/// Daemon wiring and supervisor.
pub mod daemon;

/// Per-process event capture and command execution.
pub mod observer;

pub use broker::{Broker, CommandSink, Upstream};
pub use control::{ControlServer, send_request};
pub use coordinator::Coordinator;
pub use daemon::Daemon;
pub use observer::{Observer, VirtualHost, WindowHost};
