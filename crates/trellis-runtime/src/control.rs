//! Control-plane server and client.
//!
//! Clients send one JSON [`Request`] per line over TCP and read one JSON
//! [`Response`] line back. The server holds no state of its own: every
//! request goes through the same coordinator calls the relay uses.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use trellis_core::ipc::{FailureKind, Payload, Undelivered};
use trellis_core::{Command, RelayError, Request, Response, Result};

use crate::broker::CommandSink;
use crate::coordinator::Coordinator;

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Answers one request against the coordinator.
///
/// `Stop` is acknowledged here; acting on it is up to the caller.
pub fn handle_request(
    coordinator: &Coordinator,
    sink: &dyn CommandSink,
    request: &Request,
) -> Response {
    if let Err(reason) = request.validate() {
        return Response::failure(FailureKind::InvalidState, reason);
    }

    let result = match request {
        Request::Query { workspace } => coordinator
            .snapshot(*workspace)
            .map(|windows| Payload::Windows { windows }),
        Request::Status => Ok(Payload::Status(coordinator.status())),
        Request::Monitor { monitor, rect } => coordinator
            .reconfigure_monitor(*monitor, *rect)
            .map(|commands| dispatch_all(sink, commands)),
        Request::Stop => return Response::ok_with_message("Daemon stopping"),
        _ => match request.as_command() {
            Some(command) => coordinator
                .execute(&command)
                .map(|commands| dispatch_all(sink, commands)),
            None => Err(RelayError::invalid_state("unsupported request")),
        },
    };

    match result {
        Ok(payload) => Response::ok_with_payload(payload),
        Err(e) => {
            tracing::debug!(code = e.error_code(), "control request failed: {e}");
            e.into()
        }
    }
}

/// Hands commands to the broker, best-effort. Every command is
/// attempted; the ones no session accepted come back as `undelivered`.
/// Coordinator state is not rolled back for them.
pub fn dispatch_all(sink: &dyn CommandSink, commands: Vec<Command>) -> Payload {
    let mut delivered = Vec::with_capacity(commands.len());
    let mut undelivered = Vec::new();
    for command in commands {
        match sink.dispatch(&command) {
            Ok(()) => delivered.push(command),
            Err(e) => {
                tracing::warn!(target_window = %command.target, command = command.kind.label(), code = e.error_code(), "dispatch failed: {e}");
                undelivered.push(Undelivered {
                    failure: e.failure_kind(),
                    reason: e.to_string(),
                    command,
                });
            }
        }
    }
    Payload::Dispatched {
        commands: delivered,
        undelivered,
    }
}

/// Accepts control connections, one thread per connection.
pub struct ControlServer {
    listener: TcpListener,
    timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl ControlServer {
    pub fn bind(addr: &str, timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "control server listening");
        Ok(Self {
            listener,
            timeout,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that makes [`ControlServer::serve`] return.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Serves connections until the stop flag is set.
    pub fn serve<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        while !self.stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    let timeout = self.timeout;
                    thread::spawn(move || {
                        if let Err(e) = serve_connection(stream, timeout, handler.as_ref()) {
                            tracing::debug!(%peer, "control connection ended: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn serve_connection(
    stream: TcpStream,
    timeout: Duration,
    handler: &dyn Fn(Request) -> Response,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => handler(request),
            Err(e) => Response::failure(FailureKind::InvalidState, format!("malformed request: {e}")),
        };
        let json = serde_json::to_string(&response)?;
        writeln!(writer, "{json}")?;
        writer.flush()?;
    }
    Ok(())
}

/// Sends one request to the daemon and returns its response.
///
/// Used by the CLI (client side).
pub fn send_request(addr: &str, request: &Request, timeout: Duration) -> Result<Response> {
    let stream = connect(addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let json = serde_json::to_string(request)?;
    let mut writer = stream.try_clone()?;
    writeln!(writer, "{json}")?;
    writer.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(RelayError::transport("daemon closed the connection"));
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Checks whether something accepts connections on the control address.
pub fn is_daemon_running(addr: &str) -> bool {
    connect(addr, Duration::from_millis(200)).is_ok()
}

fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = addr
        .to_socket_addrs()
        .map_err(|e| RelayError::transport(format!("bad control address {addr}: {e}")))?;
    let mut last = None;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    Err(RelayError::transport(match last {
        Some(e) => format!("cannot reach daemon at {addr}: {e}"),
        None => format!("no address for {addr}"),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use trellis_core::config::Config;
    use trellis_core::{
        CommandKind, HookEvent, HookEventKind, ProcessId, Rect, SessionId, WindowId, WindowState,
        WorkspaceId,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Command>>);

    impl CommandSink for RecordingSink {
        fn dispatch(&self, command: &Command) -> Result<()> {
            self.0.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    struct NoSessions;

    impl CommandSink for NoSessions {
        fn dispatch(&self, command: &Command) -> Result<()> {
            Err(RelayError::StaleReference {
                window: command.target,
            })
        }
    }

    fn coordinator_with_window() -> (Coordinator, WindowId) {
        let config = Config::default();
        let coordinator = Coordinator::new(config.topology().unwrap(), Vec::new());
        coordinator.open_session(SessionId(1), ProcessId(5), "editor");
        let window = WindowId::new(5, 1);
        coordinator
            .apply_event(
                SessionId(1),
                &HookEvent::new(
                    window,
                    1,
                    HookEventKind::Created {
                        rect: Rect::new(0, 0, 100, 100),
                        title: "doc".into(),
                    },
                ),
            )
            .unwrap();
        (coordinator, window)
    }

    #[test]
    fn query_returns_snapshot() {
        // Arrange
        let (coordinator, window) = coordinator_with_window();

        // Act
        let response = handle_request(
            &coordinator,
            &RecordingSink::default(),
            &Request::Query {
                workspace: WorkspaceId(1),
            },
        );

        // Assert
        assert!(response.is_ok());
        assert!(matches!(
            response.payload,
            Some(Payload::Windows { windows }) if windows.len() == 1 && windows[0].id == window
        ));
    }

    #[test]
    fn command_is_executed_and_dispatched() {
        // Arrange
        let (coordinator, window) = coordinator_with_window();
        let sink = RecordingSink::default();

        // Act
        let response = handle_request(&coordinator, &sink, &Request::Focus { window });

        // Assert
        assert!(response.is_ok());
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![Command::new(window, CommandKind::Focus)]
        );
    }

    #[test]
    fn unknown_window_is_typed_not_found() {
        let (coordinator, _) = coordinator_with_window();

        let response = handle_request(
            &coordinator,
            &RecordingSink::default(),
            &Request::Close {
                window: WindowId::new(5, 99),
            },
        );

        assert_eq!(response.failure, Some(FailureKind::NotFound));
    }

    #[test]
    fn invalid_shape_is_rejected_before_coordinator() {
        let (coordinator, window) = coordinator_with_window();

        let response = handle_request(
            &coordinator,
            &RecordingSink::default(),
            &Request::Resize {
                window,
                width: 0,
                height: 10,
            },
        );

        assert_eq!(response.failure, Some(FailureKind::InvalidState));
    }

    #[test]
    fn undelivered_command_is_reported_apart_from_committed_state() {
        // Arrange
        let (coordinator, window) = coordinator_with_window();

        // Act
        let response = handle_request(&coordinator, &NoSessions, &Request::Close { window });

        // Assert
        assert!(response.is_ok());
        let Some(Payload::Dispatched {
            commands,
            undelivered,
        }) = response.payload
        else {
            panic!("expected a dispatch report");
        };
        assert!(commands.is_empty());
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].command, Command::new(window, CommandKind::Close));
        assert_eq!(undelivered[0].failure, FailureKind::NotFound);
        let snapshot = coordinator.snapshot(WorkspaceId(1)).unwrap();
        assert_eq!(snapshot[0].state, WindowState::Closed);
    }

    #[test]
    fn server_answers_json_lines_over_tcp() {
        // Arrange
        let server = ControlServer::bind("127.0.0.1:0", Duration::from_secs(2)).unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let stop = server.stop_handle();
        let serving = thread::spawn(move || {
            server.serve(|request| match request {
                Request::Status => Response::ok_with_message("fine"),
                _ => Response::failure(FailureKind::InvalidState, "nope"),
            })
        });

        // Act
        let status = send_request(&addr, &Request::Status, Duration::from_secs(2)).unwrap();
        let stop_reply = send_request(&addr, &Request::Stop, Duration::from_secs(2)).unwrap();

        // Assert
        assert_eq!(status.message.as_deref(), Some("fine"));
        assert_eq!(stop_reply.failure, Some(FailureKind::InvalidState));
        assert!(is_daemon_running(&addr));
        stop.store(true, Ordering::Relaxed);
        serving.join().unwrap().unwrap();
    }

    #[test]
    fn malformed_line_gets_failure_not_disconnect() {
        // Arrange
        let server = ControlServer::bind("127.0.0.1:0", Duration::from_secs(2)).unwrap();
        let addr = server.local_addr().unwrap();
        let stop = server.stop_handle();
        thread::spawn(move || server.serve(|_| Response::ok()));
        let stream = TcpStream::connect(addr).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        // Act
        writeln!(writer, "{{not json").unwrap();
        writeln!(writer, r#"{{"request":"status"}}"#).unwrap();
        let mut first = String::new();
        let mut second = String::new();
        reader.read_line(&mut first).unwrap();
        reader.read_line(&mut second).unwrap();

        // Assert
        let first: Response = serde_json::from_str(&first).unwrap();
        let second: Response = serde_json::from_str(&second).unwrap();
        assert_eq!(first.failure, Some(FailureKind::InvalidState));
        assert!(second.is_ok());
        stop.store(true, Ordering::Relaxed);
    }
}
