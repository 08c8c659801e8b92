//! The per-process half of the relay.
//!
//! An [`Observer`] lives inside an observed process. The host's hook
//! callbacks push lifecycle events into a [`CaptureSink`]; a single
//! delivery thread ([`Observer::run_delivery`]) owns the connection to
//! the broker, drains the sink, and applies incoming commands through the
//! [`WindowHost`].

mod capture;
mod virtual_host;

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use trellis_core::channel::{FrameReader, FrameWriter, ReadOutcome};
use trellis_core::command::{CommandAck, CommandOutcome};
use trellis_core::config::RelayConfig;
use trellis_core::frame::Message;
use trellis_core::{Command, Frame, ProcessId, RelayError, Result, SessionId};

pub use capture::{CaptureSink, Captured};
pub use virtual_host::{VirtualHost, VirtualWindow};

/// The platform seam: how an observer hooks and mutates windows of the
/// process it lives in.
pub trait WindowHost: Send + Sync {
    fn pid(&self) -> ProcessId;

    /// Executable name, used by the coordinator's window rules.
    fn process_name(&self) -> String;

    /// Attaches the process-local hook. Lifecycle events of eligible
    /// windows flow into `sink` from then on.
    ///
    /// Returns `CapabilityDenied` when the OS refuses the hook.
    fn install(&self, sink: CaptureSink) -> Result<()>;

    /// Detaches the hook. No events are captured afterwards.
    fn uninstall(&self);

    /// Applies a window mutation synchronously.
    ///
    /// Returns `StaleReference` if the target no longer exists.
    fn apply(&self, command: &Command) -> Result<()>;
}

/// Timing of the delivery loop.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    /// Idle time after which a heartbeat is sent.
    pub heartbeat: Duration,
    /// Read timeout of one loop iteration; bounds event latency.
    pub poll: Duration,
    pub io_timeout: Duration,
    /// Silence from the broker after which the connection is abandoned.
    pub peer_timeout: Duration,
}

impl DeliveryConfig {
    pub fn from_relay(relay: &RelayConfig) -> Self {
        let heartbeat = Duration::from_millis(relay.heartbeat_ms);
        Self {
            heartbeat,
            poll: (heartbeat / 10).max(Duration::from_millis(5)),
            io_timeout: Duration::from_millis(relay.io_timeout_ms),
            peer_timeout: Duration::from_millis(relay.session_timeout_ms),
        }
    }
}

/// One observer instance, bound to the process its host represents.
pub struct Observer<H> {
    host: Arc<H>,
    sink: CaptureSink,
    config: DeliveryConfig,
    stop: Arc<AtomicBool>,
}

impl<H: WindowHost> Observer<H> {
    pub fn new(host: Arc<H>, queue_capacity: usize, config: DeliveryConfig) -> Self {
        Self {
            host,
            sink: CaptureSink::new(queue_capacity),
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn sink(&self) -> &CaptureSink {
        &self.sink
    }

    /// Flag that makes the delivery loop flush, say goodbye and return.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn install(&self) -> Result<()> {
        self.host.install(self.sink.clone())
    }

    /// Pending captured items since the last drain. Never blocks.
    pub fn drain(&self) -> Vec<Captured> {
        self.sink.drain()
    }

    /// Applies a command through the host, mapping failures to an
    /// acknowledgement outcome. A vanished target is not fatal.
    pub fn apply_command(&self, command: &Command) -> CommandOutcome {
        match self.host.apply(command) {
            Ok(()) => CommandOutcome::Applied,
            Err(RelayError::StaleReference { window }) => {
                tracing::debug!(%window, command = command.kind.label(), "command target vanished");
                CommandOutcome::NotFound
            }
            Err(e) => CommandOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Connects to the broker at `addr` and runs the delivery loop.
    pub fn connect(&self, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| RelayError::transport(format!("connect to broker {addr}: {e}")))?;
        self.run_delivery(stream)
    }

    /// Runs the delivery loop on `stream` until stopped or the connection
    /// fails.
    ///
    /// Sends `Hello`, waits for the broker to assign a session, installs
    /// the hook and then shuttles events out and commands in. A refused
    /// hook is reported with a `Denied` frame before returning
    /// `CapabilityDenied`.
    pub fn run_delivery(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.config.poll))?;
        stream.set_write_timeout(Some(self.config.io_timeout))?;
        let mut writer = FrameWriter::new(stream.try_clone()?);
        let mut reader = FrameReader::new(stream);

        writer.send(&Frame::control(
            SessionId::UNASSIGNED,
            Message::Hello {
                pid: self.host.pid(),
                process: self.host.process_name(),
            },
        ))?;
        let session = self.await_session(&mut reader, &mut writer)?;
        tracing::info!(%session, pid = %self.host.pid(), "observer connected");

        if let Err(e) = self.install() {
            tracing::error!(error = %e, "hook installation refused");
            let _ = writer.send(&Frame::control(
                session,
                Message::Denied {
                    reason: e.to_string(),
                },
            ));
            return Err(e);
        }

        let result = self.deliver(session, &mut reader, &mut writer);
        self.host.uninstall();
        if result.is_ok() {
            let _ = writer.send(&Frame::control(session, Message::Goodbye));
        }
        tracing::info!(%session, ok = result.is_ok(), "observer disconnected");
        result
    }

    fn await_session(
        &self,
        reader: &mut FrameReader<TcpStream>,
        writer: &mut FrameWriter<TcpStream>,
    ) -> Result<SessionId> {
        let started = Instant::now();
        loop {
            match reader.read()? {
                ReadOutcome::Frame(frame) => match frame.message {
                    Message::Hello { .. } => return Ok(frame.session),
                    Message::Denied { reason } => {
                        return Err(RelayError::CapabilityDenied {
                            pid: self.host.pid(),
                            reason,
                        });
                    }
                    _ => {}
                },
                ReadOutcome::ResyncNeeded => {
                    writer.send(&Frame::control(SessionId::UNASSIGNED, Message::ResyncRequest))?
                }
                ReadOutcome::Idle => {}
            }
            if started.elapsed() > self.config.peer_timeout {
                return Err(RelayError::transport("broker did not answer hello"));
            }
        }
    }

    fn deliver(
        &self,
        session: SessionId,
        reader: &mut FrameReader<TcpStream>,
        writer: &mut FrameWriter<TcpStream>,
    ) -> Result<()> {
        let mut last_sent = Instant::now();
        let mut last_heard = Instant::now();

        loop {
            let stopping = self.stop.load(Ordering::Relaxed);
            for item in self.sink.drain() {
                let frame = match item {
                    Captured::Event(event) => Frame::event(session, event),
                    Captured::Gap(gap) => {
                        tracing::warn!(%session, first = gap.first, last = gap.last, "capture queue overflowed");
                        Frame::new(session, gap.first, Message::Gap(gap))
                    }
                };
                match writer.send(&frame) {
                    Err(RelayError::ProtocolDesync { reason }) => {
                        tracing::warn!(%session, seq = frame.seq, %reason, "unencodable event dropped");
                    }
                    sent => sent?,
                }
                last_sent = Instant::now();
            }
            if stopping {
                return Ok(());
            }

            match reader.read()? {
                ReadOutcome::Frame(frame) => {
                    last_heard = Instant::now();
                    match frame.message {
                        Message::Command(command) => {
                            let outcome = self.apply_command(&command);
                            tracing::debug!(%session, seq = frame.seq, command = command.kind.label(), ?outcome, "command applied");
                            writer.send(&Frame::new(
                                session,
                                frame.seq,
                                Message::CommandAck(CommandAck {
                                    seq: frame.seq,
                                    outcome,
                                }),
                            ))?;
                            last_sent = Instant::now();
                        }
                        Message::ResyncRequest => {
                            writer.send(&Frame::control(session, Message::Sync))?;
                            last_sent = Instant::now();
                        }
                        Message::Goodbye => return Ok(()),
                        Message::Denied { reason } => {
                            return Err(RelayError::CapabilityDenied {
                                pid: self.host.pid(),
                                reason,
                            });
                        }
                        _ => {}
                    }
                }
                ReadOutcome::ResyncNeeded => {
                    writer.send(&Frame::control(session, Message::ResyncRequest))?;
                    last_sent = Instant::now();
                }
                ReadOutcome::Idle => {}
            }

            if last_heard.elapsed() > self.config.peer_timeout {
                return Err(RelayError::transport("broker went silent"));
            }
            if last_sent.elapsed() >= self.config.heartbeat {
                writer.send(&Frame::control(session, Message::Heartbeat))?;
                last_sent = Instant::now();
            }
        }
    }
}
