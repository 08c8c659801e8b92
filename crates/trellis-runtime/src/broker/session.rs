use std::collections::BTreeSet;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::{Duration, Instant};

use trellis_core::channel::{FrameReader, FrameWriter, ReadOutcome};
use trellis_core::command::{CommandAck, CommandOutcome};
use trellis_core::frame::Message;
use trellis_core::{Command, Frame, ProcessId, RelayError, Result, SessionId, WindowId};

use super::Broker;

/// One observer connection as seen by the broker.
pub struct Session {
    id: SessionId,
    pid: ProcessId,
    process: String,
    /// Dropped on teardown. The writer flushes what is queued, then
    /// shuts the stream down.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    stream: TcpStream,
    state: Mutex<SessionState>,
    closed: AtomicBool,
}

#[derive(Default)]
pub(super) struct SessionState {
    /// Highest event sequence number received (or synthesized).
    pub(super) last_seq: u64,
    /// Windows created and not yet destroyed on this session.
    pub(super) windows: BTreeSet<WindowId>,
    next_command_seq: u64,
}

impl Session {
    pub(super) fn new(
        id: SessionId,
        pid: ProcessId,
        process: String,
        stream: TcpStream,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            pid,
            process,
            outbound: Mutex::new(Some(outbound)),
            stream,
            state: Mutex::new(SessionState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Windows this session currently owns, in id order.
    pub fn owned_windows(&self) -> Vec<WindowId> {
        self.lock_state().windows.iter().copied().collect()
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the session closed. Returns `false` if it already was.
    pub(super) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        true
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        let outbound = self
            .outbound
            .lock()
            .map_err(|_| RelayError::transport("session lock poisoned"))?;
        let tx = outbound
            .as_ref()
            .ok_or_else(|| RelayError::transport(format!("session {} is closing", self.id)))?;
        tx.send(frame)
            .map_err(|_| RelayError::transport(format!("session {} writer stopped", self.id)))
    }

    pub(super) fn send_control(&self, message: Message) -> Result<()> {
        self.enqueue(Frame::control(self.id, message))
    }

    /// Queues a command for the observer. Returns its frame sequence.
    pub(super) fn send_command(&self, command: &Command) -> Result<u64> {
        let seq = {
            let mut state = self.lock_state();
            state.next_command_seq += 1;
            state.next_command_seq
        };
        self.enqueue(Frame::new(self.id, seq, Message::Command(command.clone())))?;
        Ok(seq)
    }
}

/// Writes queued frames, or a heartbeat after `heartbeat` of silence.
pub(super) fn run_writer(
    broker: Arc<Broker>,
    session: Arc<Session>,
    rx: mpsc::Receiver<Frame>,
    stream: TcpStream,
    heartbeat: Duration,
) {
    let mut writer = FrameWriter::new(stream);
    loop {
        let frame = match rx.recv_timeout(heartbeat) {
            Ok(frame) => frame,
            Err(mpsc::RecvTimeoutError::Timeout) => Frame::control(session.id, Message::Heartbeat),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        if let Err(e) = writer.send(&frame) {
            broker.teardown(&session, &e.to_string());
            break;
        }
    }
    let _ = session.stream.shutdown(Shutdown::Both);
}

/// Reads frames from the observer until the session ends.
pub(super) fn run_reader(
    broker: Arc<Broker>,
    session: Arc<Session>,
    mut reader: FrameReader<TcpStream>,
    timeout: Duration,
) {
    let mut last_heard = Instant::now();
    while !session.is_closed() {
        let frame = match reader.read() {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::Idle) => {
                if last_heard.elapsed() > timeout {
                    broker.teardown(&session, "session timed out");
                    return;
                }
                continue;
            }
            Ok(ReadOutcome::ResyncNeeded) => {
                let _ = session.send_control(Message::ResyncRequest);
                continue;
            }
            Err(e) => {
                broker.teardown(&session, &e.to_string());
                return;
            }
        };
        last_heard = Instant::now();
        let kind = frame.kind();

        match frame.message {
            Message::Event(event) => broker.on_event(&session, event),
            Message::Gap(gap) => broker.on_gap(&session, gap),
            Message::CommandAck(ack) => log_ack(&session, &ack),
            Message::ResyncRequest => {
                let _ = session.send_control(Message::Sync);
            }
            Message::Denied { reason } => {
                let err = RelayError::CapabilityDenied {
                    pid: session.pid,
                    reason,
                };
                tracing::error!(session = %session.id, code = err.error_code(), "{err}");
                broker.teardown(&session, &err.to_string());
                return;
            }
            Message::Goodbye => {
                broker.teardown(&session, "observer disconnected");
                return;
            }
            Message::Heartbeat | Message::Sync => {}
            Message::Hello { .. } | Message::Command(_) => {
                tracing::warn!(session = %session.id, ?kind, "unexpected frame from observer");
            }
        }
    }
}

fn log_ack(session: &Session, ack: &CommandAck) {
    match &ack.outcome {
        CommandOutcome::Applied => {
            tracing::trace!(session = %session.id, seq = ack.seq, "command applied");
        }
        CommandOutcome::NotFound => {
            tracing::debug!(session = %session.id, seq = ack.seq, "command target already gone");
        }
        CommandOutcome::Failed { reason } => {
            tracing::warn!(session = %session.id, seq = ack.seq, %reason, "command failed in observer");
        }
    }
}
