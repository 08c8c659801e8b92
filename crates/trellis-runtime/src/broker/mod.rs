//! The daemon side of the relay.
//!
//! The broker accepts observer connections, owns the session table,
//! merges every session's events into one upstream stream for the
//! coordinator, and routes commands back to the session owning the
//! target window. When a session ends for any reason it synthesizes a
//! `Destroyed` event for every window the session still owned.

mod process;
mod session;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use trellis_core::channel::{FrameReader, ReadOutcome};
use trellis_core::config::RelayConfig;
use trellis_core::frame::Message;
use trellis_core::{
    Command, Frame, HookEvent, HookEventKind, ProcessId, RelayError, Result, SeqGap, SessionId,
};

pub use process::{
    CommandInjector, Injector, InjectionPolicy, ObservedProcess, ProcessFeed, ProcessProbe,
    ProcessWatcher, SysinfoProbe, kill_process,
};
pub use session::Session;

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// What the broker hands to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    SessionOpened {
        session: SessionId,
        pid: ProcessId,
        process: String,
    },
    Event {
        session: SessionId,
        event: HookEvent,
    },
    /// The observer dropped these events before sending them.
    Gap { session: SessionId, gap: SeqGap },
    /// Sent after the synthesized `Destroyed` events of a teardown.
    SessionClosed {
        session: SessionId,
        pid: ProcessId,
        reason: String,
    },
}

/// Where the coordinator's commands go.
pub trait CommandSink: Send + Sync {
    /// Delivers one command. Best-effort while the target's session is
    /// being torn down.
    fn dispatch(&self, command: &Command) -> Result<()>;
}

#[derive(Default)]
struct SessionTable {
    by_id: HashMap<SessionId, Arc<Session>>,
    by_pid: HashMap<ProcessId, SessionId>,
}

pub struct Broker {
    listener: TcpListener,
    config: RelayConfig,
    upstream: Mutex<mpsc::Sender<Upstream>>,
    sessions: Mutex<SessionTable>,
    next_session: AtomicU32,
    stop: AtomicBool,
}

impl Broker {
    /// Binds the observer listener.
    pub fn bind(
        addr: &str,
        config: RelayConfig,
        upstream: mpsc::Sender<Upstream>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "broker listening");
        Ok(Arc::new(Self {
            listener,
            config,
            upstream: Mutex::new(upstream),
            sessions: Mutex::new(SessionTable::default()),
            next_session: AtomicU32::new(1),
            stop: AtomicBool::new(false),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.config.heartbeat_ms)
    }

    fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.config.session_timeout_ms)
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().by_id.len()
    }

    pub fn session_for(&self, pid: ProcessId) -> Option<Arc<Session>> {
        let table = self.lock_sessions();
        table
            .by_pid
            .get(&pid)
            .and_then(|id| table.by_id.get(id))
            .cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut all: Vec<_> = self.lock_sessions().by_id.values().cloned().collect();
        all.sort_by_key(|s| s.id());
        all
    }

    /// Accepts observer connections until [`Broker::shutdown`].
    ///
    /// Each connection gets its own thread for the handshake and reads,
    /// plus a writer thread. Returns an error if the listener fails.
    pub fn serve(self: &Arc<Self>) -> Result<()> {
        while !self.is_stopping() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let broker = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = broker.handle_connection(stream) {
                            tracing::warn!(%peer, code = e.error_code(), "observer handshake failed: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(RelayError::transport(format!("broker listener failed: {e}")));
                }
            }
        }
        Ok(())
    }

    fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some((self.heartbeat() / 10).max(Duration::from_millis(5))))?;
        stream.set_write_timeout(Some(Duration::from_millis(self.config.io_timeout_ms)))?;

        let mut reader = FrameReader::new(stream.try_clone()?);
        let (pid, process) = self.await_hello(&mut reader)?;

        if let Some(previous) = self.session_for(pid) {
            self.teardown(&previous, "observer reconnected");
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel();
        let session = Arc::new(Session::new(
            id,
            pid,
            process.clone(),
            stream.try_clone()?,
            tx,
        ));
        session.send_control(Message::Hello {
            pid,
            process: process.clone(),
        })?;

        {
            let mut table = self.lock_sessions();
            table.by_id.insert(id, session.clone());
            table.by_pid.insert(pid, id);
        }
        tracing::info!(session = %id, %pid, %process, "session opened");
        self.forward(Upstream::SessionOpened {
            session: id,
            pid,
            process,
        });

        let writer_broker = self.clone();
        let writer_session = session.clone();
        let heartbeat = self.heartbeat();
        thread::spawn(move || {
            session::run_writer(writer_broker, writer_session, rx, stream, heartbeat)
        });

        let timeout = self.session_timeout();
        session::run_reader(self, session, reader, timeout);
        Ok(())
    }

    fn await_hello(&self, reader: &mut FrameReader<TcpStream>) -> Result<(ProcessId, String)> {
        let deadline = Instant::now() + self.session_timeout();
        while Instant::now() < deadline {
            match reader.read()? {
                ReadOutcome::Frame(Frame {
                    message: Message::Hello { pid, process },
                    ..
                }) => return Ok((pid, process)),
                ReadOutcome::Frame(frame) => {
                    return Err(RelayError::desync(format!(
                        "expected hello, got {:?}",
                        frame.kind()
                    )));
                }
                ReadOutcome::Idle | ReadOutcome::ResyncNeeded => {}
            }
        }
        Err(RelayError::transport("no hello before session timeout"))
    }

    fn forward(&self, message: Upstream) {
        let sent = self
            .upstream
            .lock()
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false);
        if !sent && !self.stop.swap(true, Ordering::SeqCst) {
            tracing::error!("coordinator link closed, broker stopping");
        }
    }

    pub(crate) fn on_event(&self, session: &Session, event: HookEvent) {
        if event.window.pid != session.pid() {
            tracing::warn!(session = %session.id(), window = %event.window, "event for a window of another process dropped");
            return;
        }
        let mut state = session.lock_state();
        if session.is_closed() {
            return;
        }
        match event.kind {
            HookEventKind::Created { .. } => {
                state.windows.insert(event.window);
            }
            HookEventKind::Destroyed => {
                state.windows.remove(&event.window);
            }
            _ => {}
        }
        state.last_seq = state.last_seq.max(event.seq);
        self.forward(Upstream::Event {
            session: session.id(),
            event,
        });
    }

    pub(crate) fn on_gap(&self, session: &Session, gap: SeqGap) {
        let mut state = session.lock_state();
        if session.is_closed() {
            return;
        }
        state.last_seq = state.last_seq.max(gap.last);
        tracing::warn!(session = %session.id(), first = gap.first, last = gap.last, "observer dropped events");
        self.forward(Upstream::Gap {
            session: session.id(),
            gap,
        });
    }

    /// Removes a session and reports its windows destroyed.
    ///
    /// Idempotent: only the first call for a session has any effect.
    /// One `Destroyed` event per still-owned window is forwarded, with
    /// sequence numbers continuing the session's own, followed by
    /// [`Upstream::SessionClosed`].
    pub fn teardown(&self, session: &Session, reason: &str) {
        if !session.close() {
            return;
        }
        {
            let mut table = self.lock_sessions();
            table.by_id.remove(&session.id());
            if table.by_pid.get(&session.pid()) == Some(&session.id()) {
                table.by_pid.remove(&session.pid());
            }
        }

        let mut state = session.lock_state();
        let orphans = std::mem::take(&mut state.windows);
        for window in &orphans {
            state.last_seq += 1;
            self.forward(Upstream::Event {
                session: session.id(),
                event: HookEvent::new(*window, state.last_seq, HookEventKind::Destroyed),
            });
        }
        drop(state);

        tracing::info!(session = %session.id(), pid = %session.pid(), reason, orphans = orphans.len(), "session closed");
        self.forward(Upstream::SessionClosed {
            session: session.id(),
            pid: session.pid(),
            reason: reason.to_string(),
        });
    }

    /// Tears down every session whose process is gone.
    pub fn check_liveness(&self, probe: &mut dyn ProcessProbe) -> usize {
        let dead: Vec<_> = self
            .sessions()
            .into_iter()
            .filter(|s| !probe.is_alive(s.pid()))
            .collect();
        for session in &dead {
            self.teardown(session, "process exited");
        }
        dead.len()
    }

    /// Probes session processes every `interval` until shutdown.
    pub fn run_liveness(&self, probe: &mut dyn ProcessProbe, interval: Duration) {
        while !self.is_stopping() {
            thread::sleep(interval);
            self.check_liveness(probe);
        }
    }

    /// Injects observers into newly observed processes the policy allows.
    ///
    /// Skips the daemon itself and processes that already have a
    /// session. Returns the number of successful injections.
    pub fn inject_new(
        &self,
        feed: &mut dyn ProcessFeed,
        injector: &dyn Injector,
        policy: &InjectionPolicy,
    ) -> usize {
        let me = ProcessId(std::process::id());
        let mut injected = 0;
        for process in feed.poll() {
            if process.pid == me
                || !policy.allows(&process.name)
                || self.session_for(process.pid).is_some()
            {
                continue;
            }
            match injector.inject(&process) {
                Ok(()) => {
                    injected += 1;
                    tracing::info!(pid = %process.pid, name = %process.name, "observer injected");
                }
                Err(e) => {
                    tracing::warn!(pid = %process.pid, name = %process.name, code = e.error_code(), "injection failed: {e}");
                }
            }
        }
        injected
    }

    pub fn run_injection(
        &self,
        feed: &mut dyn ProcessFeed,
        injector: &dyn Injector,
        policy: &InjectionPolicy,
        interval: Duration,
    ) {
        while !self.is_stopping() {
            self.inject_new(feed, injector, policy);
            thread::sleep(interval);
        }
    }

    /// Stops accepting and tears down every session.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        for session in self.sessions() {
            let _ = session.send_control(Message::Goodbye);
            self.teardown(&session, "broker shutting down");
        }
    }
}

impl CommandSink for Broker {
    fn dispatch(&self, command: &Command) -> Result<()> {
        if !command.kind.is_delivered() {
            return Ok(());
        }
        let session = self
            .session_for(command.target.pid)
            .ok_or(RelayError::StaleReference {
                window: command.target,
            })?;
        let seq = session.send_command(command)?;
        tracing::debug!(session = %session.id(), seq, window = %command.target, command = command.kind.label(), "command routed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use trellis_core::channel::FrameWriter;
    use trellis_core::{CommandKind, Rect, WindowId};

    use super::*;

    struct FakeProbe(Vec<ProcessId>);

    impl ProcessProbe for FakeProbe {
        fn is_alive(&mut self, pid: ProcessId) -> bool {
            self.0.contains(&pid)
        }
    }

    struct FakeFeed(VecDeque<Vec<ObservedProcess>>);

    impl ProcessFeed for FakeFeed {
        fn poll(&mut self) -> Vec<ObservedProcess> {
            self.0.pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct RecordingInjector(Mutex<Vec<ProcessId>>);

    impl Injector for RecordingInjector {
        fn inject(&self, process: &ObservedProcess) -> Result<()> {
            self.0.lock().unwrap().push(process.pid);
            Ok(())
        }
    }

    fn fast_relay() -> RelayConfig {
        RelayConfig {
            heartbeat_ms: 50,
            session_timeout_ms: 500,
            ..RelayConfig::default()
        }
    }

    fn start() -> (Arc<Broker>, mpsc::Receiver<Upstream>) {
        let (tx, rx) = mpsc::channel();
        let broker = Broker::bind("127.0.0.1:0", fast_relay(), tx).unwrap();
        let serving = broker.clone();
        thread::spawn(move || serving.serve());
        (broker, rx)
    }

    /// A hand-driven observer speaking raw frames.
    struct RawPeer {
        writer: FrameWriter<TcpStream>,
        reader: FrameReader<TcpStream>,
        session: SessionId,
    }

    impl RawPeer {
        fn connect(broker: &Broker, pid: u32) -> Self {
            let stream = TcpStream::connect(broker.local_addr().unwrap()).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(50)))
                .unwrap();
            let mut writer = FrameWriter::new(stream.try_clone().unwrap());
            let mut reader = FrameReader::new(stream);
            writer
                .send(&Frame::control(
                    SessionId::UNASSIGNED,
                    Message::Hello {
                        pid: ProcessId(pid),
                        process: "raw".into(),
                    },
                ))
                .unwrap();
            let session = loop {
                if let ReadOutcome::Frame(frame) = reader.read().unwrap()
                    && matches!(frame.message, Message::Hello { .. })
                {
                    break frame.session;
                }
            };
            Self {
                writer,
                reader,
                session,
            }
        }

        fn created(&mut self, window: WindowId, seq: u64) {
            let event = HookEvent::new(
                window,
                seq,
                HookEventKind::Created {
                    rect: Rect::new(0, 0, 100, 100),
                    title: "w".into(),
                },
            );
            self.writer.send(&Frame::event(self.session, event)).unwrap();
        }

        fn next_command(&mut self) -> Command {
            loop {
                if let ReadOutcome::Frame(frame) = self.reader.read().unwrap()
                    && let Message::Command(command) = frame.message
                {
                    return command;
                }
            }
        }
    }

    fn recv(rx: &mpsc::Receiver<Upstream>) -> Upstream {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn hello_opens_session_and_events_flow_upstream() {
        // Arrange
        let (broker, rx) = start();

        // Act
        let mut peer = RawPeer::connect(&broker, 900);
        peer.created(WindowId::new(900, 1), 1);

        // Assert
        assert!(matches!(recv(&rx), Upstream::SessionOpened { pid: ProcessId(900), .. }));
        assert!(matches!(recv(&rx), Upstream::Event { event, .. } if event.seq == 1));
        assert_eq!(broker.session_count(), 1);
        broker.shutdown();
    }

    #[test]
    fn teardown_synthesizes_one_destroyed_per_window() {
        // Arrange
        let (broker, rx) = start();
        let mut peer = RawPeer::connect(&broker, 901);
        for handle in 1..=3 {
            peer.created(WindowId::new(901, handle), handle);
        }
        for _ in 0..4 {
            recv(&rx);
        }

        // Act
        drop(peer);

        // Assert
        let mut destroyed = Vec::new();
        loop {
            match recv(&rx) {
                Upstream::Event { event, .. } => {
                    assert_eq!(event.kind, HookEventKind::Destroyed);
                    destroyed.push(event.seq);
                }
                Upstream::SessionClosed { .. } => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(destroyed, vec![4, 5, 6]);
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn teardown_is_idempotent() {
        // Arrange
        let (broker, rx) = start();
        let mut peer = RawPeer::connect(&broker, 902);
        peer.created(WindowId::new(902, 1), 1);
        recv(&rx);
        recv(&rx);
        let session = broker.session_for(ProcessId(902)).unwrap();

        // Act
        broker.teardown(&session, "first");
        broker.teardown(&session, "second");

        // Assert
        assert!(matches!(recv(&rx), Upstream::Event { .. }));
        assert!(matches!(recv(&rx), Upstream::SessionClosed { reason, .. } if reason == "first"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn commands_route_to_owning_session() {
        // Arrange
        let (broker, _rx) = start();
        let _a = RawPeer::connect(&broker, 903);
        let mut b = RawPeer::connect(&broker, 904);
        let target = WindowId::new(904, 7);

        // Act
        broker
            .dispatch(&Command::new(target, CommandKind::Focus))
            .unwrap();

        // Assert
        assert_eq!(b.next_command().target, target);
        assert_eq!(broker.session_for(ProcessId(903)).unwrap().pid(), ProcessId(903));
        broker.shutdown();
    }

    #[test]
    fn command_for_unknown_process_is_stale() {
        let (broker, _rx) = start();

        let result = broker.dispatch(&Command::new(WindowId::new(999, 1), CommandKind::Close));

        assert!(matches!(result, Err(RelayError::StaleReference { .. })));
    }

    #[test]
    fn dead_process_is_torn_down_by_liveness_check() {
        // Arrange
        let (broker, rx) = start();
        let _peer = RawPeer::connect(&broker, 905);
        recv(&rx);
        let mut probe = FakeProbe(Vec::new());

        // Act
        let dead = broker.check_liveness(&mut probe);

        // Assert
        assert_eq!(dead, 1);
        assert!(matches!(recv(&rx), Upstream::SessionClosed { reason, .. } if reason == "process exited"));
    }

    #[test]
    fn injection_skips_excluded_and_connected_processes() {
        // Arrange
        let (broker, rx) = start();
        let _peer = RawPeer::connect(&broker, 906);
        recv(&rx);
        let mut feed = FakeFeed(VecDeque::from(vec![vec![
            ObservedProcess {
                pid: ProcessId(906),
                name: "editor".into(),
            },
            ObservedProcess {
                pid: ProcessId(907),
                name: "editor".into(),
            },
            ObservedProcess {
                pid: ProcessId(908),
                name: "shell".into(),
            },
        ]]));
        let injector = RecordingInjector::default();
        let policy = InjectionPolicy {
            include: Vec::new(),
            exclude: vec!["shell".into()],
        };

        // Act
        let injected = broker.inject_new(&mut feed, &injector, &policy);

        // Assert
        assert_eq!(injected, 1);
        assert_eq!(*injector.0.lock().unwrap(), vec![ProcessId(907)]);
        broker.shutdown();
    }
}
