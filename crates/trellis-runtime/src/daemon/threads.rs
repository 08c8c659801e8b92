use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use trellis_core::config::Config;
use trellis_core::ipc::FailureKind;
use trellis_core::{RelayError, Request, Response};

use crate::broker::{
    Broker, CommandInjector, InjectionPolicy, ProcessWatcher, SysinfoProbe, Upstream,
};
use crate::control::{self, ControlServer};
use crate::coordinator::Coordinator;

use super::types::DaemonMsg;

const BRIDGE_POLL: Duration = Duration::from_millis(100);

/// Runs the broker's accept loop. A listener failure is fatal.
pub(super) fn spawn_accept(
    broker: Arc<Broker>,
    tx: mpsc::Sender<DaemonMsg>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = broker.serve() {
            let _ = tx.send(DaemonMsg::Fatal(e));
        }
    })
}

/// Bridges upstream broker messages into the daemon message channel.
///
/// A disconnected upstream means the broker can no longer reach the
/// coordinator, which is reported as a transport failure.
pub(super) fn spawn_upstream_bridge(
    upstream: mpsc::Receiver<Upstream>,
    tx: mpsc::Sender<DaemonMsg>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match upstream.recv_timeout(BRIDGE_POLL) {
                Ok(message) => {
                    if tx.send(DaemonMsg::Upstream(message)).is_err() {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if !stop.load(Ordering::Relaxed) {
                        let _ = tx.send(DaemonMsg::Fatal(RelayError::transport(
                            "broker upstream disconnected",
                        )));
                    }
                    break;
                }
            }
        }
    })
}

/// Periodically tears down sessions whose process has exited.
pub(super) fn spawn_liveness(broker: Arc<Broker>, interval: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut probe = SysinfoProbe::new();
        broker.run_liveness(&mut probe, interval);
    })
}

/// Injects observers into new processes, if an injector is configured.
pub(super) fn spawn_injection(
    broker: Arc<Broker>,
    config: &Config,
) -> Option<thread::JoinHandle<()>> {
    let program = config.broker.injector.clone()?;
    let broker_addr = match broker.local_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            tracing::warn!("injection disabled, broker address unknown: {e}");
            return None;
        }
    };
    let injector = CommandInjector::new(program, broker_addr);
    let policy = InjectionPolicy::from_config(&config.broker);
    let interval = Duration::from_millis(config.broker.watch_ms);
    Some(thread::spawn(move || {
        let mut watcher = ProcessWatcher::new();
        broker.run_injection(&mut watcher, &injector, &policy, interval);
    }))
}

/// Spawns the control server thread.
///
/// `Stop` requests are forwarded to the main loop; everything else is
/// answered directly against the coordinator.
pub(super) fn spawn_control(
    server: ControlServer,
    coordinator: Arc<Coordinator>,
    broker: Arc<Broker>,
    tx: mpsc::Sender<DaemonMsg>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let handler = move |request: Request| -> Response {
            if matches!(request, Request::Stop) && tx.send(DaemonMsg::Stop).is_err() {
                return Response::failure(FailureKind::TransportError, "daemon loop is gone");
            }
            control::handle_request(&coordinator, broker.as_ref(), &request)
        };
        if let Err(e) = server.serve(handler) {
            tracing::error!("control server failed: {e}");
        }
    })
}
