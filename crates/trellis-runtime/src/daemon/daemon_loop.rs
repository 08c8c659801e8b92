use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use trellis_core::Result;

use crate::broker::Broker;
use crate::coordinator::Coordinator;

use super::handlers;
use super::types::DaemonMsg;

/// Everything the main loop owns and must shut down.
pub(super) struct Running {
    pub coordinator: Arc<Coordinator>,
    pub broker: Arc<Broker>,
    pub control_stop: Arc<AtomicBool>,
    pub bridge_stop: Arc<AtomicBool>,
    pub threads: Vec<thread::JoinHandle<()>>,
}

/// The main processing loop. Applies upstream traffic to the coordinator
/// in arrival order until told to stop or a fatal error arrives.
pub(super) fn daemon_loop(rx: mpsc::Receiver<DaemonMsg>, running: Running) -> Result<()> {
    let outcome = loop {
        match rx.recv() {
            Ok(DaemonMsg::Upstream(message)) => {
                handlers::handle_upstream(&running.coordinator, running.broker.as_ref(), message);
            }
            Ok(DaemonMsg::Stop) => {
                tracing::info!("stop requested");
                break Ok(());
            }
            Ok(DaemonMsg::Fatal(e)) => break Err(e),
            Err(_) => break Ok(()),
        }
    };

    shutdown(running);
    outcome
}

fn shutdown(running: Running) {
    let Running {
        coordinator,
        broker,
        control_stop,
        bridge_stop,
        threads,
    } = running;

    broker.shutdown();
    control_stop.store(true, Ordering::Relaxed);
    bridge_stop.store(true, Ordering::Relaxed);

    for handle in threads {
        let _ = handle.join();
    }

    tracing::info!(
        windows = coordinator.window_count(),
        lost_events = coordinator.lost_events(),
        "daemon loop finished"
    );
}
