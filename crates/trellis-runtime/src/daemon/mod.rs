use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use trellis_core::config::Config;
use trellis_core::{RelayError, Result, pid};

use crate::broker::Broker;
use crate::control::ControlServer;
use crate::coordinator::Coordinator;

mod daemon_loop;
mod handlers;
mod threads;
mod types;

use daemon_loop::Running;
use types::DaemonMsg;

const RESTART_BACKOFF: Duration = Duration::from_millis(250);

/// Runs the Trellis daemon until a control client asks it to stop.
///
/// The PID file is written before the first start and removed on the
/// way out, whatever the outcome.
pub fn run(config: &Config) -> Result<()> {
    pid::write_pid_file()?;
    tracing::info!(pid = std::process::id(), "daemon started");

    let result = supervise(config);

    let _ = pid::remove_pid_file();
    match &result {
        Ok(()) => tracing::info!("daemon stopped"),
        Err(e) => tracing::error!(code = e.error_code(), "daemon failed: {e}"),
    }
    result
}

/// Starts the daemon and restarts it with empty state after a transport
/// failure on the broker side, up to `daemon.max_restarts` times.
pub fn supervise(config: &Config) -> Result<()> {
    let mut restarts = 0;
    loop {
        match Daemon::start(config).and_then(Daemon::wait) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transport() && restarts < config.daemon.max_restarts => {
                restarts += 1;
                tracing::error!(
                    code = e.error_code(),
                    restarts,
                    max = config.daemon.max_restarts,
                    "restarting after fatal error: {e}"
                );
                thread::sleep(RESTART_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

/// A running daemon instance: broker, coordinator and control server
/// wired together, with the main loop on its own thread.
pub struct Daemon {
    broker_addr: SocketAddr,
    control_addr: SocketAddr,
    tx: mpsc::Sender<DaemonMsg>,
    main: thread::JoinHandle<Result<()>>,
}

impl Daemon {
    pub fn start(config: &Config) -> Result<Self> {
        let topology = config.topology()?;
        let coordinator = Arc::new(Coordinator::new(topology, config.rules.clone()));

        let (upstream_tx, upstream_rx) = mpsc::channel();
        let broker = Broker::bind(&config.broker.listen, config.relay.clone(), upstream_tx)?;
        let server = ControlServer::bind(
            &config.control.listen,
            Duration::from_millis(config.control.timeout_ms),
        )?;
        let broker_addr = broker.local_addr()?;
        let control_addr = server.local_addr()?;
        let control_stop = server.stop_handle();

        tracing::info!(
            %broker_addr,
            %control_addr,
            workspaces = coordinator.workspace_ids().len(),
            layout = ?config.layout,
            "daemon wiring up"
        );

        let (tx, rx) = mpsc::channel();
        let bridge_stop = Arc::new(AtomicBool::new(false));

        let mut handles = vec![
            threads::spawn_accept(broker.clone(), tx.clone()),
            threads::spawn_upstream_bridge(upstream_rx, tx.clone(), bridge_stop.clone()),
            threads::spawn_liveness(
                broker.clone(),
                Duration::from_millis(config.broker.liveness_ms),
            ),
            threads::spawn_control(server, coordinator.clone(), broker.clone(), tx.clone()),
        ];
        handles.extend(threads::spawn_injection(broker.clone(), config));

        let running = Running {
            coordinator,
            broker,
            control_stop,
            bridge_stop,
            threads: handles,
        };
        let main = thread::spawn(move || daemon_loop::daemon_loop(rx, running));

        Ok(Self {
            broker_addr,
            control_addr,
            tx,
            main,
        })
    }

    /// Address observers connect to.
    pub fn broker_addr(&self) -> SocketAddr {
        self.broker_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Asks the main loop to shut down. Returns immediately.
    pub fn stop(&self) {
        let _ = self.tx.send(DaemonMsg::Stop);
    }

    /// Blocks until the main loop exits.
    pub fn wait(self) -> Result<()> {
        drop(self.tx);
        self.main
            .join()
            .map_err(|_| RelayError::invalid_state("daemon loop panicked"))?
    }
}
