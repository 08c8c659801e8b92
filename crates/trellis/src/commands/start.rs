use std::path::Path;
use std::process::{Command, Stdio};

use trellis_core::config::Config;
use trellis_core::{ProcessId, pid};
use trellis_runtime::broker::{ProcessProbe, SysinfoProbe};
use trellis_runtime::control;

/// Spawns `trellis daemon` as a detached background process.
pub fn execute(config_path: Option<&Path>, config: &Config) {
    if control::is_daemon_running(&config.control.listen) {
        println!("Trellis is already running.");
        return;
    }

    // Clean up a stale PID file from a previous unclean shutdown.
    if let Ok(Some(pid)) = pid::read_pid_file() {
        if SysinfoProbe::new().is_alive(ProcessId(pid)) {
            println!("Trellis process exists (PID: {pid}) but is not responding.");
            return;
        }
        let _ = pid::remove_pid_file();
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("Failed to locate the trellis executable: {e}");
            std::process::exit(1);
        }
    };

    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    let child = command
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(child) => {
            println!("Trellis daemon started (PID: {}).", child.id());
            println!("  control  {}", config.control.listen);
            println!("  broker   {}", config.broker.listen);
        }
        Err(e) => {
            eprintln!("Failed to start daemon: {e}");
            std::process::exit(1);
        }
    }
}
