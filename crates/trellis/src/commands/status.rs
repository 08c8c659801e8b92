use trellis_core::config::Config;
use trellis_core::ipc::Payload;
use trellis_core::{ProcessId, Request, pid};
use trellis_runtime::broker::{ProcessProbe, SysinfoProbe};
use trellis_runtime::control;

pub fn execute(config: &Config) {
    if !control::is_daemon_running(&config.control.listen) {
        report_not_running();
        return;
    }

    let response = super::send(config, &Request::Status);
    let Some(Payload::Status(status)) = response.payload else {
        super::fail(response);
    };

    println!("Trellis is running (PID: {}).", status.pid);
    println!(
        "  sessions {}  windows {}  lost events {}",
        status.sessions, status.windows, status.lost_events
    );
    for ws in &status.workspaces {
        let health = match &ws.halted {
            Some(reason) => format!("halted: {reason}"),
            None => "ok".into(),
        };
        println!(
            "  workspace {:<3} monitor {:<2} {:<8} {:>3} window(s)  {health}",
            ws.id.to_string(),
            ws.monitor.to_string(),
            ws.layout,
            ws.windows
        );
    }
}

/// The control socket is silent. Tell a dead daemon from a hung one
/// using the PID file it left behind.
fn report_not_running() {
    match pid::read_pid_file() {
        Ok(Some(pid)) if SysinfoProbe::new().is_alive(ProcessId(pid)) => {
            println!("Trellis process exists (PID: {pid}) but is not responding.");
        }
        Ok(Some(_)) => {
            let _ = pid::remove_pid_file();
            println!("Trellis is not running (cleaned up stale PID file).");
        }
        _ => println!("Trellis is not running."),
    }
}
