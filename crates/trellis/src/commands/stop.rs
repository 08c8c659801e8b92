use trellis_core::config::Config;
use trellis_core::{ProcessId, Request, pid};
use trellis_runtime::broker::{ProcessProbe, SysinfoProbe, kill_process};
use trellis_runtime::control;

pub fn execute(config: &Config) {
    // Try a graceful shutdown over the control socket first.
    if control::is_daemon_running(&config.control.listen) {
        let response = super::send(config, &Request::Stop);
        if response.is_ok() {
            println!("Trellis stopped. {}", response.message.unwrap_or_default());
            return;
        }
        super::fail(response);
    }

    // The socket is gone but the process may still be alive.
    match pid::read_pid_file() {
        Ok(Some(pid)) if SysinfoProbe::new().is_alive(ProcessId(pid)) => {
            if kill_process(ProcessId(pid)) {
                let _ = pid::remove_pid_file();
                println!("Trellis stopped (killed PID {pid}).");
            } else {
                eprintln!("Failed to kill process {pid}.");
                std::process::exit(1);
            }
        }
        _ => println!("Trellis is not running."),
    }
}
