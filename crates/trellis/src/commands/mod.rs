pub mod command;
pub mod daemon;
pub mod query;
pub mod simulate;
pub mod start;
pub mod status;
pub mod stop;

use std::path::Path;
use std::time::Duration;

use trellis_core::config::{self, Config};
use trellis_core::{Request, Response};
use trellis_runtime::control;

/// Loads the configuration from `path`, or from the default location.
///
/// An explicit path that cannot be loaded is an error; the default
/// location silently falls back to built-in defaults.
pub fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(path) => config::load_from(path).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }),
        None => config::load(),
    }
}

/// Sends `request` to the running daemon, exiting when it is unreachable.
pub fn send(config: &Config, request: &Request) -> Response {
    let addr = &config.control.listen;
    if !control::is_daemon_running(addr) {
        eprintln!("Trellis is not running.");
        std::process::exit(1);
    }
    let timeout = Duration::from_millis(config.control.timeout_ms);
    match control::send_request(addr, request, timeout) {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Failed to reach daemon: {e}");
            std::process::exit(1);
        }
    }
}

/// Prints a failed response and exits with status 1.
pub fn fail(response: Response) -> ! {
    let kind = response
        .failure
        .map(|k| format!("{k:?}"))
        .unwrap_or_else(|| "Error".into());
    eprintln!(
        "{kind}: {}",
        response.message.unwrap_or("unknown error".into())
    );
    std::process::exit(1);
}
