use std::fs;
use std::io;
use std::path::PathBuf;

/// Environment variable that relocates the data directory (used by tests
/// running several daemons side by side).
pub const DATA_DIR_VAR: &str = "TRELLIS_DATA_DIR";

/// Returns the path to the Trellis data directory.
///
/// Defaults to the platform's local data directory plus `trellis`.
/// Creates the directory if it doesn't exist.
fn data_dir() -> io::Result<PathBuf> {
    let dir = match std::env::var_os(DATA_DIR_VAR) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no local data directory"))?
            .join("trellis"),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Returns the path to the PID file.
pub fn pid_path() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("trellis.pid"))
}

/// Writes the current process's PID to the PID file.
///
/// The PID file lets the CLI tell a stopped daemon from an unresponsive
/// one when the control socket does not answer.
pub fn write_pid_file() -> io::Result<()> {
    fs::write(pid_path()?, std::process::id().to_string())
}

/// Reads the PID from the PID file, if it exists.
pub fn read_pid_file() -> io::Result<Option<u32>> {
    let path = pid_path()?;

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let pid = contents.trim().parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid PID file contents: {e}"),
        )
    })?;

    Ok(Some(pid))
}

/// Removes the PID file.
///
/// Called when the daemon shuts down cleanly.
pub fn remove_pid_file() -> io::Result<()> {
    match fs::remove_file(pid_path()?) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
