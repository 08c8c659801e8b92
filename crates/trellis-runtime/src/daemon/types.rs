use trellis_core::RelayError;

use crate::broker::Upstream;

/// Internal message type for the main daemon thread.
pub(super) enum DaemonMsg {
    /// Something the broker forwarded from an observer session.
    Upstream(Upstream),
    /// A control client asked the daemon to stop.
    Stop,
    /// The broker side failed; the supervisor decides whether to restart.
    Fatal(RelayError),
}
