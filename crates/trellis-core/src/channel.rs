//! Blocking frame I/O over any byte stream.
//!
//! Timeouts are a property of the underlying stream (socket read/write
//! timeouts); a timed-out read surfaces as [`ReadOutcome::Idle`] so the
//! caller decides when silence means the peer is dead.

use std::io::{self, Read, Write};

use bytes::BytesMut;

use crate::error::{RelayError, Result};
use crate::frame::{Frame, FrameDecoder, Malformed, Message};

/// Failed resynchronizations tolerated before the channel is abandoned.
pub const MAX_FAILED_RESYNCS: u32 = 2;

const READ_CHUNK: usize = 4096;

/// What a single [`FrameReader::read`] call produced.
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The read timed out with no complete frame available.
    Idle,
    /// A malformed frame was discarded; the caller must send a
    /// `ResyncRequest` to the peer.
    ResyncNeeded,
}

/// Reads frames from a byte stream, tracking resynchronization state.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
    /// Malformed frames seen since the last good frame or `Sync`.
    failures: u32,
    awaiting_sync: bool,
    dropped_while_desynced: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: vec![0; READ_CHUNK],
            failures: 0,
            awaiting_sync: false,
            dropped_while_desynced: 0,
        }
    }

    /// Whether the reader is discarding frames until the peer's `Sync`.
    pub fn is_awaiting_sync(&self) -> bool {
        self.awaiting_sync
    }

    /// Frames thrown away while waiting for a `Sync` marker.
    pub fn dropped_while_desynced(&self) -> u64 {
        self.dropped_while_desynced
    }

    /// Reads until a frame is available, the stream goes idle, or framing
    /// is lost.
    ///
    /// Returns `Transport` when the stream closes or resynchronization
    /// has failed [`MAX_FAILED_RESYNCS`] times in a row.
    pub fn read(&mut self) -> Result<ReadOutcome> {
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    if self.awaiting_sync {
                        if frame.message == Message::Sync {
                            self.awaiting_sync = false;
                            self.failures = 0;
                            return Ok(ReadOutcome::Frame(frame));
                        }
                        self.dropped_while_desynced += 1;
                        continue;
                    }
                    self.failures = 0;
                    return Ok(ReadOutcome::Frame(frame));
                }
                Ok(None) => {}
                // Still scanning for a marker after an earlier failure:
                // the same corrupt region must not count twice.
                Err(Malformed::Garbage(n)) if self.awaiting_sync => {
                    tracing::trace!(skipped = n, "discarding bytes while desynchronized");
                    continue;
                }
                Err(malformed) => return self.on_malformed(malformed),
            }

            match self.inner.read(&mut self.chunk) {
                Ok(0) => return Err(RelayError::transport("stream closed by peer")),
                Ok(n) => self.decoder.push(&self.chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(ReadOutcome::Idle),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn on_malformed(&mut self, malformed: Malformed) -> Result<ReadOutcome> {
        self.failures += 1;
        if self.failures > MAX_FAILED_RESYNCS {
            return Err(RelayError::transport(format!(
                "resynchronization failed {MAX_FAILED_RESYNCS} times, last error: {malformed}"
            )));
        }
        tracing::warn!(error = %malformed, attempt = self.failures, "malformed frame discarded");
        self.awaiting_sync = true;
        Ok(ReadOutcome::ResyncNeeded)
    }
}

/// Writes frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Encodes and writes one frame, flushing the stream.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        frame.encode(&mut self.buf)?;
        self.inner.write_all(&self.buf).map_err(write_error)?;
        self.inner.flush().map_err(write_error)?;
        Ok(())
    }
}

fn write_error(e: io::Error) -> RelayError {
    if is_timeout(&e) {
        RelayError::transport("write timed out")
    } else {
        RelayError::transport(format!("write failed: {e}"))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
