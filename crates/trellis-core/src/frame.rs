//! Wire framing for relay channels.
//!
//! Every frame is a fixed header followed by a JSON payload:
//!
//! ```text
//! +-------+------+------------+---------+---------+-----------+
//! | "TR"  | kind | session    | seq     | len     | payload   |
//! | 2 B   | u8   | u32 BE     | u64 BE  | u32 BE  | len bytes |
//! +-------+------+------------+---------+---------+-----------+
//! ```
//!
//! Local transports deliver arbitrary chunking, so [`FrameDecoder`]
//! buffers partial input and only yields whole frames. A malformed frame
//! is discarded and the decoder scans forward to the next magic marker.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandAck};
use crate::error::{RelayError, Result};
use crate::event::{HookEvent, SeqGap};
use crate::window::ProcessId;

pub const MAGIC: [u8; 2] = *b"TR";
pub const HEADER_LEN: usize = 2 + 1 + 4 + 8 + 4;
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Broker-assigned identity of one observer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Placeholder used by observers before the broker has answered.
    pub const UNASSIGNED: SessionId = SessionId(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One-byte type tag in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Hello = 1,
    Event = 2,
    Gap = 3,
    Command = 4,
    CommandAck = 5,
    Heartbeat = 6,
    ResyncRequest = 7,
    Sync = 8,
    Denied = 9,
    Goodbye = 10,
}

impl FrameKind {
    fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Hello,
            2 => Self::Event,
            3 => Self::Gap,
            4 => Self::Command,
            5 => Self::CommandAck,
            6 => Self::Heartbeat,
            7 => Self::ResyncRequest,
            8 => Self::Sync,
            9 => Self::Denied,
            10 => Self::Goodbye,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HelloPayload {
    pid: ProcessId,
    #[serde(default)]
    process: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DeniedPayload {
    reason: String,
}

/// Typed body of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// First frame from an observer; announces the owning process and
    /// its executable name.
    Hello { pid: ProcessId, process: String },
    Event(HookEvent),
    /// The observer dropped the given sequence range on overflow.
    Gap(SeqGap),
    Command(Command),
    CommandAck(CommandAck),
    Heartbeat,
    /// Receiver lost framing and asks the peer for a `Sync` marker.
    ResyncRequest,
    Sync,
    /// Hook installation was refused inside the observed process.
    Denied { reason: String },
    Goodbye,
}

impl Message {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Hello { .. } => FrameKind::Hello,
            Self::Event(_) => FrameKind::Event,
            Self::Gap(_) => FrameKind::Gap,
            Self::Command(_) => FrameKind::Command,
            Self::CommandAck(_) => FrameKind::CommandAck,
            Self::Heartbeat => FrameKind::Heartbeat,
            Self::ResyncRequest => FrameKind::ResyncRequest,
            Self::Sync => FrameKind::Sync,
            Self::Denied { .. } => FrameKind::Denied,
            Self::Goodbye => FrameKind::Goodbye,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Hello { pid, process } => serde_json::to_vec(&HelloPayload {
                pid: *pid,
                process: process.clone(),
            })?,
            Self::Event(event) => serde_json::to_vec(event)?,
            Self::Gap(gap) => serde_json::to_vec(gap)?,
            Self::Command(command) => serde_json::to_vec(command)?,
            Self::CommandAck(ack) => serde_json::to_vec(ack)?,
            Self::Denied { reason } => serde_json::to_vec(&DeniedPayload {
                reason: reason.clone(),
            })?,
            Self::Heartbeat | Self::ResyncRequest | Self::Sync | Self::Goodbye => Vec::new(),
        };
        Ok(payload)
    }

    fn decode(kind: FrameKind, payload: &[u8]) -> std::result::Result<Self, Malformed> {
        fn parse<T: DeserializeOwned>(payload: &[u8]) -> std::result::Result<T, Malformed> {
            serde_json::from_slice(payload).map_err(|e| Malformed::Payload(e.to_string()))
        }

        Ok(match kind {
            FrameKind::Hello => {
                let hello: HelloPayload = parse(payload)?;
                Self::Hello {
                    pid: hello.pid,
                    process: hello.process,
                }
            }
            FrameKind::Event => Self::Event(parse(payload)?),
            FrameKind::Gap => Self::Gap(parse(payload)?),
            FrameKind::Command => Self::Command(parse(payload)?),
            FrameKind::CommandAck => Self::CommandAck(parse(payload)?),
            FrameKind::Denied => Self::Denied {
                reason: parse::<DeniedPayload>(payload)?.reason,
            },
            FrameKind::Heartbeat => Self::Heartbeat,
            FrameKind::ResyncRequest => Self::ResyncRequest,
            FrameKind::Sync => Self::Sync,
            FrameKind::Goodbye => Self::Goodbye,
        })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub session: SessionId,
    pub seq: u64,
    pub message: Message,
}

impl Frame {
    pub fn new(session: SessionId, seq: u64, message: Message) -> Self {
        Self {
            session,
            seq,
            message,
        }
    }

    /// Wraps an event; the header carries the event's own sequence number.
    pub fn event(session: SessionId, event: HookEvent) -> Self {
        Self::new(session, event.seq, Message::Event(event))
    }

    /// A frame with no meaningful sequence number (heartbeats, sync markers).
    pub fn control(session: SessionId, message: Message) -> Self {
        Self::new(session, 0, message)
    }

    pub fn kind(&self) -> FrameKind {
        self.message.kind()
    }

    /// Appends the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let payload = self.message.encode_payload()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(RelayError::desync(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u8(self.kind() as u8);
        dst.put_u32(self.session.0);
        dst.put_u64(self.seq);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }

    /// Encodes this frame into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Why the decoder discarded input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    /// Bytes before the next magic marker were skipped.
    #[error("skipped {0} bytes of garbage")]
    Garbage(usize),
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),
    #[error("payload length {0} exceeds limit")]
    Oversized(usize),
    #[error("undecodable payload: {0}")]
    Payload(String),
    #[error("event frame seq {header} disagrees with payload seq {payload}")]
    SeqMismatch { header: u64, payload: u64 },
}

impl From<Malformed> for RelayError {
    fn from(m: Malformed) -> Self {
        RelayError::desync(m.to_string())
    }
}

/// Incremental frame decoder tolerant of arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes received from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Yields the next complete frame, `None` if more input is needed.
    ///
    /// On error the offending bytes have already been discarded, so
    /// calling again continues with whatever follows them.
    pub fn next_frame(&mut self) -> std::result::Result<Option<Frame>, Malformed> {
        if self.buf.len() < MAGIC.len() {
            return Ok(None);
        }
        if self.buf[..MAGIC.len()] != MAGIC {
            return Err(Malformed::Garbage(self.skip_to_magic()));
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[MAGIC.len()..HEADER_LEN];
        let kind_byte = header.get_u8();
        let session = SessionId(header.get_u32());
        let seq = header.get_u64();
        let len = header.get_u32() as usize;

        let Some(kind) = FrameKind::from_u8(kind_byte) else {
            self.buf.advance(MAGIC.len());
            return Err(Malformed::UnknownKind(kind_byte));
        };
        if len > MAX_PAYLOAD {
            self.buf.advance(MAGIC.len());
            return Err(Malformed::Oversized(len));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);
        let message = Message::decode(kind, &payload)?;
        if let Message::Event(event) = &message
            && event.seq != seq
        {
            return Err(Malformed::SeqMismatch {
                header: seq,
                payload: event.seq,
            });
        }
        Ok(Some(Frame {
            session,
            seq,
            message,
        }))
    }

    /// Drops bytes up to the next magic marker and returns how many.
    fn skip_to_magic(&mut self) -> usize {
        let found = self.buf[1..]
            .windows(MAGIC.len())
            .position(|w| w == MAGIC)
            .map(|p| p + 1);
        let skip = match found {
            Some(pos) => pos,
            // Keep a trailing first magic byte; its partner may be in the next chunk.
            None if self.buf.last() == Some(&MAGIC[0]) => self.buf.len() - 1,
            None => self.buf.len(),
        };
        self.buf.advance(skip);
        skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HookEventKind;
    use crate::window::WindowId;
    use crate::{CommandKind, Rect};

    fn moved(seq: u64) -> HookEvent {
        HookEvent::new(
            WindowId::new(10, 0xA0),
            seq,
            HookEventKind::Moved {
                rect: Rect::new(seq as i32, 0, 100, 100),
            },
        )
    }

    fn encode_all(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            frame.encode(&mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = decoder.next_frame() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn decodes_regardless_of_chunk_boundaries() {
        // Arrange
        let session = SessionId(3);
        let frames: Vec<Frame> = (1..=20).map(|s| Frame::event(session, moved(s))).collect();
        let bytes = encode_all(&frames);

        for chunk_size in [1, 2, 3, 7, HEADER_LEN, 64, bytes.len()] {
            // Act
            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                decoder.push(chunk);
                decoded.extend(drain(&mut decoder));
            }

            // Assert
            assert_eq!(decoded, frames, "chunk size {chunk_size}");
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn partial_frame_waits_for_more_input() {
        // Arrange
        let bytes = Frame::event(SessionId(1), moved(1)).to_bytes().unwrap();
        let mut decoder = FrameDecoder::new();

        // Act
        decoder.push(&bytes[..bytes.len() - 1]);

        // Assert
        assert_eq!(decoder.next_frame(), Ok(None));
        decoder.push(&bytes[bytes.len() - 1..]);
        assert!(matches!(decoder.next_frame(), Ok(Some(_))));
    }

    #[test]
    fn garbage_is_skipped_up_to_next_magic() {
        // Arrange
        let good = Frame::control(SessionId(1), Message::Sync);
        let mut bytes = b"xxxxx".to_vec();
        bytes.extend_from_slice(&good.to_bytes().unwrap());
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        // Act / Assert
        assert_eq!(decoder.next_frame(), Err(Malformed::Garbage(5)));
        assert_eq!(decoder.next_frame(), Ok(Some(good)));
    }

    #[test]
    fn corrupt_payload_discards_only_that_frame() {
        // Arrange
        let mut bad = Frame::event(SessionId(1), moved(1)).to_bytes().unwrap().to_vec();
        let last = bad.len() - 1;
        bad[last] = b'#';
        let next = Frame::event(SessionId(1), moved(2));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bad);
        decoder.push(&next.to_bytes().unwrap());

        // Act / Assert
        assert!(matches!(decoder.next_frame(), Err(Malformed::Payload(_))));
        assert_eq!(decoder.next_frame(), Ok(Some(next)));
    }

    #[test]
    fn oversized_length_is_rejected_without_waiting() {
        // Arrange
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(FrameKind::Event as u8);
        bytes.put_u32(1);
        bytes.put_u64(1);
        bytes.put_u32((MAX_PAYLOAD + 1) as u32);
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        // Act / Assert
        assert_eq!(
            decoder.next_frame(),
            Err(Malformed::Oversized(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn command_and_hello_frames_decode() {
        // Arrange
        let frames = vec![
            Frame::control(
                SessionId::UNASSIGNED,
                Message::Hello {
                    pid: ProcessId(77),
                    process: "editor".into(),
                },
            ),
            Frame::new(
                SessionId(4),
                9,
                Message::Command(Command::new(WindowId::new(77, 1), CommandKind::Focus)),
            ),
            Frame::control(
                SessionId(4),
                Message::Denied {
                    reason: "policy".into(),
                },
            ),
        ];
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_all(&frames));

        // Act
        let decoded = drain(&mut decoder);

        // Assert
        assert_eq!(decoded, frames);
    }
}
