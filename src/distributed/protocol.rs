//! Master/worker wire protocol
//!
//! Every message travels as one self-describing frame. All integers are
//! big-endian and every string is a 4-byte length followed by UTF-8 bytes.
//!
//! # Frame Layout
//!
//! ```text
//! [4: magic len][magic "CSM218"]
//! [4: version]
//! [4: type len][type]           REGISTER | HEARTBEAT | TASK | RESULT
//! [4: session len][session]     client/session tag
//! [4: sender len][sender]       worker id or "MASTER"
//! [8: timestamp]                epoch milliseconds
//! [4: payload len][payload]     raw bytes, may be empty
//! ```
//!
//! # Message Flow
//!
//! ```text
//! Master                          Worker
//!     |                              |
//!     |<------- REGISTER ------------|
//!     |                              |
//!     |<------- HEARTBEAT -----------|  (every interval)
//!     |                              |
//!     |-------- TASK --------------->|
//!     |<------- RESULT --------------|
//! ```
//!
//! Because each field announces its own length the reader never scans for a
//! terminator, so partial reads and TCP fragmentation are handled by simply
//! waiting for the announced number of bytes.

use crate::error::ProtocolError;
use crate::util::time::epoch_millis;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sync/validity tag at the start of every frame
pub const MAGIC: &str = "CSM218";

/// Protocol version
///
/// Increment this when making breaking changes to the frame layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted string field (type, session, sender)
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Largest accepted payload
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Sender identity used by the master on frames it originates
pub const MASTER_SENDER: &str = "MASTER";

/// Message type carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Worker announces its identity (Worker → Master)
    Register,
    /// Liveness signal (Worker → Master)
    Heartbeat,
    /// One work unit to execute (Master → Worker)
    Task,
    /// Output of one work unit (Worker → Master)
    Result,
}

impl MessageType {
    /// Wire spelling of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Heartbeat => "HEARTBEAT",
            Self::Task => "TASK",
            Self::Result => "RESULT",
        }
    }

    /// Parse the wire spelling
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "REGISTER" => Ok(Self::Register),
            "HEARTBEAT" => Ok(Self::Heartbeat),
            "TASK" => Ok(Self::Task),
            "RESULT" => Ok(Self::Result),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded frame
///
/// The magic tag is implicit: it is written on encode and verified on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u32,
    pub kind: MessageType,
    pub session: String,
    pub sender: String,
    pub timestamp_ms: i64,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame stamped with the current time and protocol version
    pub fn new(kind: MessageType, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            session: String::new(),
            sender: sender.into(),
            timestamp_ms: epoch_millis(),
            payload,
        }
    }

    pub fn register(sender: impl Into<String>) -> Self {
        Self::new(MessageType::Register, sender, Vec::new())
    }

    pub fn heartbeat(sender: impl Into<String>) -> Self {
        Self::new(MessageType::Heartbeat, sender, Vec::new())
    }

    pub fn task(sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Task, sender, payload)
    }

    pub fn result(sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Result, sender, payload)
    }

    /// Attach a client/session tag
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }
}

fn check_len(field: &'static str, len: usize, limit: usize) -> Result<(), ProtocolError> {
    if len > limit {
        return Err(ProtocolError::LengthLimit { field, len, limit });
    }
    Ok(())
}

fn put_string(out: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), ProtocolError> {
    check_len(field, s.len(), MAX_STRING_LEN)?;
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Serialize a frame to bytes
///
/// Fails only when a field exceeds the limits a peer would reject anyway.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    check_len("payload", frame.payload.len(), MAX_PAYLOAD_LEN)?;

    let capacity = 4 * 6
        + 8
        + MAGIC.len()
        + frame.kind.as_str().len()
        + frame.session.len()
        + frame.sender.len()
        + frame.payload.len();
    let mut out = Vec::with_capacity(capacity);

    put_string(&mut out, "magic", MAGIC)?;
    out.extend_from_slice(&frame.version.to_be_bytes());
    put_string(&mut out, "type", frame.kind.as_str())?;
    put_string(&mut out, "session", &frame.session)?;
    put_string(&mut out, "sender", &frame.sender)?;
    out.extend_from_slice(&frame.timestamp_ms.to_be_bytes());
    out.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&frame.payload);

    Ok(out)
}

/// Bounds-checked cursor over a byte slice; `None` means "need more bytes"
struct SliceCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Option<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Some(i64::from_be_bytes(raw))
    }

    fn string(&mut self, field: &'static str) -> Result<Option<String>, ProtocolError> {
        let Some(len) = self.u32() else {
            return Ok(None);
        };
        let len = len as usize;
        check_len(field, len, MAX_STRING_LEN)?;
        let Some(bytes) = self.take(len) else {
            return Ok(None);
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8(field))
    }
}

macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Decode one frame from the front of a buffer
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame, and
/// `Ok(Some((frame, consumed)))` once it does. Corrupt input is an error as
/// soon as it is detectable, even if the frame is incomplete.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let mut cur = SliceCursor { buf, pos: 0 };

    let magic_len = need!(cur.u32()) as usize;
    if magic_len != MAGIC.len() {
        return Err(ProtocolError::BadMagic(format!("<{} bytes>", magic_len)));
    }
    let magic = need!(cur.take(magic_len));
    if magic != MAGIC.as_bytes() {
        return Err(ProtocolError::BadMagic(
            String::from_utf8_lossy(magic).into_owned(),
        ));
    }

    let version = need!(cur.u32());
    let kind = MessageType::parse(&need!(cur.string("type")?))?;
    let session = need!(cur.string("session")?);
    let sender = need!(cur.string("sender")?);
    let timestamp_ms = need!(cur.i64());

    let payload_len = need!(cur.u32()) as usize;
    check_len("payload", payload_len, MAX_PAYLOAD_LEN)?;
    let payload = need!(cur.take(payload_len)).to_vec();

    let frame = Frame {
        version,
        kind,
        session,
        sender,
        timestamp_ms,
        payload,
    };
    Ok(Some((frame, cur.pos)))
}

async fn read_field<R>(reader: &mut R, buf: &mut [u8], field: &'static str) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Truncated(field))
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R, field: &'static str) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    read_field(reader, &mut buf, field).await?;
    Ok(u32::from_be_bytes(buf))
}

async fn read_bytes<R>(
    reader: &mut R,
    field: &'static str,
    limit: usize,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = read_u32(reader, field).await? as usize;
    check_len(field, len, limit)?;
    let mut buf = vec![0u8; len];
    read_field(reader, &mut buf, field).await?;
    Ok(buf)
}

async fn read_string<R: AsyncRead + Unpin>(reader: &mut R, field: &'static str) -> Result<String, ProtocolError> {
    let bytes = read_bytes(reader, field, MAX_STRING_LEN).await?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8(field))
}

/// Read the first 4 bytes of a frame, distinguishing a clean close from a cut
async fn read_frame_start<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<u32>, ProtocolError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated("magic"));
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

/// Read one complete frame from a stream
///
/// Returns `Ok(None)` on a clean end-of-stream between frames, which is the
/// normal way a peer goes away. End-of-stream inside a frame is
/// [`ProtocolError::Truncated`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, ProtocolError> {
    let Some(magic_len) = read_frame_start(reader).await? else {
        return Ok(None);
    };
    let magic_len = magic_len as usize;
    if magic_len != MAGIC.len() {
        return Err(ProtocolError::BadMagic(format!("<{} bytes>", magic_len)));
    }
    let mut magic = vec![0u8; magic_len];
    read_field(reader, &mut magic, "magic").await?;
    if magic != MAGIC.as_bytes() {
        return Err(ProtocolError::BadMagic(
            String::from_utf8_lossy(&magic).into_owned(),
        ));
    }

    let version = read_u32(reader, "version").await?;
    let kind = MessageType::parse(&read_string(reader, "type").await?)?;
    let session = read_string(reader, "session").await?;
    let sender = read_string(reader, "sender").await?;

    let mut ts = [0u8; 8];
    read_field(reader, &mut ts, "timestamp").await?;
    let timestamp_ms = i64::from_be_bytes(ts);

    let payload = read_bytes(reader, "payload", MAX_PAYLOAD_LEN).await?;

    Ok(Some(Frame {
        version,
        kind,
        session,
        sender,
        timestamp_ms,
        payload,
    }))
}

/// Write one frame to a stream and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
