//! # ttrpc Framing
//!
//! Every ttrpc message travels inside a frame: a 10 byte big-endian header followed by
//! the payload.
//!
//! ```text
//! +----------------+----------------+--------+--------+----------------+
//! | length (u32)   | stream id (u32)| type   | flags  | payload ...    |
//! +----------------+----------------+--------+--------+----------------+
//! ```
//!
//! [`FrameReader`] buffers partially received frames internally, so awaiting
//! [`FrameReader::next_frame`] inside a `select!` never loses data when another branch wins.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed frame header.
pub const HEADER_LENGTH: usize = 10;

/// Largest payload accepted by default, matching the reference ttrpc implementation (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 << 20;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error on the ttrpc connection: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Message of {length} bytes exceeds the maximum size of {max} bytes")]
    TooLarge { length: usize, max: usize },
    #[error("Unknown ttrpc message type {0}")]
    UnknownMessageType(u8),
    #[error("Connection closed in the middle of a frame")]
    Truncated,
}

/// The kind of message carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A `Request` envelope opening a stream.
    Request,
    /// A `Response` envelope closing a stream with a status.
    Response,
    /// A raw message on an open stream.
    Data,
}

impl MessageType {
    pub const fn as_u8(self) -> u8 {
        match self {
            MessageType::Request => 1,
            MessageType::Response => 2,
            MessageType::Data => 3,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Data),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

/// Frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The sender will not send any more data on this stream.
    pub const REMOTE_CLOSED: Flags = Flags(0x1);
    /// The sender will keep sending data after the request.
    pub const REMOTE_OPEN: Flags = Flags(0x2);
    /// The frame carries no payload.
    pub const NO_DATA: Flags = Flags(0x4);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A single ttrpc frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub kind: MessageType,
    pub flags: Flags,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: u32, kind: MessageType, flags: Flags, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            kind,
            flags,
            payload: payload.into(),
        }
    }

    /// Appends the encoded frame (header and payload) to `dst`.
    pub fn encode(&self, dst: &mut BytesMut, max: usize) -> Result<(), FrameError> {
        let length = self.payload.len();
        let too_large = || FrameError::TooLarge { length, max };
        if length > max {
            return Err(too_large());
        }
        let wire_length = u32::try_from(length).map_err(|_| too_large())?;

        dst.reserve(HEADER_LENGTH + length);
        dst.put_u32(wire_length);
        dst.put_u32(self.stream_id);
        dst.put_u8(self.kind.as_u8());
        dst.put_u8(self.flags.bits());
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    frame.encode(&mut buf, max)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(HEADER_LENGTH),
            max,
        }
    }

    pub fn set_max_message_size(&mut self, max: usize) {
        self.max = max;
    }

    /// Returns the next complete frame, or `None` when the peer closed the connection
    /// on a frame boundary.
    ///
    /// Cancel safe: bytes received before cancellation stay buffered for the next call.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            if let Some(frame) = self.try_split_frame()? {
                return Ok(Some(frame));
            }

            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::Truncated)
                };
            }
        }
    }

    fn try_split_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let mut header = &self.buf[..HEADER_LENGTH];
        let length = header.get_u32() as usize;
        let stream_id = header.get_u32();
        let kind = header.get_u8();
        let flags = header.get_u8();

        if length > self.max {
            return Err(FrameError::TooLarge {
                length,
                max: self.max,
            });
        }
        if self.buf.len() < HEADER_LENGTH + length {
            self.buf.reserve(HEADER_LENGTH + length - self.buf.len());
            return Ok(None);
        }

        let kind = MessageType::try_from(kind)?;
        self.buf.advance(HEADER_LENGTH);
        let payload = self.buf.split_to(length).freeze();

        Ok(Some(Frame {
            stream_id,
            kind,
            flags: Flags::from_bits(flags),
            payload,
        }))
    }
}
