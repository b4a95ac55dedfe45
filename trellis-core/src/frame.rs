//! RFC 6455 frame codec.
//!
//! This module reads and writes single WebSocket frames. It has no notion of
//! connection state: decoding reports what arrived, including control
//! opcodes, and leaves reacting to them (answering pings, closing) to
//! [`WebSocket`](crate::websocket::WebSocket).
//!
//! # Wire Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Only unfragmented frames are accepted: FIN must be set, the reserved bits
//! must be clear (no extensions are negotiated), and a bare continuation
//! frame is rejected.
//!
//! # Decoding
//!
//! [`decode_frame`] works on an in-memory buffer and returns `Ok(None)` until
//! a whole frame is available. [`FrameReader`] pairs it with an async reader.
//! Because bytes are only consumed once a frame is complete, dropping a
//! pending [`FrameReader::read_frame`] future never loses data.
//!
//! # Examples
//!
//! ```
//! use bytes::BytesMut;
//! use trellis_core::frame::{decode_frame, Opcode};
//!
//! // A masked "Hello" text frame from RFC 6455 section 5.7.
//! let mut buf = BytesMut::from(
//!     &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58][..],
//! );
//! let frame = decode_frame(&mut buf, 1024).unwrap().unwrap();
//! assert_eq!(frame.opcode, Opcode::Text);
//! assert_eq!(&frame.payload[..], b"Hello");
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_PAYLOAD: u64 = 64 << 20;

/// Largest payload a Close, Ping or Pong frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
const MAX_HEADER_LEN: usize = 14;

const FIN: u8 = 0x80;
const RSV: u8 = 0x70;
const OPCODE: u8 = 0x0F;
const MASK: u8 = 0x80;
const LEN7: u8 = 0x7F;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Returns `true` for Close, Ping and Pong.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Returns `true` for Text and Binary.
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

/// Status code carried in the payload of a Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNSUPPORTED_DATA: CloseCode = CloseCode(1003);
    /// Reserved: signals that a Close frame carried no status. Never sent.
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Reserved: signals that the connection dropped without a Close frame. Never sent.
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    pub const MANDATORY_EXTENSION: CloseCode = CloseCode(1010);
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);
    pub const SERVICE_RESTART: CloseCode = CloseCode(1012);
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode(1013);
    pub const TLS_HANDSHAKE: CloseCode = CloseCode(1015);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while decoding or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("FIN bit not set: fragmented messages are not supported")]
    FinNotSet,

    #[error("reserved bits set without a negotiated extension")]
    RsvNotZero,

    #[error("continuation frame without a fragmented message")]
    Continuation,

    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("control frame payload of {0} bytes exceeds 125 bytes")]
    ControlTooLarge(usize),

    /// The stream ended before a complete frame arrived.
    #[error("connection closed before a complete frame was read")]
    Eof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Returns `true` when the peer violated the protocol.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FrameError::Eof | FrameError::Io(_))
    }
}

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    pub payload: Bytes,
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched if the frame is incomplete.
/// On success the frame's bytes are removed from `buf`. Header checks run
/// as soon as the first byte is available, so a bad frame is rejected before
/// its payload arrives.
pub fn decode_frame(buf: &mut BytesMut, max_payload: u64) -> Result<Option<Frame>, FrameError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    if first & FIN == 0 {
        return Err(FrameError::FinNotSet);
    }
    let opcode = match Opcode::try_from(first & OPCODE)? {
        Opcode::Continuation => return Err(FrameError::Continuation),
        opcode => opcode,
    };
    if first & RSV != 0 {
        return Err(FrameError::RsvNotZero);
    }

    let Some(&second) = buf.get(1) else {
        return Ok(None);
    };
    let masked = second & MASK != 0;

    let (len, mut offset) = match second & LEN7 {
        126 => {
            let Some(ext) = buf.get(2..4) else {
                return Ok(None);
            };
            (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 4)
        }
        127 => {
            let Some(ext) = buf.get(2..10) else {
                return Ok(None);
            };
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(ext);
            (u64::from_be_bytes(bytes), 10)
        }
        n => (u64::from(n), 2),
    };
    if opcode.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(FrameError::ControlTooLarge(usize::try_from(len).unwrap_or(usize::MAX)));
    }

    let too_large = || FrameError::PayloadTooLarge {
        len,
        max: max_payload,
    };
    if len > max_payload {
        return Err(too_large());
    }
    let len = usize::try_from(len).map_err(|_| too_large())?;

    let mask = if masked {
        let Some(key) = buf.get(offset..offset + 4) else {
            return Ok(None);
        };
        let mut mask = [0u8; 4];
        mask.copy_from_slice(key);
        offset += 4;
        Some(mask)
    } else {
        None
    };

    let total = offset + len;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    buf.advance(offset);
    let mut payload = buf.split_to(len);
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some(Frame {
        opcode,
        masked,
        payload: payload.freeze(),
    }))
}

/// XORs `payload` in place with the 4-byte masking key.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Reads frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_payload: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, 4096, DEFAULT_MAX_PAYLOAD)
    }

    /// Creates a reader with an initial buffer of `capacity` bytes that
    /// rejects frames announcing more than `max_payload` bytes.
    pub fn with_capacity(inner: R, capacity: usize, max_payload: u64) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(capacity.max(MAX_HEADER_LEN)),
            max_payload,
        }
    }

    /// Reads the next frame.
    ///
    /// Cancel safe: if the future is dropped before completing, any bytes
    /// already received stay buffered for the next call.
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.max_payload)? {
                return Ok(frame);
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(FrameError::Eof);
            }
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes one unmasked frame with FIN set, then flushes.
///
/// Servers never mask. The Close opcode gets no special treatment here;
/// build its payload with [`close_payload`].
pub async fn write_frame<W>(writer: &mut W, data: &[u8], opcode: Opcode) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    check_control_len(opcode, data.len())?;
    let mut head = BytesMut::with_capacity(MAX_HEADER_LEN);
    put_header(&mut head, opcode, data.len(), None);

    writer.write_all(&head).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes one frame masked with `mask`, as a client must, then flushes.
pub async fn write_masked_frame<W>(
    writer: &mut W,
    data: &[u8],
    opcode: Opcode,
    mask: [u8; 4],
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    check_control_len(opcode, data.len())?;
    let mut buf = BytesMut::with_capacity(MAX_HEADER_LEN + data.len());
    put_header(&mut buf, opcode, data.len(), Some(mask));
    let start = buf.len();
    buf.put_slice(data);
    apply_mask(&mut buf[start..], mask);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn check_control_len(opcode: Opcode, len: usize) -> Result<(), FrameError> {
    if opcode.is_control() && len > MAX_CONTROL_PAYLOAD {
        return Err(FrameError::ControlTooLarge(len));
    }
    Ok(())
}

fn put_header(buf: &mut BytesMut, opcode: Opcode, len: usize, mask: Option<[u8; 4]>) {
    buf.put_u8(FIN | opcode as u8);

    let mask_bit = if mask.is_some() { MASK } else { 0 };
    if len < 126 {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len as u64);
    }

    if let Some(mask) = mask {
        buf.put_slice(&mask);
    }
}

/// Builds a Close payload: the big-endian status code then the UTF-8 reason,
/// cut to fit in a control frame.
pub fn close_payload(code: CloseCode, reason: &str) -> Bytes {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let reason = &reason[..end];
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code.0);
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Splits a Close payload into status code and reason.
///
/// Returns `None` for an empty payload (status 1005, no status received).
pub fn parse_close_payload(payload: &[u8]) -> Option<(CloseCode, String)> {
    let code = payload.get(..2)?;
    let code = CloseCode(u16::from_be_bytes([code[0], code[1]]));
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((code, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<Option<Frame>, FrameError> {
        decode_frame(&mut BytesMut::from(bytes), DEFAULT_MAX_PAYLOAD)
    }

    #[tokio::test]
    async fn test_round_trip_at_length_boundaries() {
        let cases = [
            (0usize, 2usize),
            (125, 2),
            (126, 4),
            (65535, 4),
            (65536, 10),
            (100_000, 10),
        ];

        for (len, header_len) in cases {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut wire = Vec::new();
            write_frame(&mut wire, &data, Opcode::Binary).await.unwrap();

            assert_eq!(wire.len(), header_len + len, "length {len}");
            assert_eq!(wire[0], 0x82);
            match header_len {
                4 => assert_eq!(wire[1], 126),
                10 => assert_eq!(wire[1], 127),
                _ => assert_eq!(wire[1] as usize, len),
            }

            let mut reader = FrameReader::new(&wire[..]);
            let frame = reader.read_frame().await.unwrap();
            assert_eq!(frame.opcode, Opcode::Binary);
            assert!(!frame.masked);
            assert_eq!(&frame.payload[..], &data[..], "length {len}");
        }
    }

    #[test]
    fn test_masking() {
        let wire = [0x82, 0x85, 0x01, 0x02, 0x03, 0x04, 0x01, 0x02, 0x03, 0x04, 0x05];
        let frame = decode(&wire).unwrap().unwrap();
        assert!(frame.masked);
        assert_eq!(&frame.payload[..], &[0x00, 0x00, 0x00, 0x00, 0x04]);
    }

    #[tokio::test]
    async fn test_masked_write_decodes() {
        let mut wire = Vec::new();
        write_masked_frame(&mut wire, b"hello", Opcode::Text, [9, 8, 7, 6])
            .await
            .unwrap();
        assert_eq!(wire[1], 0x80 | 5);
        assert_ne!(&wire[6..], b"hello");

        let frame = decode(&wire).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"hello");
    }

    #[test]
    fn test_rejects_protocol_violations() {
        assert!(matches!(decode(&[0x01, 0x00]), Err(FrameError::FinNotSet)));
        assert!(matches!(decode(&[0xC1, 0x00]), Err(FrameError::RsvNotZero)));
        assert!(matches!(decode(&[0x83, 0x00]), Err(FrameError::ReservedOpcode(3))));
        assert!(matches!(decode(&[0x8C, 0x00]), Err(FrameError::ReservedOpcode(12))));
        assert!(matches!(decode(&[0x80, 0x00]), Err(FrameError::Continuation)));
        assert!(matches!(
            decode(&[0x89, 0x7E, 0x00, 0x7E]),
            Err(FrameError::ControlTooLarge(126))
        ));
    }

    #[test]
    fn test_rejects_on_first_byte() {
        assert!(matches!(decode(&[0x01]), Err(FrameError::FinNotSet)));
    }

    #[test]
    fn test_control_opcodes_are_reported() {
        for opcode in [Opcode::Ping, Opcode::Pong, Opcode::Close] {
            let frame = decode(&[0x80 | opcode as u8, 0x00]).unwrap().unwrap();
            assert_eq!(frame.opcode, opcode);
            assert!(frame.opcode.is_control());
        }
    }

    #[test]
    fn test_incomplete_frame_keeps_buffer() {
        let mut buf = BytesMut::from(&[0x81][..]);
        assert!(decode_frame(&mut buf, 1024).unwrap().is_none());

        let mut buf = BytesMut::from(&[0x81, 0x05, b'h', b'e'][..]);
        assert!(decode_frame(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), 4);

        buf.extend_from_slice(b"llo");
        let frame = decode_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_payload_limit() {
        let wire = [0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0];
        let err = decode_frame(&mut BytesMut::from(&wire[..]), 1024).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { len: 65536, max: 1024 }));
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"one", Opcode::Text).await.unwrap();
        write_frame(&mut wire, b"two", Opcode::Binary).await.unwrap();

        let mut reader = FrameReader::new(&wire[..]);
        let first = reader.read_frame().await.unwrap();
        let second = reader.read_frame().await.unwrap();
        assert_eq!((first.opcode, &first.payload[..]), (Opcode::Text, &b"one"[..]));
        assert_eq!((second.opcode, &second.payload[..]), (Opcode::Binary, &b"two"[..]));
        assert!(matches!(reader.read_frame().await, Err(FrameError::Eof)));
    }

    #[tokio::test]
    async fn test_reader_across_split_writes() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        tokio::spawn(async move {
            client.write_all(&[0x81, 0x03, b'a']).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"bc").await.unwrap();
        });

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(&frame.payload[..], b"abc");
    }

    #[test]
    fn test_close_payload() {
        let payload = close_payload(CloseCode::GOING_AWAY, "bye");
        assert_eq!(&payload[..], &[0x03, 0xE9, b'b', b'y', b'e']);

        let (code, reason) = parse_close_payload(&payload).unwrap();
        assert_eq!(code, CloseCode::GOING_AWAY);
        assert_eq!(reason, "bye");
        assert!(parse_close_payload(&[]).is_none());

        let long = "é".repeat(100);
        let payload = close_payload(CloseCode::NORMAL, &long);
        assert!(payload.len() <= MAX_CONTROL_PAYLOAD);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    #[tokio::test]
    async fn test_control_payload_limit() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0u8; MAX_CONTROL_PAYLOAD], Opcode::Ping)
            .await
            .unwrap();
        assert_eq!(wire.len(), 2 + MAX_CONTROL_PAYLOAD);

        let mut wire = Vec::new();
        let err = write_frame(&mut wire, &[0u8; 126], Opcode::Pong).await.unwrap_err();
        assert!(matches!(err, FrameError::ControlTooLarge(126)));
        assert!(wire.is_empty());

        let err = write_masked_frame(&mut wire, &[0u8; 200], Opcode::Close, [1, 2, 3, 4])
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::ControlTooLarge(200)));

        write_frame(&mut wire, &[0u8; 126], Opcode::Binary).await.unwrap();
    }
}
