//! WebSocket handshake and connection.
//!
//! A handler upgrades its request with [`WebSocket::upgrade`]: the
//! connection is hijacked from the HTTP server, the `101 Switching
//! Protocols` response is written, and the returned [`WebSocket`] owns the
//! stream from then on.
//!
//! # Lifecycle
//!
//! ```text
//!   upgrade() ──> Open ──close() / Close frame / EOF──> Closed
//! ```
//!
//! Closing happens once, under the writer lock. A second
//! [`close`](WebSocket::close) returns [`Error::AlreadyClosed`] without
//! touching the socket; reads and writes after close return
//! [`Error::Closed`].
//!
//! # Examples
//!
//! ```
//! use trellis_core::prelude::*;
//!
//! let echo = from_fn(|ctx| Box::pin(async move {
//!     let ws = match WebSocket::upgrade(ctx).await {
//!         Ok(ws) => ws,
//!         Err(err) => return err.into_response(ctx),
//!     };
//!     tokio::spawn(async move {
//!         while let Ok(msg) = ws.message().await {
//!             if ws.send(msg.as_bytes(), msg.opcode()).await.is_err() {
//!                 break;
//!             }
//!         }
//!     });
//! }));
//!
//! let router = Router::new().get("/ws", echo);
//! # let _ = router;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{SEC_WEBSOCKET_KEY, UPGRADE};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, trace};
use tungstenite::handshake::derive_accept_key;

use crate::config::WebSocketConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::frame::{
    close_payload, parse_close_payload, write_frame, CloseCode, FrameError, FrameReader, Opcode,
};
use crate::message::Message;
use crate::server::Stream;

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
///
/// ```
/// use trellis_core::websocket::accept_key;
///
/// assert_eq!(accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &[u8]) -> String {
    derive_accept_key(key)
}

/// Returns `true` if the headers ask for a WebSocket upgrade and carry a key.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    upgrade && websocket_key(headers).is_some()
}

/// The client's `Sec-WebSocket-Key`.
pub fn websocket_key(headers: &HeaderMap) -> Option<&[u8]> {
    headers
        .get(SEC_WEBSOCKET_KEY)
        .map(|v| v.as_bytes())
        .filter(|k| !k.is_empty())
}

/// Writes the `101 Switching Protocols` response for `key`.
pub async fn write_accept<W>(writer: &mut W, key: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

/// Whether a connection can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// An open WebSocket connection.
///
/// All methods take `&self`; share the connection behind an `Arc` to read
/// and write from different tasks.
pub struct WebSocket<S = Stream> {
    reader: Mutex<FrameReader<ReadHalf<S>>>,
    writer: Mutex<BufWriter<WriteHalf<S>>>,
    /// Set under the writer lock whenever a Close frame is written.
    closed: AtomicBool,
    pingers: Mutex<Vec<oneshot::Sender<()>>>,
    peer: Option<SocketAddr>,
}

impl WebSocket<Stream> {
    /// Completes the handshake for the request in `ctx`.
    ///
    /// Fails with [`Error::NotUpgrade`] if the request is not a WebSocket
    /// upgrade, leaving the connection with the server.
    pub async fn upgrade(ctx: &mut Context) -> Result<Self> {
        if !is_upgrade_request(ctx.headers()) {
            return Err(Error::NotUpgrade);
        }
        let key = websocket_key(ctx.headers())
            .map(<[u8]>::to_vec)
            .ok_or(Error::NotUpgrade)?;

        let mut stream = ctx.hijack()?;
        write_accept(&mut stream, &key).await?;

        let peer = ctx.peer_addr();
        info!(path = %ctx.path(), peer = ?peer, "websocket connection upgraded");
        Ok(Self::with_peer(stream, ctx.ws_config(), peer))
    }
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps a stream on which the handshake has already completed.
    pub fn new(stream: S, config: WebSocketConfig) -> Self {
        Self::with_peer(stream, config, None)
    }

    fn with_peer(stream: S, config: WebSocketConfig, peer: Option<SocketAddr>) -> Self {
        let config = config.normalized();
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FrameReader::with_capacity(
                read,
                config.read_buffer_size,
                config.max_payload_size,
            )),
            writer: Mutex::new(BufWriter::with_capacity(config.write_buffer_size, write)),
            closed: AtomicBool::new(false),
            pingers: Mutex::new(Vec::new()),
            peer,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// Sends one frame carrying `data`.
    ///
    /// Sending with [`Opcode::Close`] closes the connection with status 1000.
    /// Ping and Pong payloads over 125 bytes are rejected with
    /// [`FrameError::ControlTooLarge`].
    pub async fn send(&self, data: &[u8], opcode: Opcode) -> Result<()> {
        if opcode == Opcode::Close {
            return self.close().await;
        }

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(Error::Closed);
        }
        write_frame(&mut *writer, data, opcode).await?;
        Ok(())
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(text.as_bytes(), Opcode::Text).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(data, Opcode::Binary).await
    }

    pub async fn send_message(&self, msg: &Message) -> Result<()> {
        self.send(msg.as_bytes(), msg.opcode()).await
    }

    pub async fn pong(&self, payload: &[u8]) -> Result<()> {
        self.send(payload, Opcode::Pong).await
    }

    /// Reads the next Text or Binary message.
    ///
    /// Pings are answered with a pong carrying the same payload. Pongs wake
    /// any pending [`ping`](Self::ping) and are otherwise skipped. A Close
    /// frame from the peer is echoed and, like the peer hanging up, reported
    /// as [`Error::Closed`]. Protocol violations are returned as
    /// [`Error::Frame`]; the caller should close.
    pub async fn message(&self) -> Result<Message> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut reader = self.reader.lock().await;
        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(FrameError::Eof) => {
                    self.mark_closed().await;
                    debug!(peer = ?self.peer, "websocket peer hung up");
                    return Err(Error::Closed);
                }
                Err(err) => return Err(err.into()),
            };

            match frame.opcode {
                Opcode::Ping => {
                    trace!(peer = ?self.peer, len = frame.payload.len(), "ping");
                    self.pong(&frame.payload).await?;
                }
                Opcode::Pong => self.pong_received().await,
                Opcode::Close => {
                    self.close_received(&frame.payload).await;
                    return Err(Error::Closed);
                }
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    return Message::from_frame(frame)
                        .ok_or(Error::Frame(FrameError::Continuation));
                }
            }
        }
    }

    /// Sends a ping and waits up to `timeout` for the pong.
    ///
    /// If another task holds the reader in [`message`](Self::message), that
    /// task reads the pong and hands it over. Otherwise the ping reads the
    /// next frame itself, which must be a pong: any other frame arriving
    /// first is consumed and reported as [`Error::NotPong`]. Timing out
    /// leaves partially received frames buffered for the next read.
    pub async fn ping(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.pingers.lock().await.push(tx);
        self.send(payload, Opcode::Ping).await?;

        let wait = async {
            let Ok(mut reader) = self.reader.try_lock() else {
                return rx.await.map_err(|_| Error::Closed);
            };
            match reader.read_frame().await {
                Ok(frame) if frame.opcode == Opcode::Pong => {
                    self.pong_received().await;
                    Ok(())
                }
                Ok(frame) => Err(Error::NotPong(frame.opcode)),
                Err(FrameError::Eof) => {
                    self.mark_closed().await;
                    Err(Error::Closed)
                }
                Err(err) => Err(err.into()),
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(Error::PingTimeout(timeout)))
    }

    /// Closes with status 1000.
    pub async fn close(&self) -> Result<()> {
        self.close_with(CloseCode::NORMAL, "").await
    }

    /// Sends a Close frame with `code` and `reason`, then shuts down the
    /// write side of the connection.
    pub async fn close_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }
        self.release_pingers().await;

        write_frame(&mut *writer, &close_payload(code, reason), Opcode::Close).await?;
        writer.shutdown().await?;
        debug!(peer = ?self.peer, code = code.as_u16(), reason, "websocket closed");
        Ok(())
    }

    async fn close_received(&self, payload: &[u8]) {
        let peer_code = parse_close_payload(payload);
        debug!(
            peer = ?self.peer,
            code = peer_code.as_ref().map(|(code, _)| code.as_u16()),
            "close frame received"
        );
        self.release_pingers().await;

        let mut writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let echo = match peer_code {
            Some((code, _)) => close_payload(code, ""),
            None => Bytes::new(),
        };
        if let Err(err) = write_frame(&mut *writer, &echo, Opcode::Close).await {
            debug!(peer = ?self.peer, error = %err, "failed to echo close frame");
        }
        if let Err(err) = writer.shutdown().await {
            debug!(peer = ?self.peer, error = %err, "failed to shut down connection");
        }
    }

    async fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.release_pingers().await;
    }

    async fn pong_received(&self) {
        let pingers = std::mem::take(&mut *self.pingers.lock().await);
        if pingers.is_empty() {
            trace!(peer = ?self.peer, "unsolicited pong");
        }
        for pinger in pingers {
            let _ = pinger.send(());
        }
    }

    /// Drops pending pingers so their waits end with [`Error::Closed`].
    async fn release_pingers(&self) {
        self.pingers.lock().await.clear();
    }
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket").field("peer", &self.peer).finish()
    }
}
