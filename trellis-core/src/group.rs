//! Broadcasting to a set of WebSocket connections.
//!
//! A [`WsGroup`] holds shared connections. [`send`](WsGroup::send) writes to
//! every member, and [`message`](WsGroup::message) races all members' reads
//! and returns whichever message arrives first. Members whose I/O fails are
//! dropped from the group along the way. There is no ordering guarantee
//! across members and no back-pressure.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{CloseCode, Opcode};
use crate::message::Message;
use crate::server::Stream;
use crate::websocket::WebSocket;

pub struct WsGroup<S = Stream> {
    members: Mutex<Vec<Arc<WebSocket<S>>>>,
}

impl<S> Default for WsGroup<S> {
    fn default() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
        }
    }
}

impl<S> WsGroup<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, ws: Arc<WebSocket<S>>) {
        self.members.lock().await.push(ws);
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Sends one frame to every member and returns how many received it.
    ///
    /// Members that fail to accept the frame are removed.
    pub async fn send(&self, data: &[u8], opcode: Opcode) -> usize {
        let members = self.snapshot().await;
        let mut failed = Vec::new();
        for ws in &members {
            if let Err(err) = ws.send(data, opcode).await {
                debug!(peer = ?ws.peer_addr(), error = %err, "dropping group member");
                failed.push(Arc::clone(ws));
            }
        }
        self.remove_all(&failed).await;
        members.len() - failed.len()
    }

    pub async fn send_text(&self, text: &str) -> usize {
        self.send(text.as_bytes(), Opcode::Text).await
    }

    /// Waits for the next message from any member.
    ///
    /// Members whose read fails are closed and removed. A member that broke
    /// the protocol is closed with status 1002. Returns [`Error::Closed`] once no
    /// members are left.
    pub async fn message(&self) -> Result<(Arc<WebSocket<S>>, Message)> {
        let mut reads: FuturesUnordered<_> = self
            .snapshot()
            .await
            .into_iter()
            .map(|ws| async move {
                let result = ws.message().await;
                (ws, result)
            })
            .collect();

        while let Some((ws, result)) = reads.next().await {
            match result {
                Ok(msg) => return Ok((ws, msg)),
                Err(err) => {
                    debug!(peer = ?ws.peer_addr(), error = %err, "dropping group member");
                    let code = if err.is_protocol() {
                        CloseCode::PROTOCOL_ERROR
                    } else {
                        CloseCode::NORMAL
                    };
                    close_member(&ws, code).await;
                    self.remove_all(&[ws]).await;
                }
            }
        }
        Err(Error::Closed)
    }

    /// Closes every member and empties the group.
    pub async fn close(&self) {
        let members = std::mem::take(&mut *self.members.lock().await);
        for ws in members {
            close_member(&ws, CloseCode::NORMAL).await;
        }
    }

    /// Removes members that are already closed. Returns how many were removed.
    pub async fn clean(&self) -> usize {
        let mut closed = Vec::new();
        for ws in self.snapshot().await {
            if ws.is_closed() {
                closed.push(ws);
            }
        }
        self.remove_all(&closed).await;
        closed.len()
    }

    async fn snapshot(&self) -> Vec<Arc<WebSocket<S>>> {
        self.members.lock().await.clone()
    }

    async fn remove_all(&self, gone: &[Arc<WebSocket<S>>]) {
        if gone.is_empty() {
            return;
        }
        self.members
            .lock()
            .await
            .retain(|ws| !gone.iter().any(|g| Arc::ptr_eq(g, ws)));
    }
}

async fn close_member<S>(ws: &WebSocket<S>, code: CloseCode)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    match ws.close_with(code, "").await {
        Ok(()) | Err(Error::AlreadyClosed) => {}
        Err(err) => debug!(peer = ?ws.peer_addr(), error = %err, "close failed"),
    }
}
