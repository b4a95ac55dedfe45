//! # Trellis Core
//!
//! `trellis-core` is a small HTTP toolkit: a segment trie router, a
//! cursor-driven handler chain for middleware, and an RFC 6455 WebSocket
//! layer that takes over hijacked HTTP connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Application                            │
//! │   handlers (from_fn / handler / service)      middleware       │
//! └───────────────────────────────────────────────────────────────┘
//!                               │
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Router ── Tree<MethodMap> ── groups ── no_route / no_method   │
//! │  Context (cursor chain, request, response, state)  ContextPool │
//! └───────────────────────────────────────────────────────────────┘
//!                               │ hijack
//! ┌───────────────────────────────────────────────────────────────┐
//! │  WebSocket ── FrameReader / write_frame ── WsGroup             │
//! └───────────────────────────────────────────────────────────────┘
//!                               │
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 tokio (TCP, HTTP/1.1 keep-alive)               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`tree`]: route trie and pattern syntax
//! - [`router`]: registration, groups, dispatch and serving
//! - [`context`]: per-request state and the handler chain cursor
//! - [`handler`]: the [`Handler`] trait and function adapters
//! - [`extractor`]: typed handler arguments
//! - [`middleware`]: logging, panic recovery, automatic `OPTIONS`
//! - [`frame`]: RFC 6455 frame codec
//! - [`websocket`]: upgrade handshake and connection wrapper
//! - [`group`]: broadcasting to many connections
//! - [`message`]: data messages read from a connection
//! - [`server`]: HTTP/1.1 request parsing and response writing
//! - [`config`], [`state`], [`error`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use trellis_core::prelude::*;
//!
//! async fn hello(Path(name): Path<String>) -> String {
//!     format!("hello, {name}")
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let echo = from_fn(|ctx| Box::pin(async move {
//!         let Ok(ws) = WebSocket::upgrade(ctx).await else {
//!             ctx.status_text(StatusCode::BAD_REQUEST);
//!             return;
//!         };
//!         tokio::spawn(async move {
//!             while let Ok(msg) = ws.message().await {
//!                 if ws.send_message(&msg).await.is_err() {
//!                     break;
//!                 }
//!             }
//!         });
//!     }));
//!
//!     Router::new()
//!         .layer(Recovery::new())
//!         .layer(LoggerMiddleware::new())
//!         .get("/hello/:name", handler(hello))
//!         .get("/ws", echo)
//!         .listen("127.0.0.1:8080")
//!         .await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod frame;
pub mod group;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod router;
pub mod server;
pub mod state;
pub mod tree;
pub mod websocket;

pub use config::{ServerConfig, WebSocketConfig};
pub use context::{Context, ContextPool};
pub use error::{Error, Result};
pub use extractor::{Data, Extension, FromContext, Json, Path, Query, State};
pub use frame::{CloseCode, Frame, FrameError, FrameReader, Opcode};
pub use group::WsGroup;
pub use handler::{
    from_fn, handler, service, Handler, HandlerService, IntoHandler, IntoResponse, JsonResponse,
};
pub use message::{Message, MessageType};
pub use middleware::{AutoOptions, LogLevel, LoggerMiddleware, Recovery};
pub use router::{Group, Lookup, MethodMap, Router};
pub use state::AppState;
pub use tree::Tree;
pub use websocket::{ConnectionState, WebSocket};

/// Commonly used types and traits.
///
/// ```
/// use trellis_core::prelude::*;
///
/// async fn create(Json(body): Json<serde_json::Value>) -> (StatusCode, JsonResponse<serde_json::Value>) {
///     (StatusCode::CREATED, JsonResponse(body))
/// }
///
/// let router = Router::new()
///     .layer(AutoOptions::new())
///     .post("/items", handler(create));
/// # let _ = router;
/// ```
pub mod prelude {
    pub use crate::context::Context;
    pub use crate::error::{Error, Result};
    pub use crate::extractor::{Data, Extension, FromContext, Json, Params, Path, Query, State};
    pub use crate::frame::{CloseCode, Opcode};
    pub use crate::group::WsGroup;
    pub use crate::handler::{from_fn, handler, service, Handler, IntoResponse, JsonResponse};
    pub use crate::message::{Message, MessageType};
    pub use crate::middleware::{AutoOptions, LogLevel, LoggerMiddleware, Recovery};
    pub use crate::router::{Group, Router};
    pub use crate::state::AppState;
    pub use crate::websocket::WebSocket;
    pub use http::{Method, StatusCode};
}
