//! # Trellis
//!
//! HTTP routing, middleware chains and WebSocket connections on tokio.
//!
//! This crate re-exports [`trellis-core`](trellis_core); depend on it rather
//! than on the core crate directly.
//!
//! ```toml
//! [dependencies]
//! trellis = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Routing
//!
//! Patterns are `/`-separated segments. A segment is literal, a single
//! parameter (`:id`, `{id}`, `[id]`), or a catch-all (`*rest`, `...rest`,
//! `rest...`). Literal segments win over parameters, and parameters win over
//! catch-alls.
//!
//! ```
//! use trellis::prelude::*;
//!
//! async fn file(Path(path): Path<String>) -> String {
//!     format!("serving {path}")
//! }
//!
//! let router = Router::new()
//!     .get("/files/list", handler(|| async { "listing" }))
//!     .get("/files/*path", handler(file));
//! assert_eq!(router.contains("/files/a/b.txt", &Method::GET), (true, true));
//! assert_eq!(router.contains("/files/a/b.txt", &Method::POST), (true, false));
//! ```
//!
//! ## Middleware
//!
//! Middleware is a handler that calls [`Context::next`] to run the rest of the
//! chain, or [`Context::abort`] to stop it:
//!
//! ```
//! use trellis::prelude::*;
//!
//! let auth = from_fn(|ctx| Box::pin(async move {
//!     if ctx.headers().contains_key("authorization") {
//!         ctx.next().await;
//!     } else {
//!         ctx.status_text(StatusCode::UNAUTHORIZED);
//!         ctx.abort();
//!     }
//! }));
//!
//! let router = Router::new()
//!     .layer(Recovery::new())
//!     .group("/admin", |admin| admin.layer(auth).get("/", handler(|| async { "hi" })));
//! # let _ = router;
//! ```
//!
//! ## WebSocket
//!
//! A handler upgrades its request with [`WebSocket::upgrade`]; see the
//! [`websocket`] module.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub use trellis_core::*;

/// Commonly used types and traits.
pub mod prelude {
    pub use trellis_core::prelude::*;
}
