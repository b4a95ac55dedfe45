//! Built-in middleware.
//!
//! Middleware is not a separate concept: it is any [`Handler`](crate::Handler)
//! placed ahead of the route handlers, usually with [`Router::layer`] or
//! [`Group::layer`]. A middleware wraps the rest of the chain by calling
//! [`Context::next`] and stops it with [`Context::abort`].
//!
//! | Middleware           | Behaviour                                               |
//! |----------------------|---------------------------------------------------------|
//! | [`LoggerMiddleware`] | logs method, path, status and elapsed time              |
//! | [`Recovery`]         | turns a panic in the rest of the chain into a 500       |
//! | [`AutoOptions`]      | answers `OPTIONS` with `204` and an `Allow` header      |
//!
//! Register [`Recovery`] first so it also covers the middleware after it.
//!
//! # Writing middleware
//!
//! ```
//! use std::time::Instant;
//! use trellis_core::prelude::*;
//!
//! let timing = from_fn(|ctx| Box::pin(async move {
//!     let start = Instant::now();
//!     ctx.next().await;
//!     let elapsed = format!("{}us", start.elapsed().as_micros());
//!     ctx.header("x-elapsed", elapsed);
//! }));
//!
//! let router = Router::new().layer(Recovery::new()).layer(timing);
//! # let _ = router;
//! ```
//!
//! [`Router::layer`]: crate::Router::layer
//! [`Group::layer`]: crate::router::Group::layer
//! [`Context::next`]: crate::Context::next
//! [`Context::abort`]: crate::Context::abort

pub mod logger;
pub mod options;
pub mod recovery;

pub use logger::{LogLevel, LoggerMiddleware};
pub use options::AutoOptions;
pub use recovery::Recovery;
