//! Request logging.
//!
//! [`LoggerMiddleware`] times the rest of the chain and emits one `tracing`
//! event per request:
//!
//! ```text
//! INFO request method=GET path=/users/42 pattern=/users/:id status=200 elapsed=183µs
//! ```
//!
//! Requests that end with a 5xx status are always logged at `error`.
//!
//! # Examples
//!
//! ```
//! use trellis_core::prelude::*;
//!
//! let router = Router::new()
//!     .layer(LoggerMiddleware::with_level(LogLevel::Debug))
//!     .get("/", handler(|| async { "ok" }));
//! # let _ = router;
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::handler::Handler;

/// Level at which successful requests are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
}

/// Logs method, path, matched pattern, status and elapsed time.
#[derive(Debug, Default)]
pub struct LoggerMiddleware {
    log_level: LogLevel,
}

impl LoggerMiddleware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_level(level: LogLevel) -> Arc<Self> {
        Arc::new(Self { log_level: level })
    }

    pub fn level(&self) -> LogLevel {
        self.log_level
    }
}

#[async_trait]
impl Handler for LoggerMiddleware {
    async fn call(&self, ctx: &mut Context) {
        let start = Instant::now();
        let method = ctx.method().clone();
        let path = ctx.path().to_string();

        ctx.next().await;

        let elapsed = start.elapsed();
        let status = ctx.response_status().as_u16();
        let pattern = ctx.pattern();

        if ctx.is_hijacked() {
            debug!(%method, path = %path, pattern, ?elapsed, "connection hijacked");
            return;
        }
        if ctx.response_status().is_server_error() {
            error!(%method, path = %path, pattern, status, ?elapsed, "request");
            return;
        }
        match self.log_level {
            LogLevel::Debug => debug!(%method, path = %path, pattern, status, ?elapsed, "request"),
            LogLevel::Info => info!(%method, path = %path, pattern, status, ?elapsed, "request"),
            LogLevel::Warn => warn!(%method, path = %path, pattern, status, ?elapsed, "request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::from_fn;
    use bytes::Bytes;
    use http::{Request, StatusCode};

    #[tokio::test]
    async fn test_logger_runs_rest_of_chain() {
        let mut ctx = Context::new(Request::new(Bytes::new()));
        ctx.push_handlers([
            LoggerMiddleware::with_level(LogLevel::Warn) as Arc<dyn Handler>,
            from_fn(|ctx| {
                Box::pin(async move {
                    ctx.status_text(StatusCode::BAD_GATEWAY);
                })
            }),
        ]);
        ctx.next().await;

        assert!(ctx.is_exhausted());
        assert_eq!(ctx.response_status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_default_level() {
        assert_eq!(LoggerMiddleware::new().level(), LogLevel::Info);
    }
}
