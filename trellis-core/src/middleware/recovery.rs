//! Panic recovery.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use http::{Response, StatusCode};
use tracing::error;

use crate::context::Context;
use crate::handler::Handler;

/// Catches a panic anywhere in the rest of the chain.
///
/// The panic is logged at `error` with its message and a backtrace, the
/// chain is aborted, and whatever was written so far is replaced by a bare
/// `500 Internal Server Error`.
#[derive(Debug, Default)]
pub struct Recovery;

impl Recovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Handler for Recovery {
    async fn call(&self, ctx: &mut Context) {
        let Err(panic) = AssertUnwindSafe(ctx.next()).catch_unwind().await else {
            return;
        };

        let backtrace = Backtrace::force_capture();
        error!(
            method = %ctx.method(),
            path = %ctx.path(),
            panic = panic_message(panic.as_ref()),
            "handler panicked\n{backtrace}"
        );

        ctx.abort();
        ctx.set_response(Response::new(Bytes::new()));
        ctx.status_text(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::from_fn;
    use http::header::CONTENT_TYPE;
    use http::Request;

    fn run(handlers: Vec<Arc<dyn Handler>>) -> Context {
        let mut ctx = Context::new(Request::new(Bytes::new()));
        ctx.push_handlers(handlers);
        ctx
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let mut ctx = run(vec![
            Recovery::new() as Arc<dyn Handler>,
            from_fn(|ctx| {
                Box::pin(async move {
                    ctx.header("x-partial", "yes").write("half a resp");
                    panic!("boom");
                })
            }),
        ]);
        ctx.next().await;

        assert_eq!(ctx.response_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.response_body(), b"Internal Server Error");
        assert!(ctx.response_headers().get("x-partial").is_none());
        assert!(ctx.response_headers().contains_key(CONTENT_TYPE));
        assert!(ctx.is_exhausted());
    }

    #[tokio::test]
    async fn test_no_panic_passes_through() {
        let mut ctx = run(vec![
            Recovery::new() as Arc<dyn Handler>,
            from_fn(|ctx| {
                Box::pin(async move {
                    ctx.status(StatusCode::CREATED).text("ok");
                })
            }),
        ]);
        ctx.next().await;

        assert_eq!(ctx.response_status(), StatusCode::CREATED);
        assert_eq!(ctx.response_body(), b"ok");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
