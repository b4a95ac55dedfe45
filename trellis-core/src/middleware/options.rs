//! Automatic `OPTIONS` responses.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::ALLOW;
use http::{Method, StatusCode};

use crate::context::Context;
use crate::handler::Handler;
use crate::router::allow_header;

/// Answers every `OPTIONS` request itself.
///
/// When the path matches a registered pattern the response is `204 No
/// Content` with an `Allow` header listing the pattern's methods; otherwise
/// it is `404 Not Found`. The rest of the chain does not run for `OPTIONS`
/// requests, so routes registered with [`Router::options`](crate::Router::options)
/// are shadowed by this middleware.
#[derive(Debug, Default)]
pub struct AutoOptions;

impl AutoOptions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Handler for AutoOptions {
    async fn call(&self, ctx: &mut Context) {
        if ctx.method() != Method::OPTIONS {
            ctx.next().await;
            return;
        }

        match allow_header(ctx.allowed_methods()) {
            Some(allow) if !ctx.allowed_methods().is_empty() => {
                ctx.status(StatusCode::NO_CONTENT).header(ALLOW, allow);
            }
            _ => {
                ctx.status_text(StatusCode::NOT_FOUND);
            }
        }
        ctx.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::from_fn;
    use crate::Router;
    use bytes::Bytes;
    use http::Request;

    fn request(method: Method, uri: &str) -> Request<Bytes> {
        let mut request = Request::new(Bytes::new());
        *request.method_mut() = method;
        *request.uri_mut() = uri.parse().unwrap();
        request
    }

    fn router() -> Router {
        let ok = from_fn(|ctx| {
            Box::pin(async move {
                ctx.text("ok");
            })
        });
        Router::new()
            .layer(AutoOptions::new())
            .get("/items", Arc::clone(&ok))
            .post("/items", ok)
    }

    #[tokio::test]
    async fn test_options_lists_methods() {
        let response = router().handle(request(Method::OPTIONS, "/items")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ALLOW], "GET, POST");
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_options_unknown_path() {
        let response = router().handle(request(Method::OPTIONS, "/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_other_methods_pass_through() {
        let response = router().handle(request(Method::GET, "/items")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"ok");
    }
}
