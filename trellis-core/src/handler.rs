//! Handler trait and adapters.
//!
//! Everything in a chain, middleware and route handlers alike, is an
//! `Arc<dyn Handler>`. The adapters in this module turn ordinary functions
//! into handlers once, when a route is registered:
//!
//! | Adapter        | Accepts                                                        |
//! |----------------|----------------------------------------------------------------|
//! | [`from_fn`]    | `Fn(&mut Context) -> BoxFuture<'_, ()>`, full chain control    |
//! | [`handler`]    | `async fn` taking [`FromContext`] arguments, returning [`IntoResponse`] |
//! | [`service`]    | `Fn(http::Request<Bytes>) -> impl Future<Output = http::Response<Bytes>>` |
//!
//! # Examples
//!
//! ```
//! use trellis_core::prelude::*;
//!
//! async fn hello() -> &'static str {
//!     "hello"
//! }
//!
//! async fn user(Params(params): Params) -> Result<String> {
//!     let id = params.get("id").ok_or_else(|| Error::extractor("missing id"))?;
//!     Ok(format!("user {id}"))
//! }
//!
//! let router = Router::new()
//!     .get("/", handler(hello))
//!     .get("/users/:id", handler(user))
//!     .get("/raw", from_fn(|ctx| Box::pin(async move {
//!         ctx.text("raw");
//!     })));
//! # let _ = router;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::extractor::FromContext;

/// One entry of a handler chain.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut Context);
}

/// Writes a handler's return value into the response.
pub trait IntoResponse {
    fn into_response(self, ctx: &mut Context);
}

impl IntoResponse for () {
    fn into_response(self, _ctx: &mut Context) {}
}

impl IntoResponse for String {
    fn into_response(self, ctx: &mut Context) {
        ctx.text(self);
    }
}

impl IntoResponse for &'static str {
    fn into_response(self, ctx: &mut Context) {
        ctx.text(self);
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self, ctx: &mut Context) {
        Bytes::from(self).into_response(ctx);
    }
}

impl IntoResponse for Bytes {
    fn into_response(self, ctx: &mut Context) {
        if !ctx.response_headers().contains_key(CONTENT_TYPE) {
            ctx.header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        }
        ctx.write(self);
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self, ctx: &mut Context) {
        ctx.status(self);
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self, ctx: &mut Context) {
        ctx.status(self.0);
        self.1.into_response(ctx);
    }
}

impl IntoResponse for Response<Bytes> {
    fn into_response(self, ctx: &mut Context) {
        ctx.set_response(self);
    }
}

impl IntoResponse for Error {
    fn into_response(self, ctx: &mut Context) {
        let status = self.status_code();
        debug!(path = %ctx.path(), status = status.as_u16(), error = %self, "handler failed");
        ctx.status(status).text(self.to_string());
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self, ctx: &mut Context) {
        match self {
            Ok(value) => value.into_response(ctx),
            Err(err) => err.into_response(ctx),
        }
    }
}

/// Serializes the wrapped value as a JSON response body.
pub struct JsonResponse<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for JsonResponse<T> {
    fn into_response(self, ctx: &mut Context) {
        let written = ctx.json(&self.0).map(|_| ());
        if let Err(err) = written {
            // A value that fails to serialize is a 500, not a 400.
            let err = match err {
                Error::Json(e) => Error::handler(e),
                other => other,
            };
            err.into_response(ctx);
        }
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut Context) {
        (self.0)(ctx).await
    }
}

/// Wraps a closure with direct access to the context.
///
/// This is the form for middleware: the closure may call
/// [`Context::next`] or [`Context::abort`].
pub fn from_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Adapter produced by [`handler`] for an async function with extractor
/// arguments.
pub struct HandlerService<F, T> {
    handler: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> HandlerService<F, T> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

/// Functions that can be turned into a [`Handler`].
pub trait IntoHandler<T> {
    type Handler: Handler;

    fn into_handler(self) -> Self::Handler;
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler for HandlerService<F, ($($ty,)*)>
        where
            F: Fn($($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoResponse,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(&self, ctx: &mut Context) {
                $(
                    let $ty = match $ty::from_context(ctx) {
                        Ok(value) => value,
                        Err(err) => {
                            err.into_response(ctx);
                            return;
                        }
                    };
                )*

                let response = (self.handler)($($ty,)*).await;
                response.into_response(ctx);
            }
        }

        impl<F, Fut, Res, $($ty,)*> IntoHandler<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoResponse,
            $( $ty: FromContext + Send + 'static, )*
        {
            type Handler = HandlerService<F, ($($ty,)*)>;

            fn into_handler(self) -> Self::Handler {
                HandlerService::new(self)
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);

/// Wraps an async function whose arguments are extracted from the context.
pub fn handler<F, T>(f: F) -> Arc<dyn Handler>
where
    F: IntoHandler<T>,
{
    Arc::new(f.into_handler())
}

struct ServiceHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for ServiceHandler<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Bytes>> + Send + 'static,
{
    async fn call(&self, ctx: &mut Context) {
        let response = (self.0)(ctx.clone_request()).await;
        ctx.set_response(response);
    }
}

/// Wraps a plain `http` request-to-response function.
///
/// The function sees a copy of the request and its response replaces
/// whatever the chain wrote before it.
pub fn service<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Bytes>> + Send + 'static,
{
    Arc::new(ServiceHandler(f))
}
