//! Per-request context and handler chain execution.
//!
//! A [`Context`] carries one request through its handler chain: the matched
//! route, the bound parameters, the response being built, and a cursor into
//! the ordered list of handlers (group middlewares first, then the route's
//! own handlers or a fallback).
//!
//! # Chain Control
//!
//! The cursor starts at `-1`. [`Context::next`] advances it and runs every
//! remaining handler in order. A handler that calls `next` itself runs the
//! rest of the chain inline and regains control afterwards, which is how
//! middleware wraps the downstream chain:
//!
//! ```
//! use std::time::Instant;
//! use trellis_core::prelude::*;
//!
//! let timing = from_fn(|ctx| {
//!     Box::pin(async move {
//!         let start = Instant::now();
//!         ctx.next().await;
//!         tracing::info!(elapsed = ?start.elapsed(), "request done");
//!     })
//! });
//! # let _ = timing;
//! ```
//!
//! [`Context::abort`] moves the cursor past the end, so nothing else runs even
//! while an enclosing `next` loop is still iterating. [`Context::reset`] puts
//! the cursor back to `-1`.
//!
//! # Pooling
//!
//! Contexts are recycled through a [`ContextPool`]. [`Context::recycle`] is
//! the explicit reset contract: cursor back to `-1`, handler list emptied,
//! request, response and connection dropped.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::warn;

use crate::config::WebSocketConfig;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::server::Stream;
use crate::state::AppState;
use crate::tree::Params;

/// The state of one in-flight request.
pub struct Context {
    request: Request<Bytes>,
    peer: Option<SocketAddr>,
    pattern: String,
    params: Params,
    allowed: Vec<Method>,

    handlers: Vec<Arc<dyn Handler>>,
    index: isize,

    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,

    state: AppState,
    stream: Option<Stream>,
    hijacked: bool,
    ws_config: WebSocketConfig,
}

impl Context {
    /// Creates a context for `request` with an empty handler chain.
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            peer: None,
            pattern: String::new(),
            params: Params::new(),
            allowed: Vec::new(),
            handlers: Vec::new(),
            index: -1,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            state: AppState::new(),
            stream: None,
            hijacked: false,
            ws_config: WebSocketConfig::default(),
        }
    }

    /// Runs the remaining handlers, starting after the current one.
    pub async fn next(&mut self) {
        self.index += 1;
        while let Some(handler) = self.handler_at(self.index) {
            handler.call(self).await;
            self.index += 1;
        }
    }

    /// Stops the chain: no further handler runs.
    pub fn abort(&mut self) {
        self.index = self.handlers.len() as isize;
    }

    /// Rewinds the cursor so the next [`next`](Self::next) starts over.
    pub fn reset(&mut self) {
        self.index = -1;
    }

    /// Returns `true` once no handler is left to run.
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.handlers.len() as isize
    }

    /// Position of the handler currently running, `-1` before the chain starts.
    pub fn index(&self) -> isize {
        self.index
    }

    /// Appends handlers to the chain.
    pub fn push_handlers<I>(&mut self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        self.handlers.extend(handlers);
    }

    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    fn handler_at(&self, index: isize) -> Option<Arc<dyn Handler>> {
        let index = usize::try_from(index).ok()?;
        self.handlers.get(index).cloned()
    }

    /// Clears everything request-specific so the context can be reused.
    pub fn recycle(&mut self) {
        self.request = Request::new(Bytes::new());
        self.peer = None;
        self.pattern.clear();
        self.params.clear();
        self.allowed.clear();
        self.handlers.clear();
        self.index = -1;
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
        self.stream = None;
        self.hijacked = false;
    }

    pub(crate) fn prepare(
        &mut self,
        request: Request<Bytes>,
        state: AppState,
        ws_config: WebSocketConfig,
        stream: Option<Stream>,
        peer: Option<SocketAddr>,
    ) {
        self.request = request;
        self.state = state;
        self.ws_config = ws_config;
        self.stream = stream;
        self.peer = peer;
    }

    pub(crate) fn set_route(&mut self, pattern: &str, params: Params, allowed: Vec<Method>) {
        self.pattern.push_str(pattern);
        self.params = params;
        self.allowed = allowed;
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Copies the request out, body included.
    pub fn clone_request(&self) -> Request<Bytes> {
        let mut request = Request::new(self.request.body().clone());
        *request.method_mut() = self.request.method().clone();
        *request.uri_mut() = self.request.uri().clone();
        *request.version_mut() = self.request.version();
        *request.headers_mut() = self.request.headers().clone();
        request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The registered pattern that matched, empty when no route matched.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Methods registered for the matched pattern, in registration order.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.request.uri().query()?;
        query_pairs(query)
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Shared state of type `T` registered on the router.
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.state.get::<T>()
    }

    pub fn app_state(&self) -> &AppState {
        &self.state
    }

    /// Stores a per-request value, visible to later handlers in the chain.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.request.extensions_mut().insert(value);
    }

    /// A per-request value stored by an earlier handler.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.request.extensions().get::<T>()
    }

    pub fn ws_config(&self) -> WebSocketConfig {
        self.ws_config
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Sets a response header. Invalid names or values are logged and skipped.
    pub fn header<K, V>(&mut self, name: K, value: V) -> &mut Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(path = %self.path(), "ignoring invalid response header"),
        }
        self
    }

    /// Appends bytes to the response body.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.body.extend_from_slice(data.as_ref());
        self
    }

    /// Writes a plain-text body.
    pub fn text(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.default_content_type("text/plain; charset=utf-8");
        self.write(text.as_ref().as_bytes())
    }

    /// Writes `value` as a JSON body.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let bytes = serde_json::to_vec(value)?;
        self.default_content_type("application/json");
        Ok(self.write(bytes))
    }

    /// Sets `status` and writes its canonical reason phrase as the body.
    pub fn status_text(&mut self, status: StatusCode) -> &mut Self {
        self.status(status);
        self.text(status.canonical_reason().unwrap_or(status.as_str()))
    }

    pub fn redirect(&mut self, status: StatusCode, location: &str) -> &mut Self {
        self.status(status).header(LOCATION, location)
    }

    /// Replaces the response built so far.
    pub fn set_response(&mut self, response: Response<Bytes>) {
        let (parts, body) = response.into_parts();
        self.status = parts.status;
        self.headers = parts.headers;
        self.body.clear();
        self.body.extend_from_slice(&body);
    }

    pub fn response_status(&self) -> StatusCode {
        self.status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_body(&self) -> &[u8] {
        &self.body
    }

    /// Takes the response out, leaving an empty `200 OK` behind.
    pub fn take_response(&mut self) -> Response<Bytes> {
        let mut response = Response::new(self.body.split().freeze());
        *response.status_mut() = std::mem::replace(&mut self.status, StatusCode::OK);
        *response.headers_mut() = std::mem::take(&mut self.headers);
        response
    }

    fn default_content_type(&mut self, value: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(value));
        }
    }

    /// Takes the underlying connection away from the server.
    ///
    /// After a successful hijack the server writes nothing to the
    /// connection, the response built in this context included.
    pub fn hijack(&mut self) -> Result<Stream> {
        let stream = self.stream.take().ok_or(Error::Hijack)?;
        self.hijacked = true;
        Ok(stream)
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    pub(crate) fn take_stream(&mut self) -> Option<Stream> {
        self.stream.take()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.method())
            .field("path", &self.path())
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .field("index", &self.index)
            .field("handlers", &self.handlers.len())
            .field("status", &self.status)
            .finish()
    }
}

/// Splits a query string into percent-decoded key/value pairs.
pub(crate) fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_form(key), decode_form(value))
        })
        .collect()
}

fn decode_form(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// A free list of contexts.
///
/// Released contexts are recycled before they are stored; at most
/// `capacity` are kept.
pub struct ContextPool {
    free: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// A recycled context, or a fresh one when the pool is empty.
    pub fn acquire(&self) -> Context {
        self.lock()
            .pop()
            .unwrap_or_else(|| Context::new(Request::new(Bytes::new())))
    }

    pub fn release(&self, mut ctx: Context) {
        ctx.recycle();
        let mut free = self.lock();
        if free.len() < self.capacity {
            free.push(ctx);
        }
    }

    /// Number of contexts waiting for reuse.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Context>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}
