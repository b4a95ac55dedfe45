//! Route registration, dispatch and serving.
//!
//! A [`Router`] maps `(method, pattern)` pairs to handler chains stored in a
//! [`Tree`]. Registration happens through a builder API before serving; once
//! the router is handed to [`Router::serve`] it is shared read-only across
//! connection tasks.
//!
//! # Chain assembly
//!
//! For every request the chain is assembled as:
//!
//! 1. the middlewares of each group whose `prefix + "/"` starts the request
//!    path, in registration order. The root group (prefix `""`) holds the
//!    middlewares added with [`Router::layer`] and always matches;
//! 2. the handlers registered for the matched pattern and method, or the
//!    [`no_method`](Router::no_method) chain when the pattern matched but the
//!    method did not, or the [`no_route`](Router::no_route) chain when nothing
//!    matched.
//!
//! Misses are ordinary control flow: the fallback chains answer `404 Not
//! Found` and `405 Method Not Allowed` (with an `Allow` header) by default.
//!
//! # Examples
//!
//! ```
//! use trellis_core::prelude::*;
//!
//! async fn index() -> &'static str {
//!     "index"
//! }
//!
//! async fn show(Path(id): Path<u64>) -> String {
//!     format!("user {id}")
//! }
//!
//! # async fn example() -> Result<()> {
//! let router = Router::new()
//!     .layer(Recovery::new())
//!     .layer(LoggerMiddleware::new())
//!     .get("/", handler(index))
//!     .group("/api", |api| api.get("/users/:id", handler(show)));
//!
//! router.listen("127.0.0.1:8080").await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::ALLOW;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::context::{Context, ContextPool};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::server::{self, keep_alive, read_request, write_response, Io};
use crate::state::AppState;
use crate::tree::{self, Node, Tree};

/// Methods registered by [`Router::any`], in registration order.
pub const ALL_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::OPTIONS,
    Method::HEAD,
    Method::CONNECT,
    Method::TRACE,
];

type Chain = Vec<Arc<dyn Handler>>;

/// Handler chains of one pattern, keyed by method in registration order.
#[derive(Default)]
pub struct MethodMap {
    entries: Vec<(Method, Chain)>,
}

impl MethodMap {
    /// Appends `handlers` to the chain for `method`, creating it if needed.
    pub fn append(&mut self, method: Method, handlers: impl IntoIterator<Item = Arc<dyn Handler>>) {
        match self.entries.iter_mut().find(|(m, _)| *m == method) {
            Some((_, chain)) => chain.extend(handlers),
            None => self.entries.push((method, handlers.into_iter().collect())),
        }
    }

    pub fn get(&self, method: &Method) -> Option<&[Arc<dyn Handler>]> {
        self.entries
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, chain)| chain.as_slice())
    }

    pub fn methods(&self) -> Vec<Method> {
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of matching a method and path against the routes.
pub enum Lookup<'a> {
    Found(&'a Node<MethodMap>, &'a [Arc<dyn Handler>]),
    NoMethod(&'a Node<MethodMap>),
    NoRoute,
}

struct GroupDef {
    prefix: String,
    match_prefix: String,
    middlewares: Chain,
}

impl GroupDef {
    fn new(prefix: String, middlewares: Chain) -> Self {
        let match_prefix = format!("{prefix}/");
        Self {
            prefix,
            match_prefix,
            middlewares,
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        path.starts_with(&self.match_prefix)
    }
}

/// A set of routes sharing a path prefix and middlewares.
///
/// Built by the closure passed to [`Router::group`]; groups nest.
pub struct Group {
    prefix: String,
    middlewares: Chain,
    routes: Vec<(Method, String, Chain)>,
    groups: Vec<Group>,
}

impl Group {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            middlewares: Vec::new(),
            routes: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Adds a middleware run for every request under this group's prefix.
    pub fn layer(mut self, middleware: Arc<dyn Handler>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn route(self, method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route_chain(method, pattern, [handler])
    }

    pub fn route_chain(
        mut self,
        method: Method,
        pattern: &str,
        handlers: impl IntoIterator<Item = Arc<dyn Handler>>,
    ) -> Self {
        self.routes
            .push((method, pattern.to_string(), handlers.into_iter().collect()));
        self
    }

    pub fn get(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::OPTIONS, pattern, handler)
    }

    pub fn any(mut self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        for method in ALL_METHODS {
            self = self.route(method, pattern, Arc::clone(&handler));
        }
        self
    }

    /// Nests a group under this one.
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(Group) -> Group,
    {
        self.groups.push(build(Group::new(prefix)));
        self
    }
}

/// Routes, groups and fallbacks for an HTTP service.
pub struct Router {
    tree: Tree<MethodMap>,
    groups: Vec<GroupDef>,
    no_route: Chain,
    no_method: Chain,
    state: AppState,
    config: ServerConfig,
    pool: ContextPool,
}

impl Router {
    pub fn new() -> Self {
        let config = ServerConfig::default();
        Self {
            tree: Tree::new(),
            groups: vec![GroupDef::new(String::new(), Vec::new())],
            no_route: vec![Arc::new(NotFound)],
            no_method: vec![Arc::new(NotAllowed)],
            state: AppState::new(),
            pool: ContextPool::new(config.context_pool_size),
            config,
        }
    }

    /// Adds a middleware to the root group. It runs for every request,
    /// including those answered by the fallback chains.
    pub fn layer(mut self, middleware: Arc<dyn Handler>) -> Self {
        self.groups[0].middlewares.push(middleware);
        self
    }

    pub fn route(self, method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route_chain(method, pattern, [handler])
    }

    /// Registers several handlers at once.
    ///
    /// Registering a pattern and method that already exist appends to the
    /// existing chain.
    pub fn route_chain(
        mut self,
        method: Method,
        pattern: &str,
        handlers: impl IntoIterator<Item = Arc<dyn Handler>>,
    ) -> Self {
        self.register(method, pattern, handlers.into_iter().collect());
        self
    }

    pub fn get(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.route(Method::OPTIONS, pattern, handler)
    }

    /// Registers `handler` for every method in [`ALL_METHODS`].
    pub fn any(mut self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        for method in ALL_METHODS {
            self.register(method, pattern, vec![Arc::clone(&handler)]);
        }
        self
    }

    /// Builds a group of routes under `prefix`.
    ///
    /// The group is flattened immediately: its routes are registered with the
    /// prefix prepended and its middlewares become a prefix-matched entry.
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(Group) -> Group,
    {
        let group = build(Group::new(prefix));
        self.flatten(String::new(), group);
        self
    }

    /// Replaces the chain run when no pattern matches.
    pub fn no_route(mut self, handler: Arc<dyn Handler>) -> Self {
        self.no_route = vec![handler];
        self
    }

    /// Replaces the chain run when a pattern matches but the method does not.
    pub fn no_method(mut self, handler: Arc<dyn Handler>) -> Self {
        self.no_method = vec![handler];
        self
    }

    /// Adds shared state, reachable through [`State`](crate::extractor::State).
    pub fn with_state<T: Send + Sync + 'static>(self, data: Arc<T>) -> Self {
        self.state.insert(data);
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.pool = ContextPool::new(config.context_pool_size);
        self.config = config;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree<MethodMap> {
        &self.tree
    }

    fn register(&mut self, method: Method, pattern: &str, handlers: Chain) {
        let pattern = normalize_pattern(pattern);
        debug!(%method, pattern = %pattern, handlers = handlers.len(), "route registered");
        self.tree
            .get_or_insert_with(&pattern, MethodMap::default)
            .append(method, handlers);
    }

    fn flatten(&mut self, parent: String, group: Group) {
        let prefix = format!("{parent}{}", group.prefix);
        if !group.middlewares.is_empty() {
            self.groups
                .push(GroupDef::new(prefix.clone(), group.middlewares));
        }
        for (method, pattern, handlers) in group.routes {
            let pattern = format!("{prefix}{}", normalize_pattern(&pattern));
            self.register(method, &pattern, handlers);
        }
        for nested in group.groups {
            self.flatten(prefix.clone(), nested);
        }
    }

    /// Matches `method` and `path` against the registered routes.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        let Some(node) = self.tree.search(path) else {
            return Lookup::NoRoute;
        };
        match node.value().and_then(|map| map.get(method)) {
            Some(handlers) => Lookup::Found(node, handlers),
            None => Lookup::NoMethod(node),
        }
    }

    /// Returns `(path matched, method registered)` for a request path.
    pub fn contains(&self, path: &str, method: &Method) -> (bool, bool) {
        match self.lookup(method, path) {
            Lookup::Found(..) => (true, true),
            Lookup::NoMethod(_) => (true, false),
            Lookup::NoRoute => (false, false),
        }
    }

    /// Methods registered for the pattern matching `path`; empty on a miss.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        self.tree
            .search(path)
            .and_then(Node::value)
            .map(MethodMap::methods)
            .unwrap_or_default()
    }

    /// The handlers registered for `path` and `method`, without middlewares.
    pub fn handlers(&self, path: &str, method: &Method) -> Result<&[Arc<dyn Handler>]> {
        match self.lookup(method, path) {
            Lookup::Found(_, handlers) => Ok(handlers),
            Lookup::NoMethod(node) => Err(Error::MethodNotAllowed {
                method: method.clone(),
                pattern: node.pattern().to_string(),
            }),
            Lookup::NoRoute => Err(Error::RouteNotFound(path.to_string())),
        }
    }

    /// Registered patterns in lookup order.
    pub fn patterns(&self) -> Vec<&str> {
        self.tree.patterns()
    }

    /// Assembles the chain for the request in `ctx` and runs it.
    pub async fn dispatch(&self, ctx: &mut Context) {
        let path = ctx.path().to_string();
        let method = ctx.method().clone();

        for group in self.groups.iter().filter(|g| g.applies_to(&path)) {
            ctx.push_handlers(group.middlewares.iter().cloned());
        }

        match self.lookup(&method, &path) {
            Lookup::Found(node, handlers) => {
                ctx.push_handlers(handlers.iter().cloned());
                ctx.set_route(node.pattern(), route_params(&path, node), allowed(node));
            }
            Lookup::NoMethod(node) => {
                ctx.push_handlers(self.no_method.iter().cloned());
                ctx.set_route(node.pattern(), route_params(&path, node), allowed(node));
            }
            Lookup::NoRoute => {
                ctx.push_handlers(self.no_route.iter().cloned());
            }
        }

        ctx.next().await;
    }

    /// Runs one request through the router without a connection.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let mut ctx = self.pool.acquire();
        ctx.prepare(request, self.state.clone(), self.config.websocket, None, None);
        self.dispatch(&mut ctx).await;
        let response = ctx.take_response();
        self.pool.release(ctx);
        response
    }

    /// Binds `addr` and serves connections until accepting fails.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from `listener`, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, routes = self.tree.endpoints().len(), "listening");

        let router = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            let router = Arc::clone(&router);

            tokio::spawn(async move {
                if let Err(err) = router.serve_connection(stream, Some(peer)).await {
                    if err.is_closed() {
                        debug!(%peer, "connection closed: {err}");
                    } else {
                        error!(%peer, "connection error: {err}");
                    }
                }
            });
        }
    }

    /// Serves HTTP/1.1 requests on one connection until it closes, times out
    /// while idle, or is hijacked by a handler.
    pub async fn serve_connection<T: Io>(&self, io: T, peer: Option<SocketAddr>) -> Result<()> {
        let mut stream = server::stream(io);

        loop {
            let read = read_request(&mut stream, &self.config);
            let result = tokio::time::timeout(self.config.read_timeout(), read).await;
            let request = match result {
                Err(_) => {
                    debug!(?peer, "idle connection timed out");
                    return Ok(());
                }
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(request))) => request,
                Ok(Err(err)) => {
                    if let Some(status) = err.status() {
                        debug!(?peer, status = status.as_u16(), "rejecting request: {err}");
                        let response = status_response(status);
                        write_response(&mut stream, &response, false, false).await?;
                        stream.shutdown().await?;
                    }
                    return Err(err.into());
                }
            };

            let keep_alive = keep_alive(&request);
            let head_only = request.method() == Method::HEAD;

            let mut ctx = self.pool.acquire();
            ctx.prepare(request, self.state.clone(), self.config.websocket, Some(stream), peer);
            self.dispatch(&mut ctx).await;

            let Some(returned) = ctx.take_stream() else {
                self.pool.release(ctx);
                return Ok(());
            };
            stream = returned;

            let response = ctx.take_response();
            self.pool.release(ctx);
            write_response(&mut stream, &response, keep_alive, head_only).await?;

            if !keep_alive {
                stream.shutdown().await?;
                return Ok(());
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns())
            .field("groups", &self.groups.iter().map(|g| &g.prefix).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn call(&self, ctx: &mut Context) {
        ctx.status_text(StatusCode::NOT_FOUND);
    }
}

struct NotAllowed;

#[async_trait]
impl Handler for NotAllowed {
    async fn call(&self, ctx: &mut Context) {
        if let Some(allow) = allow_header(ctx.allowed_methods()) {
            ctx.header(ALLOW, allow);
        }
        ctx.status_text(StatusCode::METHOD_NOT_ALLOWED);
    }
}

/// Formats methods as an `Allow` header value.
pub(crate) fn allow_header(methods: &[Method]) -> Option<HeaderValue> {
    let joined = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&joined).ok()
}

fn allowed(node: &Node<MethodMap>) -> Vec<Method> {
    node.value().map(MethodMap::methods).unwrap_or_default()
}

fn route_params(path: &str, node: &Node<MethodMap>) -> tree::Params {
    tree::parse_params(path, node.pattern())
        .into_iter()
        .map(|(name, raw)| {
            let value = percent_decode_str(&raw).decode_utf8_lossy().into_owned();
            (name, value)
        })
        .collect()
}

fn status_response(status: StatusCode) -> Response<Bytes> {
    let reason = status.canonical_reason().unwrap_or("");
    let mut response = Response::new(Bytes::from(reason));
    *response.status_mut() = status;
    response
}

fn normalize_pattern(pattern: &str) -> String {
    if pattern.starts_with('/') {
        pattern.to_string()
    } else {
        format!("/{pattern}")
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{from_fn, handler};
    use http::header::CONTENT_LENGTH;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    fn text(body: &'static str) -> Arc<dyn Handler> {
        from_fn(move |ctx| {
            Box::pin(async move {
                ctx.text(body);
            })
        })
    }

    fn request(method: Method, uri: &str) -> Request<Bytes> {
        let mut request = Request::new(Bytes::new());
        *request.method_mut() = method;
        *request.uri_mut() = uri.parse().unwrap();
        request
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Handler> {
        let log = Arc::clone(log);
        from_fn(move |ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(name.to_string());
                ctx.next().await;
            })
        })
    }

    #[tokio::test]
    async fn test_no_route_vs_no_method() {
        let router = Router::new().get("/x", text("x"));

        let response = router.handle(request(Method::POST, "/x")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");

        let response = router.handle(request(Method::GET, "/y")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(&response.body()[..], b"Not Found");

        assert!(matches!(router.lookup(&Method::POST, "/x"), Lookup::NoMethod(_)));
        assert!(matches!(router.lookup(&Method::GET, "/y"), Lookup::NoRoute));
    }

    #[tokio::test]
    async fn test_custom_fallbacks() {
        let router = Router::new()
            .get("/x", text("x"))
            .no_route(text("nothing here"))
            .no_method(text("wrong method"));

        let response = router.handle(request(Method::GET, "/nope")).await;
        assert_eq!(&response.body()[..], b"nothing here");

        let response = router.handle(request(Method::DELETE, "/x")).await;
        assert_eq!(&response.body()[..], b"wrong method");
    }

    #[tokio::test]
    async fn test_params_are_decoded() {
        let router = Router::new().get(
            "/files/*path",
            from_fn(|ctx| {
                Box::pin(async move {
                    let path = ctx.param("path").unwrap_or_default().to_string();
                    let pattern = ctx.pattern().to_string();
                    ctx.text(format!("{pattern} {path}"));
                })
            }),
        );

        let response = router
            .handle(request(Method::GET, "/files/a%20b/c"))
            .await;
        assert_eq!(&response.body()[..], b"/files/*path a b/c");
    }

    #[tokio::test]
    async fn test_route_chain_appends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route_chain(Method::GET, "/a", [recorder(&log, "first")])
            .get("/a", recorder(&log, "second"));

        assert_eq!(router.handlers("/a", &Method::GET).unwrap().len(), 2);
        router.handle(request(Method::GET, "/a")).await;
        assert_eq!(*log.lock().unwrap(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_group_middlewares_match_by_prefix() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .layer(recorder(&log, "root"))
            .group("/api", |api| {
                api.layer(recorder(&log, "api"))
                    .get("/users", recorder(&log, "users"))
                    .group("/admin", |admin| {
                        admin
                            .layer(recorder(&log, "admin"))
                            .get("/stats", recorder(&log, "stats"))
                    })
            })
            .get("/apiary", recorder(&log, "apiary"));

        router.handle(request(Method::GET, "/api/admin/stats")).await;
        assert_eq!(*log.lock().unwrap(), ["root", "api", "admin", "stats"]);

        log.lock().unwrap().clear();
        router.handle(request(Method::GET, "/apiary")).await;
        assert_eq!(*log.lock().unwrap(), ["root", "apiary"]);

        log.lock().unwrap().clear();
        let response = router.handle(request(Method::GET, "/api/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(*log.lock().unwrap(), ["root", "api"]);
    }

    #[tokio::test]
    async fn test_middleware_abort_skips_handler() {
        let guard = from_fn(|ctx| {
            Box::pin(async move {
                if ctx.headers().get("x-token").is_none() {
                    ctx.status_text(StatusCode::UNAUTHORIZED);
                    ctx.abort();
                }
            })
        });
        let router = Router::new().layer(guard).get("/secret", text("42"));

        let response = router.handle(request(Method::GET, "/secret")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut authorized = request(Method::GET, "/secret");
        authorized
            .headers_mut()
            .insert("x-token", HeaderValue::from_static("t"));
        let response = router.handle(authorized).await;
        assert_eq!(&response.body()[..], b"42");
    }

    #[test]
    fn test_introspection() {
        let router = Router::new()
            .get("/users/:id", text("show"))
            .delete("users/:id", text("delete"))
            .any("/ping", text("pong"));

        assert_eq!(router.contains("/users/1", &Method::GET), (true, true));
        assert_eq!(router.contains("/users/1", &Method::PUT), (true, false));
        assert_eq!(router.contains("/posts", &Method::GET), (false, false));
        assert_eq!(
            router.allowed_methods("/users/1"),
            vec![Method::GET, Method::DELETE]
        );
        assert_eq!(router.allowed_methods("/ping").len(), ALL_METHODS.len());
        assert!(router.allowed_methods("/posts").is_empty());

        assert!(matches!(
            router.handlers("/users/1", &Method::PUT),
            Err(Error::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            router.handlers("/posts", &Method::GET),
            Err(Error::RouteNotFound(_))
        ));
        assert_eq!(router.patterns(), vec!["/users/:id", "/ping"]);
    }

    #[tokio::test]
    async fn test_typed_handler_through_router() {
        async fn add(crate::extractor::Path(n): crate::extractor::Path<u32>) -> String {
            (n + 1).to_string()
        }
        let router = Router::new().get("/inc/:n", handler(add));

        let response = router.handle(request(Method::GET, "/inc/41")).await;
        assert_eq!(&response.body()[..], b"42");
    }

    #[tokio::test]
    async fn test_serve_connection_keep_alive() {
        let router = Router::new()
            .get("/hello", text("hi"))
            .head("/hello", text("hi"));
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { router.serve_connection(server, None).await });

        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\nHEAD /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap().unwrap();

        let first = out.find("HTTP/1.1 200 OK").unwrap();
        let second = out.rfind("HTTP/1.1 200 OK").unwrap();
        assert_ne!(first, second);
        assert!(out[..second].ends_with("\r\n\r\nhi"));
        assert!(out[second..].contains("connection: close\r\n"));
        assert!(out[second..].ends_with("\r\n\r\n"));
        assert_eq!(out.matches(CONTENT_LENGTH.as_str()).count(), 2);
    }

    #[tokio::test]
    async fn test_serve_connection_rejects_oversized_head() {
        let config = ServerConfig {
            max_header_bytes: 64,
            ..ServerConfig::default()
        };
        let router = Router::new().config(config).get("/", text("root"));
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { router.serve_connection(server, None).await });

        let long = format!("GET / HTTP/1.1\r\nX-Padding: {}\r\n\r\n", "p".repeat(128));
        client.write_all(long.as_bytes()).await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 431 "));
        assert!(task.await.unwrap().is_err());
    }
}
