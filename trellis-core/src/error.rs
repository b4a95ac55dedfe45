//! Error types and result handling for Trellis.
//!
//! One error type covers the whole crate, from malformed WebSocket frames to
//! handler failures. Routing misses are deliberately absent from the dispatch
//! path: a path that matches nothing, or a method the matched pattern does not
//! serve, selects a fallback handler chain instead of producing an error. The
//! [`Error::RouteNotFound`] and [`Error::MethodNotAllowed`] variants only
//! surface from introspection calls such as [`Router::handlers`].
//!
//! # Error Categories
//!
//! - **Transport**: [`Error::Io`], [`Error::Frame`]
//! - **Connection lifecycle**: [`Error::Closed`], [`Error::AlreadyClosed`],
//!   [`Error::PingTimeout`], [`Error::NotPong`]
//! - **Upgrade**: [`Error::NotUpgrade`], [`Error::Hijack`]
//! - **Request handling**: [`Error::InvalidRequest`], [`Error::Json`],
//!   [`Error::Extractor`], [`Error::Handler`], [`Error::Custom`]
//!
//! # Examples
//!
//! ```
//! use trellis_core::Error;
//!
//! fn validate(name: &str) -> trellis_core::Result<()> {
//!     if name.is_empty() {
//!         return Err(Error::custom("name cannot be empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate("").is_err());
//! ```
//!
//! [`Router::handlers`]: crate::router::Router::handlers

use std::fmt;
use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::frame::{FrameError, Opcode};

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A WebSocket frame could not be decoded or written.
    ///
    /// Protocol violations (FIN not set, reserved bits, reserved opcodes) land
    /// here. The connection's message loop should close the connection.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The WebSocket connection is closed.
    ///
    /// Returned by reads and writes attempted after close, and by
    /// [`WebSocket::message`](crate::websocket::WebSocket::message) when the
    /// peer sent a Close frame or hung up. Message loops use
    /// [`Error::is_closed`] to exit cleanly on it.
    #[error("WebSocket connection closed")]
    Closed,

    /// [`WebSocket::close`](crate::websocket::WebSocket::close) was called on
    /// a connection that had already been closed. The socket is not touched.
    #[error("WebSocket connection already closed")]
    AlreadyClosed,

    /// No frame arrived within the ping deadline.
    #[error("Ping timed out after {0:?}")]
    PingTimeout(Duration),

    /// A frame other than Pong arrived while waiting for one.
    #[error("Expected pong, received {0:?}")]
    NotPong(Opcode),

    /// The request carries no `Upgrade: websocket` header or no key.
    #[error("Request is not a WebSocket upgrade")]
    NotUpgrade,

    /// The connection was already hijacked, or the context has none.
    #[error("Connection cannot be hijacked")]
    Hijack,

    /// Malformed HTTP request head or body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No registered pattern matches the path.
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// The path matched a pattern that has no handlers for the method.
    #[error("Method {method} not allowed for {pattern}")]
    MethodNotAllowed {
        /// The requested method.
        method: Method,
        /// The registered pattern that matched the path.
        pattern: String,
    },

    /// A typed handler argument could not be extracted from the context.
    #[error("Extractor error: {0}")]
    Extractor(String),

    /// Handler execution error.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Custom application-defined error.
    #[error("Custom error: {0}")]
    Custom(String),
}

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a custom error with the given message.
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Creates a handler error with the given message.
    pub fn handler<T: fmt::Display>(msg: T) -> Self {
        Error::Handler(msg.to_string())
    }

    /// Creates an extractor error with the given message.
    pub fn extractor<T: fmt::Display>(msg: T) -> Self {
        Error::Extractor(msg.to_string())
    }

    /// Returns `true` when the error means the WebSocket connection is gone.
    ///
    /// Covers an explicit close from either side and the peer hanging up
    /// mid-stream.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::Closed | Error::AlreadyClosed | Error::Frame(FrameError::Eof)
        )
    }

    /// Returns `true` for WebSocket protocol violations.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Frame(e) if e.is_protocol())
    }

    /// The HTTP status a handler failing with this error should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Json(_) | Error::Extractor(_) | Error::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotUpgrade => StatusCode::BAD_REQUEST,
            Error::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_error() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "Custom error: test error");
    }

    #[test]
    fn test_handler_error() {
        let err = Error::handler("handler failed");
        assert_eq!(err.to_string(), "Handler error: handler failed");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_extractor_error_is_bad_request() {
        let err = Error::extractor("missing field");
        assert_eq!(err.to_string(), "Extractor error: missing field");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_routing_errors() {
        let err = Error::RouteNotFound("/api/users".to_string());
        assert_eq!(err.to_string(), "Route not found: /api/users");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = Error::MethodNotAllowed {
            method: Method::POST,
            pattern: "/x".to_string(),
        };
        assert_eq!(err.to_string(), "Method POST not allowed for /x");
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_closed_classification() {
        assert!(Error::Closed.is_closed());
        assert!(Error::AlreadyClosed.is_closed());
        assert!(Error::Frame(FrameError::Eof).is_closed());
        assert!(!Error::Frame(FrameError::FinNotSet).is_closed());
        assert!(!Error::PingTimeout(Duration::from_secs(1)).is_closed());
    }

    #[test]
    fn test_protocol_classification() {
        assert!(Error::Frame(FrameError::RsvNotZero).is_protocol());
        assert!(Error::Frame(FrameError::ReservedOpcode(3)).is_protocol());
        assert!(!Error::Frame(FrameError::Eof).is_protocol());
        assert!(!Error::Closed.is_protocol());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
