//! HTTP/1.1 request reading and response writing.
//!
//! Just enough of HTTP/1.1 to drive the router over a raw byte stream:
//! request heads, `Content-Length` and chunked bodies, and keep-alive. Connections are
//! boxed behind [`Io`] so TCP streams and in-memory pipes are served alike,
//! and wrapped in a [`BufReader`] so bytes read past a request head stay
//! available to whoever takes over the connection after an upgrade.

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri, Version};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config::ServerConfig;

/// A bidirectional byte stream a connection can be served over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A served connection.
pub type Stream = BufReader<Box<dyn Io>>;

/// Wraps a connection for serving.
pub fn stream<T: Io>(io: T) -> Stream {
    BufReader::new(Box::new(io))
}

/// Why a request could not be read.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unsupported transfer-encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RequestError {
    /// Status to answer with before closing, if the peer is still there.
    pub fn status(&self) -> Option<http::StatusCode> {
        use http::StatusCode;
        match self {
            RequestError::HeadTooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            RequestError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            RequestError::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            RequestError::UnsupportedEncoding(_) => Some(StatusCode::NOT_IMPLEMENTED),
            RequestError::Io(_) => None,
        }
    }

    fn malformed(msg: impl Into<String>) -> Self {
        RequestError::Malformed(msg.into())
    }
}

impl From<RequestError> for crate::Error {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Io(e) => crate::Error::Io(e),
            other => crate::Error::InvalidRequest(other.to_string()),
        }
    }
}

/// Reads one request.
///
/// Returns `Ok(None)` when the peer closes the connection cleanly between
/// requests.
pub async fn read_request(
    stream: &mut Stream,
    config: &ServerConfig,
) -> Result<Option<Request<Bytes>>, RequestError> {
    let Some(head) = read_head(stream, config.max_header_bytes).await? else {
        return Ok(None);
    };
    let mut request = parse_head(&head)?;

    match body_kind(request.headers())? {
        BodyKind::Empty => {}
        BodyKind::Length(len) => {
            if len > config.max_body_bytes {
                return Err(RequestError::BodyTooLarge(config.max_body_bytes));
            }
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;
            *request.body_mut() = Bytes::from(body);
        }
        BodyKind::Chunked => {
            let body = read_chunked(stream, config).await?;
            let headers = request.headers_mut();
            headers.remove(TRANSFER_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            *request.body_mut() = body;
        }
    }

    Ok(Some(request))
}

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

enum BodyKind {
    Empty,
    Length(usize),
    Chunked,
}

/// Decodes a `Transfer-Encoding: chunked` body, trailers included.
///
/// Trailer fields are read and discarded; they count against
/// `max_header_bytes`.
async fn read_chunked(stream: &mut Stream, config: &ServerConfig) -> Result<Bytes, RequestError> {
    let mut body = BytesMut::new();

    loop {
        let line = read_line(stream, MAX_CHUNK_LINE).await?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| RequestError::malformed(format!("bad chunk size {size:?}")))?;
        if size == 0 {
            break;
        }

        let start = body.len();
        let end = start
            .checked_add(size)
            .filter(|&end| end <= config.max_body_bytes)
            .ok_or(RequestError::BodyTooLarge(config.max_body_bytes))?;
        body.resize(end, 0);
        stream.read_exact(&mut body[start..]).await?;

        if !read_line(stream, 0).await?.is_empty() {
            return Err(RequestError::malformed("chunk data longer than its size"));
        }
    }

    let mut trailers = 0;
    loop {
        let line = read_line(stream, config.max_header_bytes).await?;
        if line.is_empty() {
            return Ok(body.freeze());
        }
        trailers += line.len();
        if trailers > config.max_header_bytes {
            return Err(RequestError::HeadTooLarge(config.max_header_bytes));
        }
    }
}

/// Reads one line of at most `max` bytes, without its line break.
async fn read_line(stream: &mut Stream, max: usize) -> Result<String, RequestError> {
    let mut line = Vec::new();
    (&mut *stream)
        .take(max as u64 + 2)
        .read_until(b'\n', &mut line)
        .await?;

    if line.pop() != Some(b'\n') {
        return Err(RequestError::malformed("truncated or overlong line in chunked body"));
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| RequestError::malformed("chunked body line is not UTF-8"))
}

async fn read_head(stream: &mut Stream, max: usize) -> Result<Option<Vec<u8>>, RequestError> {
    let mut head = Vec::with_capacity(512);

    loop {
        let start = head.len();
        let budget = (max + 1).saturating_sub(start) as u64;
        let n = (&mut *stream).take(budget).read_until(b'\n', &mut head).await?;

        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(RequestError::malformed("connection closed mid-head"));
        }
        if head.len() > max {
            return Err(RequestError::HeadTooLarge(max));
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Stray line break before the request line.
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

fn parse_head(head: &[u8]) -> Result<Request<Bytes>, RequestError> {
    let text =
        std::str::from_utf8(head).map_err(|_| RequestError::malformed("request head is not UTF-8"))?;
    let mut lines = text.lines();

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::malformed(format!("bad request line {request_line:?}")));
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RequestError::malformed(format!("bad method {method:?}")))?;
    let uri: Uri = target
        .parse()
        .map_err(|_| RequestError::malformed(format!("bad request target {target:?}")))?;
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => return Err(RequestError::malformed(format!("unsupported version {other:?}"))),
    };

    let mut headers = HeaderMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RequestError::malformed(format!("bad header line {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| RequestError::malformed(format!("bad header name {name:?}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| RequestError::malformed(format!("bad value for header {name}")))?;
        headers.append(name, value);
    }

    let mut request = Request::new(Bytes::new());
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.version_mut() = version;
    *request.headers_mut() = headers;
    Ok(request)
}

fn body_kind(headers: &HeaderMap) -> Result<BodyKind, RequestError> {
    let mut codings = Vec::new();
    for value in headers.get_all(TRANSFER_ENCODING) {
        let value = value
            .to_str()
            .map_err(|_| RequestError::malformed("bad transfer-encoding"))?;
        codings.extend(value.split(',').map(str::trim).filter(|c| !c.is_empty()));
    }

    if !codings.is_empty() {
        if headers.contains_key(CONTENT_LENGTH) {
            return Err(RequestError::malformed(
                "both transfer-encoding and content-length present",
            ));
        }
        return match codings.as_slice() {
            [coding] if coding.eq_ignore_ascii_case("chunked") => Ok(BodyKind::Chunked),
            _ => Err(RequestError::UnsupportedEncoding(codings.join(", "))),
        };
    }

    match headers.get(CONTENT_LENGTH) {
        None => Ok(BodyKind::Empty),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(|len| if len == 0 { BodyKind::Empty } else { BodyKind::Length(len) })
            .ok_or_else(|| RequestError::malformed("bad content-length")),
    }
}

/// Whether the connection should stay open after answering `request`.
pub fn keep_alive<B>(request: &Request<B>) -> bool {
    let connection = request
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);

    match request.version() {
        Version::HTTP_10 => connection.is_some_and(|c| c.contains("keep-alive")),
        _ => !connection.is_some_and(|c| c.contains("close")),
    }
}

/// Serializes and flushes a response.
///
/// `Content-Length` and `Connection` are filled in unless already set. The
/// body is omitted for `HEAD` requests.
pub async fn write_response<W>(
    writer: &mut W,
    response: &Response<Bytes>,
    keep_alive: bool,
    head_only: bool,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let status = response.status();
    let body = response.body();
    let mut buf = BytesMut::with_capacity(256 + body.len());

    buf.put_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in response.headers() {
        put_header(&mut buf, name.as_str(), value.as_bytes());
    }
    if !response.headers().contains_key(CONTENT_LENGTH) {
        put_header(&mut buf, "content-length", body.len().to_string().as_bytes());
    }
    if !response.headers().contains_key(CONNECTION) {
        let value: &[u8] = if keep_alive { b"keep-alive" } else { b"close" };
        put_header(&mut buf, "connection", value);
    }
    buf.put_slice(b"\r\n");
    if !head_only {
        buf.put_slice(body);
    }

    writer.write_all(&buf).await?;
    writer.flush().await
}

fn put_header(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}
