//! HTTP/1.0 (RFC 1945) request parsing and response writing

use crate::time::now_utc;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub use ::http::header::{self, HeaderMap, HeaderName, HeaderValue};
pub use ::http::{Method, StatusCode};

pub const HTTP_VERSION: &str = "HTTP/1.0";
/// Request line plus headers
pub const MAX_HEAD_BYTES: usize = 8 * 1024;
pub const SERVER_NAME: &str = concat!("generated-at/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request head exceeds 8 KiB")]
    HeadTooLarge,
    #[error("malformed request line '{0}'")]
    BadRequestLine(String),
    #[error("malformed header '{0}'")]
    BadHeader(String),
    #[error("connection closed before the request head was complete")]
    Closed,
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub major: u32,
    pub minor: u32,
    pub headers: HeaderMap,
}

impl Request {
    /// HTTP/0.9 `GET uri` request, answered with the bare entity body
    pub fn is_simple(&self) -> bool {
        self.major == 0 && self.minor == 9
    }

    /// Anything past HTTP/1.1 is closed without a response
    pub fn is_supported_version(&self) -> bool {
        self.major < 1 || (self.major == 1 && self.minor <= 1)
    }
}

/// Read one request head
pub async fn read_request<R>(reader: &mut R) -> Result<Request, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;

    // Leading empty lines are tolerated before the request line
    let line = loop {
        let line = read_line(reader, &mut budget).await?.ok_or(HttpError::Closed)?;
        if !line.is_empty() {
            break line;
        }
    };
    let mut request = parse_request_line(&line)?;
    trace!(uri = %request.uri, major = request.major, minor = request.minor, "Request line");

    if request.is_simple() {
        return Ok(request);
    }

    // Folded lines extend the pending header until the next one starts
    let mut pending: Option<(HeaderName, String)> = None;
    loop {
        let line = read_line(reader, &mut budget).await?.ok_or(HttpError::Closed)?;
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            let (_, value) = pending
                .as_mut()
                .ok_or_else(|| HttpError::BadHeader(line.clone()))?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::BadHeader(line.clone()))?;
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| HttpError::BadHeader(line.clone()))?;
        if let Some((name, value)) = pending.replace((name, value.trim().to_string())) {
            append_header(&mut request.headers, name, &value)?;
        }
    }
    if let Some((name, value)) = pending {
        append_header(&mut request.headers, name, &value)?;
    }

    Ok(request)
}

/// Repeated fields keep every value (RFC 1945 section 4.2)
fn append_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), HttpError> {
    let value = HeaderValue::from_bytes(value.as_bytes())
        .map_err(|_| HttpError::BadHeader(format!("{name}: {value}")))?;
    headers.append(name, value);
    Ok(())
}

/// Read a line without its terminator; `None` on clean EOF
async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<Option<String>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut buf)
        .await?;

    if !buf.ends_with(b"\n") {
        if n == *budget {
            return Err(HttpError::HeadTooLarge);
        }
        return if n == 0 { Ok(None) } else { Err(HttpError::Closed) };
    }
    *budget -= n;

    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| HttpError::BadRequestLine(String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

fn parse_request_line(line: &str) -> Result<Request, HttpError> {
    let bad = || HttpError::BadRequestLine(line.to_string());
    let parts: Vec<&str> = line.split(' ').collect();

    let (method, uri, major, minor) = match parts.as_slice() {
        ["GET", uri] => (Method::GET, *uri, 0, 9),
        [method, uri, version] => {
            let method = Method::from_bytes(method.as_bytes()).map_err(|_| bad())?;
            let (major, minor) = parse_version(version).ok_or_else(bad)?;
            (method, *uri, major, minor)
        }
        _ => return Err(bad()),
    };
    if uri.is_empty() {
        return Err(bad());
    }

    Ok(Request {
        method,
        uri: uri.to_string(),
        major,
        minor,
        headers: HeaderMap::new(),
    })
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.strip_prefix("HTTP/")?.split_once('.')?;
    Some((parse_version_number(major)?, parse_version_number(minor)?))
}

/// Digits only; numbers too large for `u32` saturate so they still compare as newer
fn parse_version_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse().unwrap_or(u32::MAX))
}

/// Reason phrase; RFC 1945 names 302 differently from later revisions
pub fn reason_phrase(status: StatusCode) -> &'static str {
    if status == StatusCode::FOUND {
        return "Moved Temporarily";
    }
    status.canonical_reason().unwrap_or("Unknown")
}

/// Content type by file extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// `Date` header value, RFC 1123 form
pub fn http_date() -> String {
    now_utc().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Plain-text response whose body is the reason phrase
    pub fn status_text(status: StatusCode) -> Self {
        Self::new(
            status,
            "text/plain; charset=utf-8",
            reason_phrase(status).as_bytes().to_vec(),
        )
    }

    pub fn redirect(location: &'static str) -> Self {
        let mut response = Self::status_text(StatusCode::MOVED_PERMANENTLY);
        response
            .headers
            .insert(header::LOCATION, HeaderValue::from_static(location));
        response
    }
}

/// How much of a response goes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Full,
    /// HEAD: status line and headers only
    HeadOnly,
    /// HTTP/0.9: entity body only
    BodyOnly,
}

impl WriteMode {
    pub fn for_request(request: &Request) -> Self {
        if request.is_simple() {
            WriteMode::BodyOnly
        } else if request.method == Method::HEAD {
            WriteMode::HeadOnly
        } else {
            WriteMode::Full
        }
    }
}

pub async fn write_response<W>(
    writer: &mut W,
    response: &Response,
    mode: WriteMode,
) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin,
{
    if mode != WriteMode::BodyOnly {
        let mut head = format!(
            "{HTTP_VERSION} {} {}\r\n",
            response.status.as_u16(),
            reason_phrase(response.status)
        )
        .into_bytes();
        let content_length = response.body.len().to_string();
        let fixed = [
            (header::DATE.as_str(), http_date()),
            (header::SERVER.as_str(), SERVER_NAME.to_string()),
            (header::CONTENT_LENGTH.as_str(), content_length),
        ];
        for (name, value) in &fixed {
            head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        for (name, value) in response.headers.iter() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        writer.write_all(&head).await?;
    }
    if mode != WriteMode::HeadOnly {
        writer.write_all(&response.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &[u8]) -> Result<Request, HttpError> {
        let mut reader = BufReader::new(raw);
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn test_parse_full_request() {
        let req = parse(b"GET /index.html HTTP/1.0\r\nUser-Agent: test\r\naccept: */*\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.uri, "/index.html");
        assert_eq!((req.major, req.minor), (1, 0));
        assert_eq!(req.headers.get("user-agent").unwrap(), "test");
        assert_eq!(req.headers.get("Accept").unwrap(), "*/*");
        assert_eq!(req.headers.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_simple_request() {
        let req = parse(b"GET /js/app.js\r\n").await.unwrap();
        assert!(req.is_simple());
        assert!(req.headers.is_empty());
        assert_eq!(WriteMode::for_request(&req), WriteMode::BodyOnly);
    }

    #[tokio::test]
    async fn test_parse_bare_newlines_and_folding() {
        let req = parse(b"\nHEAD / HTTP/1.1\nX-Long: first\n\tsecond\nHost: a\n\n")
            .await
            .unwrap();
        assert_eq!(req.method, Method::HEAD);
        assert_eq!((req.major, req.minor), (1, 1));
        assert_eq!(req.headers.get("x-long").unwrap(), "first second");
        assert_eq!(req.headers.get(header::HOST).unwrap(), "a");
        assert_eq!(WriteMode::for_request(&req), WriteMode::HeadOnly);
    }

    #[tokio::test]
    async fn test_repeated_headers_are_kept() {
        let req = parse(b"GET / HTTP/1.0\r\nAccept: text/html\r\naccept: */*\r\n\r\n")
            .await
            .unwrap();
        let values: Vec<_> = req
            .headers
            .get_all(header::ACCEPT)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, ["text/html", "*/*"]);
    }

    #[tokio::test]
    async fn test_extension_methods_kept() {
        let req = parse(b"DELETE /x HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(req.method, Method::DELETE);
        let req = parse(b"PURGE /x HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(req.method.as_str(), "PURGE");
    }

    #[tokio::test]
    async fn test_versions() {
        let req = parse(b"GET / HTTP/256.0\r\n\r\n").await.unwrap();
        assert_eq!((req.major, req.minor), (256, 0));
        assert!(!req.is_supported_version());

        let req = parse(b"GET / HTTP/99999999999.1\r\n\r\n").await.unwrap();
        assert_eq!(req.major, u32::MAX);
        assert!(!req.is_supported_version());

        let req = parse(b"GET / HTTP/1.2\r\n\r\n").await.unwrap();
        assert!(!req.is_supported_version());

        for raw in [&b"GET / HTTP/1.1\r\n\r\n"[..], b"GET / HTTP/1.0\r\n\r\n", b"GET /\r\n"] {
            assert!(parse(raw).await.unwrap().is_supported_version());
        }
    }

    #[tokio::test]
    async fn test_malformed_request_lines() {
        for raw in [
            &b"GET\r\n\r\n"[..],
            b"POST /only-two\r\n\r\n",
            b"GET / HTTP/x.y\r\n\r\n",
            b"GET / HTTP/1\r\n\r\n",
            b"GET / HTTP/+1.0\r\n\r\n",
            b"GET  / HTTP/1.0\r\n\r\n",
            b"G(T / HTTP/1.0\r\n\r\n",
        ] {
            assert!(
                matches!(parse(raw).await, Err(HttpError::BadRequestLine(_))),
                "{:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_header() {
        for raw in [
            &b"GET / HTTP/1.0\r\nno colon here\r\n\r\n"[..],
            b"GET / HTTP/1.0\r\n folded-first\r\n\r\n",
            b"GET / HTTP/1.0\r\nBad Name: x\r\n\r\n",
        ] {
            assert!(
                matches!(parse(raw).await, Err(HttpError::BadHeader(_))),
                "{:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[tokio::test]
    async fn test_truncated_head() {
        assert!(matches!(parse(b"").await, Err(HttpError::Closed)));
        assert!(matches!(
            parse(b"GET / HTTP/1.0\r\nHost: x\r\n").await,
            Err(HttpError::Closed)
        ));
        assert!(matches!(parse(b"GET / HTTP/1.0").await, Err(HttpError::Closed)));
    }

    #[tokio::test]
    async fn test_head_too_large() {
        let mut raw = b"GET / HTTP/1.0\r\n".to_vec();
        while raw.len() <= MAX_HEAD_BYTES {
            raw.extend_from_slice(b"X-Filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        raw.extend_from_slice(b"\r\n");
        assert!(matches!(parse(&raw).await, Err(HttpError::HeadTooLarge)));
    }

    #[tokio::test]
    async fn test_write_full_response() {
        let mut out = Vec::new();
        let response = Response::redirect("/index.html");
        write_response(&mut out, &response, WriteMode::Full).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 301 Moved Permanently\r\n"));
        assert!(text.contains("\r\nlocation: /index.html\r\n"));
        assert!(text.contains("\r\ncontent-length: 17\r\n"));
        assert!(text.contains("\r\ndate: "));
        assert!(text.contains("\r\nserver: generated-at/"));
        assert!(text.ends_with("\r\n\r\nMoved Permanently"));
    }

    #[tokio::test]
    async fn test_write_modes() {
        let response = Response::new(StatusCode::OK, "text/plain", b"hello".to_vec());

        let mut head = Vec::new();
        write_response(&mut head, &response, WriteMode::HeadOnly).await.unwrap();
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(head.contains("content-length: 5\r\n"));
        assert!(head.ends_with("\r\n\r\n"));

        let mut body = Vec::new();
        write_response(&mut body, &response, WriteMode::BodyOnly).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(reason_phrase(StatusCode::FOUND), "Moved Temporarily");
        assert_eq!(reason_phrase(StatusCode::NOT_FOUND), "Not Found");
        assert_eq!(reason_phrase(StatusCode::NOT_IMPLEMENTED), "Not Implemented");
        assert_eq!(reason_phrase(StatusCode::from_u16(599).unwrap()), "Unknown");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("pkg/generated_at_bg.wasm")), "application/wasm");
        assert_eq!(content_type(Path::new("a/B.JS")), "text/javascript; charset=utf-8");
        assert_eq!(content_type(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_http_date_shape() {
        let date = http_date();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), "Mon, 15 Jan 2024 10:30:00 GMT".len());
    }
}
