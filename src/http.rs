//! HTTP boundary.
//!
//! Thin adapter between the wire and the dispatcher: decode one base64 form
//! field into a byte blob, hand it to the core, encode the answer. Form
//! bodies may be urlencoded or multipart, capped at 1 MiB. Any decode error
//! becomes a 500 with the message as plain text; unknown routes answer 404.

use crate::discovery::Discovery;
use crate::router::FrameDispatcher;
use crate::types::{HTTP_SHUTDOWN_GRACE_SECS, INPUT_BUFFER_SIZE};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_HEADER_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Malformed(&'static str),
    #[error("bad base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("missing form field {0}")]
    MissingField(&'static str),
    #[error("request body exceeds {INPUT_BUFFER_SIZE} bytes")]
    BodyTooLarge,
}

struct Request {
    method: String,
    path: String,
    content_type: String,
    body: Vec<u8>,
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Self { status: 200, content_type, body }
    }

    fn not_found() -> Self {
        Self { status: 404, content_type: "text/plain", body: b"wrong request".to_vec() }
    }

    fn error(message: String) -> Self {
        Self { status: 500, content_type: "text/plain", body: message.into_bytes() }
    }
}

/// The running listener. `stop` closes the accept loop and gives in-flight
/// handlers a one-second grace period.
pub struct HttpHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl HttpHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(Duration::from_secs(HTTP_SHUTDOWN_GRACE_SECS), self.task)
            .await
            .is_err()
        {
            warn!("http listener did not stop within the grace period");
        }
    }
}

pub struct HttpTransport {
    dispatcher: Arc<FrameDispatcher>,
    discovery: Arc<Discovery>,
}

impl HttpTransport {
    pub fn new(dispatcher: Arc<FrameDispatcher>, discovery: Arc<Discovery>) -> Self {
        Self { dispatcher, discovery }
    }

    /// Bind and start serving. Port 0 picks an ephemeral port (tests).
    pub async fn start(&self, port: u16) -> std::io::Result<HttpHandle> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("http listening on {}", local_addr);

        let (shutdown, mut stop_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let discovery = self.discovery.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let dispatcher = dispatcher.clone();
                                let discovery = discovery.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, peer, dispatcher, discovery).await;
                                });
                            }
                            Err(e) => {
                                warn!("accept error: {}", e);
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        info!("http listener stopping");
                        break;
                    }
                }
            }
        });

        Ok(HttpHandle { shutdown, task, local_addr })
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<FrameDispatcher>,
    discovery: Arc<Discovery>,
) {
    let response = match read_request(&mut stream).await {
        Ok(request) => {
            debug!("{} {} {} from {}", request.method, request.path, request.body.len(), peer);
            match route(&request, &dispatcher, &discovery) {
                Ok(response) => response,
                Err(e) => Response::error(e.to_string()),
            }
        }
        Err(e) => Response::error(e.to_string()),
    };

    if let Err(e) = write_response(&mut stream, &response).await {
        debug!("write to {} failed: {}", peer, e);
    }
}

fn route(
    request: &Request,
    dispatcher: &Arc<FrameDispatcher>,
    discovery: &Arc<Discovery>,
) -> Result<Response, HttpError> {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/api/w") => {
            let batch = decode_field(request)?;
            dispatcher.process_write_batch(&batch);
            Ok(Response::ok("text/plain", Vec::new()))
        }
        ("POST", "/api/r") => {
            let payload = decode_field(request)?;
            let answer = dispatcher
                .registry()
                .read_request(&payload)
                .ok_or(HttpError::Malformed("wrong read request size"))?;
            Ok(Response::ok("text/plain", B64.encode(answer).into_bytes()))
        }
        ("POST", "/api/d") => {
            let batch = decode_field(request)?;
            let answer = dispatcher.process_batch(&batch).unwrap_or_default();
            Ok(Response::ok("text/plain", B64.encode(answer).into_bytes()))
        }
        ("GET", "/api/n") => Ok(Response::ok("application/json", discovery.state_json())),
        ("GET", "/api/debug") => Ok(Response::ok(
            "application/json",
            dispatcher.registry().debug_snapshot().to_vec(),
        )),
        _ => Ok(Response::not_found()),
    }
}

/// Pull form field `d` out of the request and base64-decode it.
fn decode_field(request: &Request) -> Result<Vec<u8>, HttpError> {
    let encoded = form_field(&request.content_type, &request.body, "d")?;
    Ok(B64.decode(encoded.as_bytes())?)
}

async fn read_request(stream: &mut TcpStream) -> Result<Request, HttpError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
            break pos;
        }
        if buffer.len() > MAX_HEADER_SIZE {
            return Err(HttpError::Malformed("request headers too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Malformed("connection closed mid-request"));
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let header_text = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| HttpError::Malformed("request headers are not utf-8"))?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or(HttpError::Malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(HttpError::Malformed("missing method"))?
        .to_string();
    let target = parts.next().ok_or(HttpError::Malformed("missing request target"))?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0usize;
    let mut content_type = String::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| HttpError::Malformed("bad content-length"))?;
            }
            "content-type" => content_type = value.trim().to_string(),
            _ => {}
        }
    }
    if content_length > INPUT_BUFFER_SIZE {
        return Err(HttpError::BodyTooLarge);
    }

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Malformed("connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Request { method, path, content_type, body })
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> std::io::Result<()> {
    let reason = match response.status {
        200 => "OK",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason,
        response.content_type,
        response.body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

// =============================================================================
// FORM PARSING
// =============================================================================

fn form_field(content_type: &str, body: &[u8], name: &'static str) -> Result<String, HttpError> {
    let kind = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match kind.as_str() {
        "" | "application/x-www-form-urlencoded" => urlencoded_field(body, name),
        "multipart/form-data" => {
            let boundary = content_type
                .split(';')
                .find_map(|p| p.trim().strip_prefix("boundary="))
                .map(|b| b.trim_matches('"'))
                .ok_or(HttpError::Malformed("missing multipart boundary"))?;
            multipart_field(body, boundary, name)
        }
        _ => Err(HttpError::Malformed("unsupported content type")),
    }
}

fn urlencoded_field(body: &[u8], name: &'static str) -> Result<String, HttpError> {
    let text =
        std::str::from_utf8(body).map_err(|_| HttpError::Malformed("form body is not utf-8"))?;
    for pair in text.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(key)? == name.as_bytes() {
            return String::from_utf8(percent_decode(value)?)
                .map_err(|_| HttpError::Malformed("form value is not utf-8"));
        }
    }
    Err(HttpError::MissingField(name))
}

fn percent_decode(input: &str) -> Result<Vec<u8>, HttpError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
                let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                    _ => return Err(HttpError::Malformed("bad percent escape")),
                }
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn multipart_field(body: &[u8], boundary: &str, name: &'static str) -> Result<String, HttpError> {
    let marker = format!("--{boundary}").into_bytes();
    let mut cursor = find_subsequence(body, &marker)
        .ok_or(HttpError::Malformed("multipart boundary not found"))?
        + marker.len();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            break;
        }
        let part = rest
            .strip_prefix(b"\r\n")
            .ok_or(HttpError::Malformed("malformed multipart part"))?;
        let head_end = find_subsequence(part, b"\r\n\r\n")
            .ok_or(HttpError::Malformed("multipart part without headers"))?;
        let headers = std::str::from_utf8(&part[..head_end])
            .map_err(|_| HttpError::Malformed("multipart headers are not utf-8"))?;
        let content_start = head_end + 4;
        let content_len = find_subsequence(&part[content_start..], &marker)
            .ok_or(HttpError::Malformed("unterminated multipart part"))?;
        let content = &part[content_start..content_start + content_len];
        let content = content.strip_suffix(b"\r\n").unwrap_or(content);

        if part_name(headers) == Some(name) {
            return String::from_utf8(content.to_vec())
                .map_err(|_| HttpError::Malformed("form value is not utf-8"));
        }

        cursor += 2 + content_start + content_len + marker.len();
    }

    Err(HttpError::MissingField(name))
}

fn part_name(headers: &str) -> Option<&str> {
    let disposition = headers
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition"))?;
    disposition
        .split(';')
        .find_map(|param| param.trim().strip_prefix("name=\""))
        .and_then(|value| value.strip_suffix('"'))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%2Bb+c").unwrap(), b"a+b c");
        assert_eq!(percent_decode("plain").unwrap(), b"plain");
        assert!(percent_decode("bad%2").is_err());
    }

    #[test]
    fn test_urlencoded_field() {
        let body = b"x=1&d=aGVsbG8%3D&y=2";
        assert_eq!(urlencoded_field(body, "d").unwrap(), "aGVsbG8=");
        assert!(matches!(urlencoded_field(body, "z"), Err(HttpError::MissingField("z"))));
    }

    #[test]
    fn test_multipart_field() {
        let body = b"--XX\r\nContent-Disposition: form-data; name=\"d\"\r\n\r\nVALUE\r\n--XX--\r\n";
        let ct = "multipart/form-data; boundary=XX";
        assert_eq!(form_field(ct, body, "d").unwrap(), "VALUE");
    }

    #[test]
    fn test_multipart_second_part() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--B\r\nContent-Disposition: form-data; name=\"d\"\r\n\r\n2\r\n--B--\r\n";
        let ct = "multipart/form-data; boundary=B";
        assert_eq!(form_field(ct, body, "d").unwrap(), "2");
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find_subsequence(b"abcdef", b"cd"), Some(2));
        assert_eq!(find_subsequence(b"abcdef", b"xy"), None);
    }
}
