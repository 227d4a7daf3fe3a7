//! Connection dispatch and the RFC 6455 opening handshake.
//!
//! Grounded directly in `websockets.c`'s `webSocketsCheck` (the four-byte
//! peek that tells a WebSocket upgrade apart from a raw client, a Flash
//! cross-domain-policy probe, and a TLS ClientHello) and `webSocketsHandshake`
//! (the line-oriented header reader and the Sec-WebSocket-Accept /
//! subprotocol negotiation). The accept-token computation follows the
//! `sha1`/`base64` idiom used for the same purpose in the retrieved
//! `socket-flow` handshake module.

use std::time::Duration;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::Config;
use crate::error::HandshakeError;
use crate::session::Session;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Byte-exact legacy Flash cross-domain-policy response, per
/// `websockets.c`'s `FLASH_POLICY_RESPONSE` macro and `spec.md §6`. No XML
/// declaration or DOCTYPE — Flash's policy-file loader expects exactly this
/// single-line document.
const FLASH_POLICY_RESPONSE: &[u8] =
  b"<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\" /></cross-domain-policy>\n";

/// Outcome of peeking the first bytes of a fresh connection, per
/// `spec.md §4.1` step 1.
enum Prefix {
  Http,
  FlashPolicy,
  TlsClientHello,
}

fn classify(first: u8) -> Prefix {
  match first {
    b'<' => Prefix::FlashPolicy,
    0x16 | 0x80 => Prefix::TlsClientHello,
    _ => Prefix::Http,
  }
}

/// A stream that replays a short prefix of already-consumed bytes ahead of
/// further reads from the wrapped stream. Stands in for the non-consuming
/// socket peek (`MSG_PEEK`) the original implementation uses, since a
/// generic [`AsyncRead`] offers no such primitive.
pub struct PeekPrefixed<S> {
  prefix: Vec<u8>,
  prefix_pos: usize,
  inner: S,
}

impl<S> PeekPrefixed<S> {
  fn new(prefix: Vec<u8>, inner: S) -> Self {
    Self {
      prefix,
      prefix_pos: 0,
      inner,
    }
  }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekPrefixed<S> {
  fn poll_read(
    mut self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    if self.prefix_pos < self.prefix.len() {
      let remaining = &self.prefix[self.prefix_pos..];
      let n = remaining.len().min(buf.remaining());
      buf.put_slice(&remaining[..n]);
      self.prefix_pos += n;
      return std::task::Poll::Ready(Ok(()));
    }
    std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
  }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekPrefixed<S> {
  fn poll_write(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &[u8],
  ) -> std::task::Poll<std::io::Result<usize>> {
    std::pin::Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
  }

  fn poll_flush(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.get_mut().inner).poll_flush(cx)
  }

  fn poll_shutdown(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
  }
}

#[cfg(feature = "tls")]
pub enum MaybeTlsStream<S> {
  Plain(PeekPrefixed<S>),
  Tls(Box<tokio_rustls::server::TlsStream<PeekPrefixed<S>>>),
}

#[cfg(not(feature = "tls"))]
pub enum MaybeTlsStream<S> {
  Plain(PeekPrefixed<S>),
}

#[cfg(feature = "tls")]
impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
  fn poll_read(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
      MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
    }
  }
}

#[cfg(not(feature = "tls"))]
impl<S: AsyncRead + Unpin> AsyncRead for MaybeTlsStream<S> {
  fn poll_read(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
    }
  }
}

#[cfg(feature = "tls")]
impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
  fn poll_write(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &[u8],
  ) -> std::task::Poll<std::io::Result<usize>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
      MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
    }
  }

  fn poll_flush(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
      MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
    }
  }

  fn poll_shutdown(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
      MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
    }
  }
}

#[cfg(not(feature = "tls"))]
impl<S: AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
  fn poll_write(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &[u8],
  ) -> std::task::Poll<std::io::Result<usize>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
    }
  }

  fn poll_flush(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
    }
  }

  fn poll_shutdown(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    match self.get_mut() {
      MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
    }
  }
}

struct Request {
  path: String,
  host: String,
  has_origin: bool,
  key: String,
  version_present: bool,
  protocol: Option<String>,
}

fn accept_token(key: &str) -> String {
  let mut sha1 = Sha1::new();
  sha1.update(key.as_bytes());
  sha1.update(GUID.as_bytes());
  base64::engine::general_purpose::STANDARD.encode(sha1.finalize())
}

fn parse_request(raw: &str) -> Result<Request, HandshakeError> {
  let mut lines = raw.split("\r\n");
  let request_line = lines
    .next()
    .ok_or(HandshakeError::MalformedRequest("missing request line"))?;

  let mut parts = request_line.split_whitespace();
  let method = parts
    .next()
    .ok_or(HandshakeError::MalformedRequest("empty request line"))?;
  if method != "GET" {
    return Err(HandshakeError::MalformedRequest("expected GET"));
  }
  let path = parts
    .next()
    .ok_or(HandshakeError::MalformedRequest("missing request path"))?
    .to_string();

  let mut host = None;
  let mut has_origin = false;
  let mut key = None;
  let mut version_present = false;
  let mut protocol = None;

  for line in lines {
    if line.is_empty() {
      break;
    }
    let Some((name, value)) = line.split_once(':') else {
      continue;
    };
    let name = name.trim();
    let value = value.trim();
    if name.eq_ignore_ascii_case("Host") {
      host = Some(value.to_string());
    } else if name.eq_ignore_ascii_case("Origin") || name.eq_ignore_ascii_case("Sec-WebSocket-Origin") {
      has_origin = true;
    } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
      key = Some(value.to_string());
    } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
      version_present = !value.is_empty() && value != "0";
    } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
      protocol = Some(value.to_string());
    }
  }

  let host = host.ok_or(HandshakeError::MalformedRequest("missing Host header"))?;
  if !has_origin {
    return Err(HandshakeError::MalformedRequest(
      "missing Origin / Sec-WebSocket-Origin header",
    ));
  }
  let key = key.ok_or(HandshakeError::MalformedRequest(
    "missing Sec-WebSocket-Key header",
  ))?;
  if !version_present {
    return Err(HandshakeError::HixieNotSupported);
  }

  Ok(Request {
    path,
    host,
    has_origin,
    key,
    version_present,
    protocol,
  })
}

/// Negotiated subprotocol, per `webSocketsHandshake`'s protocol string
/// inspection: a client offering "binary" gets raw binary frames; anything
/// else gets the legacy Base64-over-TEXT subprotocol, named "base64" in the
/// response if the client asked for it by name, or left unnamed (empty)
/// otherwise.
fn negotiate_subprotocol(requested: Option<&str>) -> (bool, Option<&'static str>) {
  match requested {
    Some(p) if p.contains("binary") => (false, Some("binary")),
    Some(p) if p.contains("base64") => (true, Some("base64")),
    _ => (true, None),
  }
}

async fn read_header_block<S>(
  io: &mut S,
  cfg: &Config,
) -> Result<(Vec<u8>, String), HandshakeError>
where
  S: AsyncRead + Unpin,
{
  let mut buf = Vec::new();
  let mut chunk = [0u8; 256];
  loop {
    if buf.len() > cfg.max_handshake_len {
      return Err(HandshakeError::RequestTooLarge);
    }
    let n = timeout(cfg.peek_timeout.max(Duration::from_secs(5)), io.read(&mut chunk))
      .await
      .map_err(|_| HandshakeError::MalformedRequest("timed out reading handshake headers"))??;
    if n == 0 {
      return Err(HandshakeError::MalformedRequest(
        "connection closed before handshake completed",
      ));
    }
    buf.extend_from_slice(&chunk[..n]);
    if let Some(end) = find_header_end(&buf) {
      let text = String::from_utf8_lossy(&buf[..end]).into_owned();
      return Ok((buf[end + 4..].to_vec(), text));
    }
  }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
  buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Peek the first 4 bytes of a freshly accepted connection and decide how to
/// proceed, per `websockets.c`'s `webSocketsCheck`. Returns `None` when the
/// connection should be treated as a plain, non-WebSocket byte stream (the
/// original's `ETIMEDOUT` case).
async fn peek_prefix<S>(io: &mut S, cfg: &Config) -> std::io::Result<Option<Vec<u8>>>
where
  S: AsyncRead + Unpin,
{
  let mut buf = [0u8; 4];
  let mut n = 0;
  while n < 4 {
    match timeout(cfg.peek_timeout, io.read(&mut buf[n..])).await {
      Ok(Ok(0)) => break,
      Ok(Ok(got)) => n += got,
      Ok(Err(e)) => return Err(e),
      Err(_) => {
        if n == 0 {
          return Ok(None);
        }
        break;
      }
    }
  }
  Ok(Some(buf[..n].to_vec()))
}

/// Accept a fresh connection: peek its first bytes, optionally answer a
/// Flash policy probe or terminate TLS, then run the RFC 6455 opening
/// handshake and return a ready [`Session`].
///
/// `tls_acceptor` is only consulted for a ClientHello prefix; pass `None` to
/// reject TLS connections outright (or when the `tls` feature isn't
/// compiled in).
pub async fn accept<S>(
  mut io: S,
  cfg: &Config,
  #[cfg(feature = "tls")] tls_acceptor: Option<&tokio_rustls::TlsAcceptor>,
) -> Result<Session<MaybeTlsStream<S>>, HandshakeError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let prefix = peek_prefix(&mut io, cfg).await?;
  let Some(prefix) = prefix else {
    return Err(HandshakeError::NotWebSocket);
  };

  if prefix.is_empty() {
    return Err(HandshakeError::NotWebSocket);
  }

  match classify(prefix[0]) {
    Prefix::FlashPolicy => {
      io.write_all(FLASH_POLICY_RESPONSE).await?;
      io.flush().await?;
      Err(HandshakeError::FlashPolicyServed)
    }
    Prefix::TlsClientHello => {
      #[cfg(feature = "tls")]
      {
        let acceptor = tls_acceptor.ok_or(HandshakeError::TlsNotCompiled)?;
        let prefixed = PeekPrefixed::new(prefix, io);
        let tls = acceptor
          .accept(prefixed)
          .await
          .map_err(|e| HandshakeError::Tls(e.to_string()))?;
        run_handshake(MaybeTlsStream::Tls(Box::new(tls)), cfg).await
      }
      #[cfg(not(feature = "tls"))]
      {
        Err(HandshakeError::TlsNotCompiled)
      }
    }
    Prefix::Http => {
      let prefixed = PeekPrefixed::new(prefix, io);
      run_handshake(MaybeTlsStream::Plain(prefixed), cfg).await
    }
  }
}

async fn run_handshake<IO>(
  mut io: MaybeTlsStream<IO>,
  cfg: &Config,
) -> Result<Session<MaybeTlsStream<IO>>, HandshakeError>
where
  IO: AsyncRead + AsyncWrite + Unpin,
{
  let (leftover, header_text) = read_header_block(&mut io, cfg).await?;
  let request = parse_request(&header_text)?;

  let (base64, negotiated_name) = negotiate_subprotocol(request.protocol.as_deref());
  let accept = accept_token(&request.key);

  let mut response = format!(
    "HTTP/1.1 101 Switching Protocols\r\n\
     Upgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Accept: {accept}\r\n"
  );
  if let Some(name) = negotiated_name {
    response.push_str(&format!("Sec-WebSocket-Protocol: {name}\r\n"));
  }
  response.push_str("\r\n");

  io.write_all(response.as_bytes()).await?;
  io.flush().await?;

  tracing::debug!(
    path = %request.path,
    host = %request.host,
    base64,
    "websocket handshake complete"
  );

  Ok(Session::new(io, request.path, base64, leftover, cfg))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accept_token_matches_rfc6455_example() {
    // RFC 6455 §1.3 worked example.
    assert_eq!(
      accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
      "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
  }

  #[test]
  fn negotiate_binary_disables_base64() {
    let (base64, name) = negotiate_subprotocol(Some("binary"));
    assert!(!base64);
    assert_eq!(name, Some("binary"));
  }

  #[test]
  fn negotiate_base64_by_name() {
    let (base64, name) = negotiate_subprotocol(Some("base64"));
    assert!(base64);
    assert_eq!(name, Some("base64"));
  }

  #[test]
  fn negotiate_absent_protocol_defaults_to_unnamed_base64() {
    let (base64, name) = negotiate_subprotocol(None);
    assert!(base64);
    assert_eq!(name, None);
  }

  #[test]
  fn missing_version_is_hixie_rejection() {
    let raw = "GET /ws HTTP/1.1\r\nHost: x\r\nOrigin: http://x\r\nSec-WebSocket-Key: abc\r\n\r\n";
    let err = parse_request(raw).unwrap_err();
    assert!(matches!(err, HandshakeError::HixieNotSupported));
  }

  #[test]
  fn missing_origin_is_malformed() {
    let raw = "GET /ws HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\r\n";
    assert!(parse_request(raw).is_err());
  }

  #[test]
  fn well_formed_request_parses() {
    let raw = "GET /ws HTTP/1.1\r\nHost: x\r\nOrigin: http://x\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\r\n";
    let req = parse_request(raw).unwrap();
    assert_eq!(req.path, "/ws");
    assert_eq!(req.host, "x");
    assert!(req.has_origin);
    assert!(req.version_present);
  }
}
