//! A single established WebSocket connection.
//!
//! Owns the underlying stream, the [`Decoder`], and the [`Encoder`]. Not
//! `Sync` (it borrows its I/O mutably through `&mut self` on every call) and
//! never meant to be shared across threads — the teacher asserts the
//! equivalent property of its own `WebSocket<S>` with a compile-time trait
//! trick in `lib.rs`'s test module; `spec.md §5` states the same requirement
//! in prose, one task owns one `Session`.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{RecvError, SendError};

/// A leftover-bytes-first reader: the handshake's header-block read often
/// consumes a few bytes of the first frame along with the blank line that
/// ends the headers. Those bytes are replayed here before any further read
/// from `io`.
struct LeftoverPrefixed<S> {
  leftover: Vec<u8>,
  pos: usize,
  io: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for LeftoverPrefixed<S> {
  fn poll_read(
    mut self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    if self.pos < self.leftover.len() {
      let remaining = &self.leftover[self.pos..];
      let n = remaining.len().min(buf.remaining());
      buf.put_slice(&remaining[..n]);
      self.pos += n;
      return std::task::Poll::Ready(Ok(()));
    }
    std::pin::Pin::new(&mut self.io).poll_read(cx, buf)
  }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LeftoverPrefixed<S> {
  fn poll_write(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &[u8],
  ) -> std::task::Poll<std::io::Result<usize>> {
    std::pin::Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
  }

  fn poll_flush(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.get_mut().io).poll_flush(cx)
  }

  fn poll_shutdown(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
  }
}

pub struct Session<S> {
  io: LeftoverPrefixed<S>,
  decoder: Decoder,
  encoder: Encoder,
  path: String,
  auto_pong: bool,
}

impl<S> Session<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  pub(crate) fn new(
    io: S,
    path: String,
    base64: bool,
    leftover: Vec<u8>,
    cfg: &Config,
  ) -> Self {
    Self {
      io: LeftoverPrefixed {
        leftover,
        pos: 0,
        io,
      },
      decoder: Decoder::new(base64, cfg.max_frame_len),
      encoder: Encoder::new(base64),
      path,
      auto_pong: cfg.auto_pong,
    }
  }

  /// Request path from the original handshake, e.g. `/websockify`.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Read the next chunk of decoded application payload bytes into `dst`.
  ///
  /// `Ok(0)` means the peer closed the TCP connection cleanly without
  /// sending a CLOSE frame. PING frames are consumed transparently; when
  /// `Config::auto_pong` is set, a matching PONG is sent back before this
  /// call returns.
  pub async fn recv(&mut self, dst: &mut [u8]) -> Result<usize, RecvError> {
    let n = self.decoder.recv(&mut self.io, dst).await?;

    if self.auto_pong {
      let pending = self.decoder.take_pending_pongs();
      for payload in pending {
        self
          .encoder
          .send_pong(&mut self.io, &payload)
          .await
          .map_err(|e| match e {
            SendError::Io(e) => RecvError::Io(e),
          })?;
      }
    } else {
      // Still drain the queue so it doesn't grow unbounded when the caller
      // has opted out of auto-reply.
      self.decoder.take_pending_pongs();
    }

    Ok(n)
  }

  /// Send `payload` as a single data frame (BINARY, or Base64-wrapped TEXT
  /// when the negotiated subprotocol calls for it).
  pub async fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
    self.encoder.send(&mut self.io, payload).await
  }

  /// Send a CLOSE frame and flush it. Does not wait for the peer's own
  /// CLOSE in return; callers that need a clean bidirectional shutdown
  /// should keep calling `recv` until it returns `ConnectionReset` or `Ok(0)`.
  pub async fn close(&mut self, code: Option<u16>, reason: &[u8]) -> Result<(), SendError> {
    self.encoder.send_close(&mut self.io, code, reason).await?;
    self.io.flush().await?;
    Ok(())
  }

  /// Whether the decoder already holds bytes that `recv` could return
  /// without another read from the underlying stream. Mirrors
  /// `webSocketsHasDataInBuffer`, minus its extra TLS-buffered-bytes check
  /// (there is no portable equivalent for a generic stream; a caller backed
  /// by `tokio-rustls` should additionally poll its own socket readiness).
  pub fn has_buffered_data(&self) -> bool {
    self.decoder.read_len() > 0
  }

  /// Always `false`: this transport layer never originates a disconnect on
  /// its own, matching `webSocketCheckDisconnect`'s unconditional `FALSE`.
  pub fn check_disconnect(&self) -> bool {
    false
  }
}
