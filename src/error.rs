//! Error types for the handshake and the framed read/write surface.
//!
//! These mirror the error *kinds* of `spec.md §7`'s POSIX errno emulation
//! (EAGAIN / EPROTO / ECONNRESET / EIO) without the errno indirection: each
//! kind is its own variant.

use thiserror::Error;

/// Why a connection attempt did not become a `Session`.
#[derive(Error, Debug)]
pub enum HandshakeError {
  /// The initial peek timed out with zero bytes: not a WebSocket client at
  /// all. Distinct from a parse failure so the caller may fall back to
  /// treating the connection as a raw byte stream, per `spec.md §4.1` step 1.
  #[error("connection is not a WebSocket upgrade request")]
  NotWebSocket,

  /// A legacy Flash cross-domain-policy probe was seen and answered; the
  /// connection is intentionally not upgraded.
  #[error("served Flash cross-domain policy response")]
  FlashPolicyServed,

  /// `Sec-WebSocket-Version` absent or zero: the obsolete Hixie-76 handshake
  /// is not supported.
  #[error("Hixie-76 handshake (or missing Sec-WebSocket-Version) is not supported")]
  HixieNotSupported,

  /// The request line or headers did not parse, or a required header
  /// (`Host`, `Origin`/`Sec-WebSocket-Origin`, request path) was missing.
  #[error("malformed or incomplete handshake request: {0}")]
  MalformedRequest(&'static str),

  /// The header block exceeded `HandshakeConfig::max_handshake_len` without
  /// a terminating blank line.
  #[error("handshake request exceeded maximum length")]
  RequestTooLarge,

  /// TLS ClientHello byte observed but the crate was built without the
  /// `tls` feature.
  #[error("TLS-wrapped connection but crate built without the `tls` feature")]
  TlsNotCompiled,

  /// TLS handshake itself failed.
  #[error("TLS handshake failed: {0}")]
  Tls(String),

  /// Underlying I/O error while peeking, reading, or writing during the
  /// handshake.
  #[error("I/O error during handshake: {0}")]
  Io(#[from] std::io::Error),
}

/// A single named protocol violation, used by [`RecvError::Protocol`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
  #[error("received frame with mask bit unset")]
  Unmasked,
  #[error("length field used a non-minimal encoding")]
  NonMinimalLength,
  #[error("control frame was fragmented (FIN unset)")]
  FragmentedControl,
  #[error("continuation frame with no open fragmented message")]
  StrayContinuation,
  #[error("fresh data frame received while a fragmented message is open")]
  UnexpectedDataFrame,
  #[error("reserved or invalid opcode")]
  InvalidOpcode,
  #[error("frame payload exceeds the configured maximum")]
  FrameTooLarge,
  #[error("invalid Base64 payload in TEXT frame")]
  InvalidBase64Text,
}

/// Outcome of [`crate::decoder::Decoder::recv`] / [`crate::Session::recv`].
///
/// `Ok(0)` corresponds to the peer closing cleanly at the TCP level before
/// any CLOSE frame arrived, matching `spec.md`'s `n == 0`.
#[derive(Error, Debug)]
pub enum RecvError {
  /// A complete RFC 6455 CLOSE frame was received.
  #[error("connection closed by peer: code={code:?} reason={reason:?}")]
  ConnectionReset {
    code: Option<u16>,
    reason: String,
  },

  /// The peer violated the framing protocol.
  #[error("protocol violation: {0}")]
  Protocol(ProtocolViolation),

  /// An internal invariant was violated (should be unreachable).
  #[error("internal decoder error: {0}")]
  Internal(&'static str),

  /// The underlying stream returned an I/O error.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Outcome of [`crate::encoder::Encoder::send`] / [`crate::Session::send`].
#[derive(Error, Debug)]
pub enum SendError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}
