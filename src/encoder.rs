//! Outbound frame encoding.
//!
//! The server role never masks outgoing frames (RFC 6455 §5.1: masking is
//! client-to-server only), so this side is considerably simpler than
//! [`crate::decoder::Decoder`] — one frame, one header, one write. Mirrors
//! the teacher's `write_frame`, minus the write-coalescing/vectored-I/O path
//! the teacher offers as a performance knob, which `spec.md` does not ask
//! for.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SendError;
use crate::frame::OpCode;

/// Stateless outbound frame writer. Held by [`crate::Session`] alongside the
/// [`crate::decoder::Decoder`]; unlike the decoder it carries nothing across
/// calls.
pub struct Encoder {
  base64: bool,
}

impl Encoder {
  pub fn new(base64: bool) -> Self {
    Self { base64 }
  }

  /// Send `payload` as a single unfragmented, unmasked data frame — TEXT
  /// when the negotiated subprotocol is `base64` (re-encoding `payload`
  /// first), BINARY otherwise.
  pub async fn send<S>(&self, io: &mut S, payload: &[u8]) -> Result<(), SendError>
  where
    S: AsyncWrite + Unpin,
  {
    if self.base64 {
      use base64::Engine;
      let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
      self.write_frame(io, OpCode::Text, encoded.as_bytes()).await
    } else {
      self.write_frame(io, OpCode::Binary, payload).await
    }
  }

  /// Send a PONG carrying `payload` back unchanged, per RFC 6455 §5.5.3.
  pub async fn send_pong<S>(&self, io: &mut S, payload: &[u8]) -> Result<(), SendError>
  where
    S: AsyncWrite + Unpin,
  {
    self.write_frame(io, OpCode::Pong, payload).await
  }

  /// Send a CLOSE frame with an optional status code and reason, echoing the
  /// close handshake the way `webSocketsHandshake`'s peers expect.
  pub async fn send_close<S>(
    &self,
    io: &mut S,
    code: Option<u16>,
    reason: &[u8],
  ) -> Result<(), SendError>
  where
    S: AsyncWrite + Unpin,
  {
    let mut payload = Vec::with_capacity(2 + reason.len());
    if let Some(code) = code {
      payload.extend_from_slice(&code.to_be_bytes());
      payload.extend_from_slice(reason);
    }
    self.write_frame(io, OpCode::Close, &payload).await
  }

  async fn write_frame<S>(
    &self,
    io: &mut S,
    opcode: OpCode,
    payload: &[u8],
  ) -> Result<(), SendError>
  where
    S: AsyncWrite + Unpin,
  {
    let mut header = Vec::with_capacity(10);
    header.push(0x80 | opcode_nibble(opcode));

    let len = payload.len();
    if len < 126 {
      header.push(len as u8);
    } else if len <= 0xFFFF {
      header.push(126);
      header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
      header.push(127);
      header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    io.write_all(&header).await?;
    io.write_all(payload).await?;
    io.flush().await?;
    Ok(())
  }
}

fn opcode_nibble(opcode: OpCode) -> u8 {
  match opcode {
    OpCode::Continuation => 0x0,
    OpCode::Text => 0x1,
    OpCode::Binary => 0x2,
    OpCode::Close => 0x8,
    OpCode::Ping => 0x9,
    OpCode::Pong => 0xA,
  }
}
