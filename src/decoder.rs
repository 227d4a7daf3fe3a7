//! Streaming RFC 6455 frame decoder.
//!
//! Transcribed from `ws_decode.c`'s goto-driven `readHeader` /
//! `readAndDecode` / `returnData` into an explicit [`State`] enum with one
//! transition function per state, as `spec.md DESIGN NOTES` calls for. The
//! scratch buffer, carry buffer, and continuation-opcode bookkeeping follow
//! the same data model (`spec.md §3`).
//!
//! Two simplifications versus the C original, both noted here rather than
//! silently:
//!
//! - Header bytes are read in exactly the sizes still needed (2, then the
//!   remaining 4/6/12 for the extended/long layouts) rather than
//!   speculatively requesting up to the maximum masked header length in one
//!   read. The C version's speculative read can, for a short frame whose
//!   total length is under 14 bytes, pull bytes belonging to the *next*
//!   frame into the current one's accounting; reading exactly what's needed
//!   avoids that case entirely instead of having to detect and correct it.
//! - Base64 is decoded into a small owned scratch buffer rather than
//!   in-place, per the alternative `spec.md DESIGN NOTES` explicitly
//!   sanctions for languages that can't safely decode in place.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolViolation, RecvError};
use crate::frame::{self, Header, OpCode, ParseOutcome};
use crate::mask;

/// Per-round I/O scratch size. `spec.md DESIGN NOTES` recommends >= 16 KiB;
/// a frame whose payload is larger than this is not rejected, it is simply
/// streamed across more `recv` rounds.
const SCRATCH_CAP: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  HeaderPending,
  DataNeeded,
  DataAvailable,
  FrameComplete,
  CloseReasonPending,
  Err,
}

enum StepOutcome {
  Continue,
  Eof,
}

/// Stateful per-connection inbound frame decoder.
///
/// Owned exclusively by one [`crate::Session`]; never aliased or shared
/// across threads (`spec.md §5`).
pub struct Decoder {
  code_buf: Box<[u8; SCRATCH_CAP]>,
  header_nread: usize,
  write_pos: usize,
  read_pos: usize,
  read_len: usize,
  header: Option<Header>,
  n_read_payload: u64,
  carry_buf: [u8; 3],
  carry_len: u8,
  continuation_opcode: Option<OpCode>,
  state: State,
  base64: bool,
  max_frame_len: u64,
  pending_pongs: VecDeque<Vec<u8>>,
  /// Decoded bytes of a CLOSE or PING payload accumulated across rounds.
  /// Control-frame payloads are never handed to the caller incrementally
  /// like BINARY/TEXT data is — the whole payload is needed at once (to
  /// parse a close code + reason, or to echo a ping exactly) — so unlike
  /// the data-frame arms, the bytes decoded by an incomplete round can't
  /// simply be left in `code_buf` for `copy_out`; they're moved here
  /// instead since `write_pos` is rewound to `payload_start` every round.
  control_accum: Vec<u8>,
}

impl Decoder {
  pub fn new(base64: bool, max_frame_len: u64) -> Self {
    Self {
      code_buf: Box::new([0u8; SCRATCH_CAP]),
      header_nread: 0,
      write_pos: 0,
      read_pos: 0,
      read_len: 0,
      header: None,
      n_read_payload: 0,
      carry_buf: [0; 3],
      carry_len: 0,
      continuation_opcode: None,
      state: State::HeaderPending,
      base64,
      max_frame_len,
      pending_pongs: VecDeque::new(),
      control_accum: Vec::new(),
    }
  }

  /// Bytes presently buffered and ready for immediate copy-out, without
  /// touching `io`. Used by [`crate::Session::has_buffered_data`].
  pub fn read_len(&self) -> usize {
    self.read_len
  }

  /// Drain PING payloads consumed since the last call, for the caller
  /// (`Session::recv`) to reply to with PONG frames. See `Config::auto_pong`.
  pub fn take_pending_pongs(&mut self) -> VecDeque<Vec<u8>> {
    std::mem::take(&mut self.pending_pongs)
  }

  /// Read decoded payload bytes into `dst`, reading from `io` as needed.
  ///
  /// `Ok(0)` means the peer closed the underlying stream cleanly before any
  /// CLOSE frame arrived. See [`RecvError`] for the remaining outcomes.
  pub async fn recv<S>(&mut self, io: &mut S, dst: &mut [u8]) -> Result<usize, RecvError>
  where
    S: AsyncRead + Unpin,
  {
    loop {
      match self.state {
        State::Err => {
          return Err(RecvError::Internal("decoder is poisoned after a prior error"))
        }
        State::DataAvailable => {
          debug_assert!(self.read_len > 0);
          return Ok(self.copy_out(dst));
        }
        State::FrameComplete => {
          self.finish_frame();
          continue;
        }
        State::HeaderPending => match self.step_header(io).await {
          Ok(StepOutcome::Eof) => {
            self.state = State::Err;
            return Ok(0);
          }
          Ok(StepOutcome::Continue) => continue,
          Err(e) => {
            self.state = State::Err;
            return Err(e);
          }
        },
        State::DataNeeded | State::CloseReasonPending => match self.step_data(io).await {
          Ok(StepOutcome::Eof) => {
            self.state = State::Err;
            return Ok(0);
          }
          Ok(StepOutcome::Continue) => {
            if self.state == State::DataAvailable {
              let n = self.copy_out(dst);
              if n > 0 {
                return Ok(n);
              }
            }
            continue;
          }
          Err(RecvError::ConnectionReset { code, reason }) => {
            self.finish_frame();
            self.state = State::Err;
            return Err(RecvError::ConnectionReset { code, reason });
          }
          Err(e) => {
            self.state = State::Err;
            return Err(e);
          }
        },
      }
    }
  }

  /// Copy up to `dst.len()` decoded bytes out, advancing `read_pos`/`read_len`
  /// and updating `state` exactly as `ws_decode.c`'s `returnData` does.
  fn copy_out(&mut self, dst: &mut [u8]) -> usize {
    if self.read_len == 0 || dst.is_empty() {
      return 0;
    }
    let n = self.read_len.min(dst.len());
    dst[..n].copy_from_slice(&self.code_buf[self.read_pos..self.read_pos + n]);
    self.read_pos += n;
    self.read_len -= n;

    if self.read_len == 0 {
      let remaining = self
        .header
        .as_ref()
        .map(|h| h.payload_len - self.n_read_payload)
        .unwrap_or(0);
      self.state = if remaining == 0 {
        State::FrameComplete
      } else {
        State::DataNeeded
      };
    } else {
      self.state = State::DataAvailable;
    }
    n
  }

  /// Read exactly as many bytes as still needed to determine, then
  /// complete, the frame header.
  async fn step_header<S>(&mut self, io: &mut S) -> Result<StepOutcome, RecvError>
  where
    S: AsyncRead + Unpin,
  {
    let want = match self.header_nread {
      0 | 1 => 2 - self.header_nread,
      n => self.header_target_len().unwrap_or(frame::MAX_HEADER_LEN) - n,
    };

    let n = io
      .read(&mut self.code_buf[self.header_nread..self.header_nread + want])
      .await?;
    if n == 0 {
      return Ok(StepOutcome::Eof);
    }
    self.header_nread += n;

    match frame::parse(&self.code_buf[..self.header_nread], self.header_nread)
      .map_err(RecvError::Protocol)?
    {
      ParseOutcome::Pending => Ok(StepOutcome::Continue),
      ParseOutcome::Complete(mut header) => {
        if header.payload_len > self.max_frame_len {
          return Err(RecvError::Protocol(ProtocolViolation::FrameTooLarge));
        }

        if header.opcode == OpCode::Continuation {
          match self.continuation_opcode {
            Some(remembered) => header.opcode = remembered,
            None => {
              return Err(RecvError::Protocol(ProtocolViolation::StrayContinuation))
            }
          }
        } else if !header.opcode.is_control() {
          if self.continuation_opcode.is_some() {
            return Err(RecvError::Protocol(
              ProtocolViolation::UnexpectedDataFrame,
            ));
          }
          if !header.fin {
            self.continuation_opcode = Some(header.opcode);
          }
        }

        self.write_pos = header.header_len;
        self.read_pos = 0;
        self.read_len = 0;
        self.n_read_payload = 0;
        self.header = Some(header);
        self.state = State::DataNeeded;
        Ok(StepOutcome::Continue)
      }
    }
  }

  /// Tentative header length once the length-encoding byte is known, used
  /// only to size the next exact read.
  fn header_target_len(&self) -> Option<usize> {
    if self.header_nread < 2 {
      return None;
    }
    let len7 = self.code_buf[1] & 0x7F;
    Some(match len7 {
      126 => frame::HEADER_LEN_EXTENDED,
      127 => frame::HEADER_LEN_LONG,
      _ => frame::HEADER_LEN_SHORT,
    })
  }

  /// Read one more round of payload bytes, unmask them (carrying over a
  /// sub-4-byte remainder so the next round resumes word-aligned), and
  /// dispatch on opcode. Mirrors `ws_decode.c`'s `readAndDecode`.
  async fn step_data<S>(&mut self, io: &mut S) -> Result<StepOutcome, RecvError>
  where
    S: AsyncRead + Unpin,
  {
    let header = self.header.clone().expect("header set while decoding");

    let carry_len = self.carry_len as usize;
    if carry_len > 0 {
      let carry = self.carry_buf;
      self.code_buf[self.write_pos..self.write_pos + carry_len]
        .copy_from_slice(&carry[..carry_len]);
      self.write_pos += carry_len;
    }

    let remaining = header.payload_len - self.n_read_payload;
    let bufsize = SCRATCH_CAP - self.write_pos;
    let next_read = remaining.min(bufsize as u64) as usize;

    let n = if next_read > 0 {
      let got = io
        .read(&mut self.code_buf[self.write_pos..self.write_pos + next_read])
        .await?;
      if got == 0 {
        return Ok(StepOutcome::Eof);
      }
      got
    } else {
      0
    };

    self.n_read_payload += n as u64;
    self.write_pos += n;

    let frame_done = self.n_read_payload == header.payload_len;
    let to_decode = n + carry_len;
    let data_start = self.write_pos - to_decode;

    let to_return = if frame_done {
      mask::unmask(&mut self.code_buf[data_start..self.write_pos], header.mask, 0);
      self.carry_len = 0;
      to_decode
    } else {
      let whole = (to_decode / 4) * 4;
      mask::unmask(
        &mut self.code_buf[data_start..data_start + whole],
        header.mask,
        0,
      );
      let tail = to_decode - whole;
      self.carry_buf[..tail]
        .copy_from_slice(&self.code_buf[data_start + whole..data_start + whole + tail]);
      self.carry_len = tail as u8;
      self.write_pos -= tail;
      whole
    };

    // Payload start never moves once the header is parsed: every round
    // rewinds the write cursor back here so a bounded scratch buffer can
    // stream an arbitrarily long frame.
    let payload_start = header.header_len;

    match header.opcode {
      OpCode::Close => {
        self.control_accum
          .extend_from_slice(&self.code_buf[data_start..data_start + to_return]);
        self.write_pos = payload_start;
        if frame_done {
          let (code, reason) = parse_close_payload(&self.control_accum);
          self.control_accum.clear();
          return Err(RecvError::ConnectionReset { code, reason });
        } else {
          self.state = State::CloseReasonPending;
          Ok(StepOutcome::Continue)
        }
      }
      OpCode::Ping => {
        self.control_accum
          .extend_from_slice(&self.code_buf[data_start..data_start + to_return]);
        self.write_pos = payload_start;
        if frame_done {
          self.pending_pongs
            .push_back(std::mem::take(&mut self.control_accum));
          self.state = State::FrameComplete;
        } else {
          self.state = State::DataNeeded;
        }
        Ok(StepOutcome::Continue)
      }
      OpCode::Pong => {
        self.write_pos = payload_start;
        self.state = if frame_done {
          State::FrameComplete
        } else {
          State::DataNeeded
        };
        Ok(StepOutcome::Continue)
      }
      OpCode::Binary => {
        self.read_pos = data_start;
        self.read_len = to_return;
        self.write_pos = payload_start;
        self.state = if self.read_len > 0 {
          State::DataAvailable
        } else if frame_done {
          State::FrameComplete
        } else {
          State::DataNeeded
        };
        Ok(StepOutcome::Continue)
      }
      OpCode::Text if self.base64 => {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;
        let chunk = &self.code_buf[data_start..data_start + to_return];
        let decoded = engine
          .decode(chunk)
          .map_err(|_| RecvError::Protocol(ProtocolViolation::InvalidBase64Text))?;
        let n = decoded.len();
        self.code_buf[data_start..data_start + n].copy_from_slice(&decoded);
        self.read_pos = data_start;
        self.read_len = n;
        self.write_pos = payload_start;
        self.state = if self.read_len > 0 {
          State::DataAvailable
        } else if frame_done {
          State::FrameComplete
        } else {
          State::DataNeeded
        };
        Ok(StepOutcome::Continue)
      }
      OpCode::Text | OpCode::Continuation => {
        Err(RecvError::Protocol(ProtocolViolation::InvalidOpcode))
      }
    }
  }

  /// Reset per-frame state once a frame has been fully delivered (or fully
  /// consumed, for control frames). Preserves `continuation_opcode` for
  /// anything but a finished, non-control data frame, per `spec.md §4.2`.
  fn finish_frame(&mut self) {
    let preserve_continuation = match &self.header {
      Some(h) => !(h.fin && !h.opcode.is_control()),
      None => false,
    };

    self.header = None;
    self.header_nread = 0;
    self.write_pos = 0;
    self.read_pos = 0;
    self.read_len = 0;
    self.n_read_payload = 0;
    self.state = State::HeaderPending;
    if !preserve_continuation {
      self.continuation_opcode = None;
    }
  }
}

fn parse_close_payload(data: &[u8]) -> (Option<u16>, String) {
  if data.len() >= 2 {
    let code = u16::from_be_bytes([data[0], data[1]]);
    let reason = String::from_utf8_lossy(&data[2..]).into_owned();
    (Some(code), reason)
  } else {
    (None, String::new())
  }
}
