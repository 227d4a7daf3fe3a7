//! Tunables for the handshake and the decoder, in place of a config file —
//! this crate has no file-based configuration, same as the teacher, which
//! exposes an equivalent set of knobs as `WebSocket::set_*` builder calls.

use std::time::Duration;

/// Knobs for [`crate::handshake::accept`] and the [`crate::Session`] it
/// returns.
#[derive(Debug, Clone)]
pub struct Config {
  /// Bound on the initial dispatch peek and the header-line reads.
  /// `spec.md §4.1` step 1 calls this "≈100 ms".
  pub peek_timeout: Duration,

  /// Upper bound on the raw bytes of the request line + headers, matching
  /// `spec.md`'s `MAX_HANDSHAKE_LEN` (4096).
  pub max_handshake_len: usize,

  /// Upper bound on a single frame's `payload_len`. This is a safety cap
  /// distinct from the decoder's fixed 16 KiB per-round scratch buffer: a
  /// frame larger than the scratch buffer is still accepted and streamed
  /// across multiple `recv` rounds (as the original decoder does), but a
  /// frame whose *claimed* length exceeds this cap is rejected immediately
  /// at header-parse time, before any payload bytes are read.
  pub max_frame_len: u64,

  /// Whether `Session::recv` automatically replies to a PING with a PONG
  /// carrying the same payload. `spec.md §9`'s Open Question: the core
  /// decoder only has to consume PING/PONG silently; this crate resolves
  /// the question by making the reply an opt-in `Session` behavior,
  /// mirroring the teacher's own `set_auto_pong` (default on).
  pub auto_pong: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      peek_timeout: Duration::from_millis(100),
      max_handshake_len: 4096,
      max_frame_len: 64 << 20,
      auto_pong: true,
    }
  }
}
