//! Client→server payload unmasking.
//!
//! RFC 6455 masking is endian-neutral 32-bit XOR: the mask is an opaque
//! 4-byte pattern, not a number, so there is no byte-order concern in
//! applying it. `ws_decode.c` unmasks in 4-byte words via a `uint32_t`
//! aliased pointer and carries the 0..3 leftover bytes between reads so the
//! next chunk resumes word-aligned; we do the same without the aliasing
//! hazard by XOR-ing through a byte view and rotating the mask instead of
//! reinterpreting the buffer as `u32`.

/// XOR `data` against `mask`, starting at mask-phase `phase` (i.e. `data[0]`
/// is XORed with `mask[phase % 4]`). Returns the phase the *next* call
/// should start at, i.e. `(phase + data.len()) % 4`.
pub fn unmask(data: &mut [u8], mask: [u8; 4], phase: usize) -> usize {
  for (i, b) in data.iter_mut().enumerate() {
    *b ^= mask[(phase + i) % 4];
  }
  (phase + data.len()) % 4
}
