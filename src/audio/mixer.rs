//! Additive mixing of all active capture buffers into one composite PCM
//! buffer.
//!
//! Pull-based: the merge is computed at call time from the aligned ring
//! buffers' current contents, no incremental state is kept.

use std::io::Cursor;
use std::sync::PoisonError;

use crate::audio::CaptureTable;

/// Combines the aligned buffers of all tracked speakers via sample-wise
/// addition with hard saturation.
pub struct StreamMixer {
    captures: CaptureTable,
}

impl StreamMixer {
    /// Creates a mixer over the shared capture table.
    ///
    /// The mixer never adds or removes entries; that is the session
    /// controller's job.
    pub fn new(captures: CaptureTable) -> Self {
        Self { captures }
    }

    /// Merges the full aligned history of every active buffer.
    ///
    /// Buffers shorter than the longest one are left-padded with zeros so
    /// all buffers end at the same instant. Aligning ends (rather than
    /// starts) keeps the most recent audio temporally correct, which is
    /// what recall callers want; the cost is fabricated leading silence for
    /// late joiners. This is a chosen policy, not a transport property.
    pub fn merged_buffer(&self) -> Vec<u8> {
        let table = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
        let buffers: Vec<Vec<u8>> = table.values().map(|b| b.aligned_bytes()).collect();
        drop(table);
        mix(&buffers)
    }

    /// Wraps [`StreamMixer::merged_buffer`] output as a one-shot reader.
    pub fn merged_stream(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.merged_buffer())
    }
}

/// Sums 16-bit LE samples across buffers, saturating to the i16 range
/// (hard clip, no normalization).
fn mix(buffers: &[Vec<u8>]) -> Vec<u8> {
    let max_len = buffers.iter().map(Vec::len).max().unwrap_or(0);
    if max_len == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(max_len);
    for pos in (0..max_len).step_by(2) {
        let mut sum: i32 = 0;
        for buffer in buffers {
            // Left-pad: a short buffer contributes zeros at the front.
            let pad = max_len - buffer.len();
            if pos >= pad && pos + 1 < pad + buffer.len() {
                let i = pos - pad;
                sum += i16::from_le_bytes([buffer[i], buffer[i + 1]]) as i32;
            }
        }
        let clipped = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.extend_from_slice(&clipped.to_le_bytes());
    }
    out
}
