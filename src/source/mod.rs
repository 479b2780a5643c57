//! Audio sources: the blocking "read one chunk" seam in front of the
//! device API.
//!
//! The capture worker owns its source exclusively and drives it from one
//! thread, so implementations never need internal synchronization toward
//! the caller. Hardware capture lives in [`CpalSource`] (feature
//! `audio-cpal`); tests and CI run against the scripted [`MockSource`].

pub mod device;
pub mod mock;

#[cfg(feature = "audio-cpal")]
mod cpal_input;

#[cfg(feature = "audio-cpal")]
pub use cpal_input::CpalSource;
pub use mock::MockSource;

use crate::buffering::frame::FrameSpec;
use crate::error::SourceError;

/// A blocking producer of whole PCM chunks.
///
/// `read_chunk` must fill `buf` completely — the capture loop always passes
/// a whole number of frames — or report why it could not. Transient errors
/// are retried by the loop; fatal ones end the capture session.
pub trait AudioSource {
    /// Frame parameters this source produces, fixed for its lifetime.
    fn frame_spec(&self) -> FrameSpec;

    /// Blocking read of exactly `buf.len()` bytes of PCM.
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::result::Result<(), SourceError>;
}
