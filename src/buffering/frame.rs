//! Immutable frame parameters shared by the ring, sources and config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// PCM frame parameters, fixed for the lifetime of a ring.
///
/// A frame is one sample for every channel, `channels * bytes_per_sample`
/// bytes. Every ring offset stays frame-aligned so a consumer never sees a
/// partial frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSpec {
    /// Samples per second per channel (Hz).
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bytes per single sample (2 for 16-bit PCM).
    pub bytes_per_sample: u16,
}

impl FrameSpec {
    /// 16-bit little-endian PCM, the capture format used throughout.
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bytes_per_sample: 2,
        }
    }

    /// Bytes in one frame (one sample per channel).
    pub const fn frame_size(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Bytes per second of audio at these parameters.
    pub const fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// Frame-aligned byte count covering `duration`, rounded down to whole
    /// frames with a one-frame minimum.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()) as usize;
        frames.max(1) * self.frame_size()
    }

    /// Duration represented by `bytes` at these parameters.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.frame_size();
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Whether `len` is a whole number of frames.
    pub fn is_frame_aligned(&self, len: usize) -> bool {
        len % self.frame_size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_channels_times_sample_width() {
        assert_eq!(FrameSpec::pcm16(8000, 1).frame_size(), 2);
        assert_eq!(FrameSpec::pcm16(48000, 2).frame_size(), 4);
    }

    #[test]
    fn bytes_for_rounds_down_to_whole_frames() {
        let spec = FrameSpec::pcm16(8000, 1);
        // 15 s of 8 kHz mono 16-bit = 240 000 bytes
        assert_eq!(spec.bytes_for(Duration::from_secs(15)), 240_000);
        assert!(spec.is_frame_aligned(spec.bytes_for(Duration::from_micros(1_250))));
    }

    #[test]
    fn bytes_for_never_returns_zero() {
        let spec = FrameSpec::pcm16(8000, 1);
        assert_eq!(spec.bytes_for(Duration::ZERO), spec.frame_size());
    }

    #[test]
    fn duration_round_trips_through_bytes() {
        let spec = FrameSpec::pcm16(16000, 2);
        let bytes = spec.bytes_for(Duration::from_millis(500));
        assert_eq!(spec.duration_of(bytes), Duration::from_millis(500));
    }

    #[test]
    fn alignment_check() {
        let spec = FrameSpec::pcm16(8000, 2); // 4-byte frames
        assert!(spec.is_frame_aligned(0));
        assert!(spec.is_frame_aligned(4096));
        assert!(!spec.is_frame_aligned(4098));
    }
}
