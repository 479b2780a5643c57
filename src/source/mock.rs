//! Scripted audio source for tests and CI without hardware.

use std::collections::VecDeque;
use std::time::Duration;

use super::AudioSource;
use crate::buffering::frame::FrameSpec;
use crate::error::SourceError;

enum Step {
    Pcm(Vec<u8>),
    Fail(SourceError),
}

/// A scripted [`AudioSource`].
///
/// PCM and errors play back in the order they were queued. When the script
/// runs out the source reports a fatal "script exhausted" error, so a test
/// capture session terminates deterministically instead of hanging.
pub struct MockSource {
    spec: FrameSpec,
    script: VecDeque<Step>,
    /// Queued PCM not yet handed out — scripted blocks don't have to match
    /// the capture chunk size.
    pending: VecDeque<u8>,
    /// Sleep per emitted chunk, simulating a real-time device.
    pacing: Option<Duration>,
}

impl MockSource {
    pub fn new(spec: FrameSpec) -> Self {
        Self {
            spec,
            script: VecDeque::new(),
            pending: VecDeque::new(),
            pacing: None,
        }
    }

    /// Sleep `per_chunk` before every successful read, like a device that
    /// produces audio in real time.
    #[must_use]
    pub fn paced(mut self, per_chunk: Duration) -> Self {
        self.pacing = Some(per_chunk);
        self
    }

    /// Queue raw PCM bytes (a whole number of frames).
    pub fn push_pcm(&mut self, data: &[u8]) {
        debug_assert!(self.spec.is_frame_aligned(data.len()));
        self.script.push_back(Step::Pcm(data.to_vec()));
    }

    /// Queue `ms` milliseconds of silence.
    pub fn push_silence(&mut self, ms: u64) {
        let bytes = self.spec.bytes_for(Duration::from_millis(ms));
        self.script.push_back(Step::Pcm(vec![0u8; bytes]));
    }

    /// Queue a sine tone — handy when the output is meant to be listened to.
    pub fn push_sine(&mut self, frequency: f64, ms: u64) {
        let frames = self.spec.bytes_for(Duration::from_millis(ms)) / self.spec.frame_size();
        let rate = f64::from(self.spec.sample_rate);
        let mut data = Vec::with_capacity(frames * self.spec.frame_size());
        for i in 0..frames {
            let t = i as f64 / rate;
            let sample = ((2.0 * std::f64::consts::PI * frequency * t).sin() * 32767.0) as i16;
            for _ in 0..self.spec.channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        self.script.push_back(Step::Pcm(data));
    }

    /// Queue a transient read failure; the capture loop retries past it.
    pub fn push_transient(&mut self, reason: &str) {
        self.script.push_back(Step::Fail(SourceError::transient(reason)));
    }

    /// Queue a fatal failure; capture terminates when it is reached.
    pub fn push_fatal(&mut self, reason: &str) {
        self.script.push_back(Step::Fail(SourceError::fatal(reason)));
    }
}

impl AudioSource for MockSource {
    fn frame_spec(&self) -> FrameSpec {
        self.spec
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> std::result::Result<(), SourceError> {
        while self.pending.len() < buf.len() {
            match self.script.pop_front() {
                Some(Step::Pcm(data)) => self.pending.extend(data),
                Some(Step::Fail(e)) => return Err(e),
                None => return Err(SourceError::fatal("mock script exhausted")),
            }
        }
        if let Some(pace) = self.pacing {
            std::thread::sleep(pace);
        }
        for slot in buf.iter_mut() {
            // pending holds at least buf.len() bytes here
            *slot = self.pending.pop_front().unwrap_or_default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: FrameSpec = FrameSpec::pcm16(8000, 1);

    #[test]
    fn serves_queued_pcm_across_chunk_boundaries() {
        let mut mock = MockSource::new(SPEC);
        mock.push_pcm(&[1, 2, 3, 4]);
        mock.push_pcm(&[5, 6]);

        let mut buf = [0u8; 6];
        mock.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn errors_fire_in_script_order() {
        let mut mock = MockSource::new(SPEC);
        mock.push_pcm(&[1, 2]);
        mock.push_transient("overrun");
        mock.push_pcm(&[3, 4]);

        let mut buf = [0u8; 2];
        mock.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);

        let err = mock.read_chunk(&mut buf).unwrap_err();
        assert!(!err.is_fatal());

        mock.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
    }

    #[test]
    fn exhausted_script_is_fatal() {
        let mut mock = MockSource::new(SPEC);
        let mut buf = [0u8; 2];
        assert!(mock.read_chunk(&mut buf).unwrap_err().is_fatal());
    }

    #[test]
    fn silence_duration_matches_spec() {
        let mut mock = MockSource::new(SPEC);
        mock.push_silence(100); // 100 ms at 8 kHz mono 16-bit = 1600 bytes

        let mut buf = vec![0xffu8; 1600];
        mock.read_chunk(&mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert!(mock.read_chunk(&mut [0u8; 2]).is_err());
    }

    #[test]
    fn sine_has_positive_and_negative_samples() {
        let mut mock = MockSource::new(SPEC);
        mock.push_sine(440.0, 100);

        let mut buf = vec![0u8; 1600];
        mock.read_chunk(&mut buf).unwrap();
        let samples: Vec<i16> = buf
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert!(samples.iter().any(|&s| s > 0));
        assert!(samples.iter().any(|&s| s < 0));
    }
}
