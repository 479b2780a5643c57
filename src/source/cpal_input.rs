//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated (TIME_CRITICAL
//! on Windows) priority. It **must not**:
//! - Allocate heap memory (beyond a reused scratch buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The callback therefore converts samples to 16-bit little-endian PCM and
//! pushes the bytes into a lock-free SPSC ring whose `push_slice` is
//! wait-free; [`CpalSource::read_chunk`] drains that ring on the capture
//! thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalSource` must be created and dropped on the same thread — the
//! capture engine guarantees this by opening the source inside its worker.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tracing::{error, info, warn};

use super::AudioSource;
use crate::buffering::frame::FrameSpec;
use crate::error::{MicstreamError, Result, SourceError};

/// Sleep while the handoff ring is empty (avoids busy-wait burning a core).
const EMPTY_SLEEP_MS: u64 = 5;

/// Handle to an active cpal input stream, exposed as a blocking
/// [`AudioSource`].
///
/// **Not `Send`** — create and drop this type on the capture thread.
pub struct CpalSource {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    consumer: ringbuf::HeapCons<u8>,
    spec: FrameSpec,
    /// Set by the cpal error callback; `read_chunk` surfaces it.
    stream_error: Arc<Mutex<Option<SourceError>>>,
}

impl CpalSource {
    /// Open the system default input device.
    pub fn open_default() -> Result<Self> {
        Self::open_with_preference(None)
    }

    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no input device exists at all,
    /// `AudioDevice` / `AudioStream` when cpal fails to configure or start
    /// the stream.
    pub fn open_with_preference(preferred_device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| MicstreamError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(MicstreamError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| MicstreamError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let spec = FrameSpec::pcm16(sample_rate, channels);

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // One second of handoff between the callback and the capture thread.
        let (mut producer, consumer) = HeapRb::<u8>::new(spec.bytes_per_second()).split();
        let stream_error = Arc::new(Mutex::new(None));
        let frame_size = spec.frame_size();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let slot = Arc::clone(&stream_error);
                let mut byte_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        byte_buf.resize(data.len() * 2, 0);
                        for (sample, out) in data.iter().zip(byte_buf.chunks_exact_mut(2)) {
                            let s = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                            out.copy_from_slice(&s.to_le_bytes());
                        }
                        push_frames(&mut producer, &byte_buf, frame_size);
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        *slot.lock() = Some(classify_stream_error(&err));
                    },
                    None,
                )
            }

            SampleFormat::I16 => {
                let slot = Arc::clone(&stream_error);
                let mut byte_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        byte_buf.resize(data.len() * 2, 0);
                        for (sample, out) in data.iter().zip(byte_buf.chunks_exact_mut(2)) {
                            out.copy_from_slice(&sample.to_le_bytes());
                        }
                        push_frames(&mut producer, &byte_buf, frame_size);
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        *slot.lock() = Some(classify_stream_error(&err));
                    },
                    None,
                )
            }

            SampleFormat::U8 => {
                let slot = Arc::clone(&stream_error);
                let mut byte_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        byte_buf.resize(data.len() * 2, 0);
                        for (sample, out) in data.iter().zip(byte_buf.chunks_exact_mut(2)) {
                            let s = (i16::from(*sample) - 128) * 256;
                            out.copy_from_slice(&s.to_le_bytes());
                        }
                        push_frames(&mut producer, &byte_buf, frame_size);
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        *slot.lock() = Some(classify_stream_error(&err));
                    },
                    None,
                )
            }

            fmt => {
                return Err(MicstreamError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MicstreamError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MicstreamError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            consumer,
            spec,
            stream_error,
        })
    }
}

impl AudioSource for CpalSource {
    fn frame_spec(&self) -> FrameSpec {
        self.spec
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> std::result::Result<(), SourceError> {
        let mut filled = 0;
        while filled < buf.len() {
            if let Some(err) = self.stream_error.lock().take() {
                return Err(err);
            }
            let n = self.consumer.pop_slice(&mut buf[filled..]);
            filled += n;
            if n == 0 {
                // Nothing buffered yet — yield instead of spinning.
                std::thread::sleep(Duration::from_millis(EMPTY_SLEEP_MS));
            }
        }
        Ok(())
    }
}

/// Push whole frames into the handoff ring, dropping what does not fit.
///
/// Only frame-aligned byte counts enter the ring, so stream alignment
/// survives drops under callback pressure.
fn push_frames(producer: &mut ringbuf::HeapProd<u8>, bytes: &[u8], frame_size: usize) {
    let fit = (producer.vacant_len() / frame_size) * frame_size;
    let take = fit.min(bytes.len());
    producer.push_slice(&bytes[..take]);
    if take < bytes.len() {
        warn!("capture handoff full: dropped {} bytes", bytes.len() - take);
    }
}

fn classify_stream_error(err: &cpal::StreamError) -> SourceError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            SourceError::fatal("input device no longer available")
        }
        other => SourceError::transient(other.to_string()),
    }
}
