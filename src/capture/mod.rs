//! `CaptureEngine` — capture lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! CaptureEngine::new(config)
//!     └─► start()            → source opened on the worker thread,
//!                              ring built, loop running
//!         └─► stop()         → running=false, ring closed, thread joined
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state
//! returns an error rather than panicking. A stopped engine can be started
//! again; each start builds a fresh ring and the old one stays closed.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). The source is therefore opened *inside* the worker thread and
//! never crosses a thread boundary. A sync mpsc handshake propagates the
//! open error — or the freshly built ring — back to the `start()` caller.

pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::buffering::{frame::FrameSpec, AudioRing};
use crate::error::{MicstreamError, Result};
use crate::events::CaptureEvent;
use crate::source::AudioSource;

/// Event channel capacity per subscriber.
const EVENT_CAP: usize = 256;

/// Configuration for `CaptureEngine`.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Frames pulled from the source per loop iteration.
    /// Default: 2048 (4096 bytes of 16-bit mono).
    pub chunk_frames: usize,
    /// Ring capacity expressed as a window of time. Default: 15 s.
    pub buffer_duration: Duration,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 2048,
            buffer_duration: Duration::from_secs(15),
            preferred_device: None,
        }
    }
}

/// Counters maintained by the capture worker.
///
/// All fields are cumulative since the last `start()`.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub chunks_captured: AtomicU64,
    pub transient_source_errors: AtomicU64,
    pub bytes_dropped: AtomicU64,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.chunks_captured.store(0, Ordering::Relaxed);
        self.transient_source_errors.store(0, Ordering::Relaxed);
        self.bytes_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_captured: self.chunks_captured.load(Ordering::Relaxed),
            transient_source_errors: self.transient_source_errors.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_captured: u64,
    pub transient_source_errors: u64,
    pub bytes_dropped: u64,
}

/// The top-level capture handle.
///
/// `CaptureEngine` is `Send + Sync` — all fields use interior mutability, so
/// it can sit in an `Arc` shared between a control surface and the threads
/// that read audio.
pub struct CaptureEngine {
    config: CaptureConfig,
    /// `true` while the worker loop is active.
    running: Arc<AtomicBool>,
    /// Ring of the current (or most recent) session.
    ring: Mutex<Option<Arc<AudioRing>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<Mutex<Vec<Sender<CaptureEvent>>>>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CaptureEngine {
    /// Create a new engine. Does not start capturing — call `start()`.
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            ring: Mutex::new(None),
            worker: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    /// Start capturing from the configured input device.
    ///
    /// Blocks until the device is confirmed open (or fails), then returns
    /// the session's ring. The worker keeps running in the background.
    ///
    /// # Errors
    /// - `AlreadyRunning` if already started.
    /// - `NoDefaultInputDevice` / `AudioDevice` / `AudioStream` on device
    ///   errors.
    #[cfg(feature = "audio-cpal")]
    pub fn start(&self) -> Result<Arc<AudioRing>> {
        let preferred = self.config.preferred_device.clone();
        self.start_with_device(preferred)
    }

    /// Start capturing from a named input device (`None` = system default).
    #[cfg(feature = "audio-cpal")]
    pub fn start_with_device(&self, preferred: Option<String>) -> Result<Arc<AudioRing>> {
        use crate::source::CpalSource;
        self.start_with_source(move || CpalSource::open_with_preference(preferred.as_deref()))
    }

    /// Start capturing from any [`AudioSource`].
    ///
    /// The factory runs on the worker thread so `!Send` sources (cpal) never
    /// cross threads; it is also how tests inject a [`MockSource`](crate::MockSource).
    pub fn start_with_source<S, F>(&self, open_source: F) -> Result<Arc<AudioRing>>
    where
        S: AudioSource + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        if self.config.chunk_frames == 0 {
            return Err(MicstreamError::InvalidConfig(
                "chunk_frames must be positive".into(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MicstreamError::AlreadyRunning);
        }

        // A previous session's worker has already exited; reap its handle.
        if let Some(stale) = self.worker.lock().take() {
            let _ = stale.join();
        }
        self.diagnostics.reset();

        let chunk_frames = self.config.chunk_frames;
        let buffer_duration = self.config.buffer_duration;
        let running = Arc::clone(&self.running);
        let subscribers = Arc::clone(&self.subscribers);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync handshake: the worker reports the freshly built ring (or the
        // open error) before start() returns.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<Arc<AudioRing>>>();

        let spawned = std::thread::Builder::new()
            .name("micstream-capture".into())
            .spawn(move || {
                // Open the source on THIS thread — cpal streams are !Send.
                let source = match open_source() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                let spec: FrameSpec = source.frame_spec();
                let chunk_size = chunk_frames * spec.frame_size();
                let capacity = spec.bytes_for(buffer_duration).max(chunk_size);
                let ring = match AudioRing::new(spec, capacity) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                let _ = open_tx.send(Ok(Arc::clone(&ring)));

                worker::run(worker::WorkerContext {
                    source: Box::new(source),
                    ring,
                    running,
                    subscribers,
                    diagnostics,
                    chunk_size,
                });
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(MicstreamError::Io(e));
            }
        };

        match open_rx.recv() {
            Ok(Ok(ring)) => {
                *self.ring.lock() = Some(Arc::clone(&ring));
                *self.worker.lock() = Some(handle);
                info!("capture started");
                Ok(ring)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — the worker died.
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                Err(MicstreamError::Other(anyhow::anyhow!(
                    "capture worker died before reporting startup"
                )))
            }
        }
    }

    /// Stop capture: close the ring (waking every blocked reader into
    /// `BufferClosed`), terminate the worker and join its thread. The source
    /// handle is released before this returns.
    ///
    /// # Errors
    /// `NotRunning` if the engine is not currently capturing.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(MicstreamError::NotRunning);
        }

        // Closing the ring is the cancellation signal: it wakes blocked
        // readers and makes the worker's next write fail fast.
        if let Some(ring) = self.ring.lock().as_ref() {
            ring.close();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("capture worker panicked");
            }
        }
        info!("capture stopped");
        Ok(())
    }

    /// Ring of the current (or most recent) session, if any.
    pub fn ring(&self) -> Option<Arc<AudioRing>> {
        self.ring.lock().clone()
    }

    /// Whether the worker loop is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to capture events.
    ///
    /// Each subscriber gets its own bounded channel; one that falls behind
    /// loses events rather than stalling the producer.
    pub fn subscribe(&self) -> Receiver<CaptureEvent> {
        let (tx, rx) = bounded(EVENT_CAP);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Snapshot of the worker counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for CaptureEngine {
    /// Deterministic release: the worker is signalled, the ring closed and
    /// the thread joined even when `stop()` was never called.
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(ring) = self.ring.lock().as_ref() {
            ring.close();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = CaptureConfig::default();
        assert_eq!(config.chunk_frames, 2048);
        assert_eq!(config.buffer_duration, Duration::from_secs(15));
        assert!(config.preferred_device.is_none());
    }

    #[test]
    fn stop_before_start_is_rejected() {
        let engine = CaptureEngine::new(CaptureConfig::default());
        assert!(matches!(engine.stop(), Err(MicstreamError::NotRunning)));
    }

    #[test]
    fn zero_chunk_frames_is_rejected() {
        let engine = CaptureEngine::new(CaptureConfig {
            chunk_frames: 0,
            ..Default::default()
        });
        let result = engine.start_with_source(|| {
            Ok(crate::source::MockSource::new(FrameSpec::pcm16(8000, 1)))
        });
        assert!(matches!(result, Err(MicstreamError::InvalidConfig(_))));
        assert!(!engine.is_running());
    }
}
