//! # micstream
//!
//! Continuous audio capture with a bounded, lossy ring buffer.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalSource (lock-free handoff) → capture worker thread
//!                                                    │ write()
//!                                              AudioRing (Mutex + Condvar)
//!                                              ┌─────┴──────────┐
//!                                        StreamReader        latest()
//!                                      (consuming chunks)  (polling snapshots)
//! ```
//!
//! The producer never blocks on consumers: when a reader falls a full ring
//! behind, its oldest unread bytes are evicted and counted. Readers block
//! until enough whole frames arrive or the ring closes; closing is the one
//! cancellation mechanism and wakes every waiter.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod capture;
pub mod error;
pub mod events;
pub mod source;

// Convenience re-exports for downstream crates
pub use buffering::frame::FrameSpec;
pub use buffering::reader::{ChunkStream, StreamReader};
pub use buffering::AudioRing;
pub use capture::{CaptureConfig, CaptureDiagnostics, CaptureEngine, DiagnosticsSnapshot};
pub use error::{MicstreamError, Result, SourceError};
pub use events::{CaptureEvent, StopReason};
pub use source::{device::DeviceInfo, AudioSource, MockSource};

#[cfg(feature = "audio-cpal")]
pub use source::CpalSource;
