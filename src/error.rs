use thiserror::Error;

/// All errors produced by micstream.
#[derive(Debug, Error)]
pub enum MicstreamError {
    #[error("read of {requested} bytes is not aligned to the {frame_size}-byte frame size")]
    UnalignedRead { requested: usize, frame_size: usize },

    #[error("write of {len} bytes is not a whole number of {frame_size}-byte frames")]
    UnalignedWrite { len: usize, frame_size: usize },

    #[error("read of {requested} bytes can never be satisfied by a {capacity}-byte ring")]
    ReadBeyondCapacity { requested: usize, capacity: usize },

    #[error("ring buffer is closed")]
    BufferClosed,

    #[error("timed out waiting for {requested} bytes ({available} available)")]
    ReadTimeout { requested: usize, available: usize },

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio source failed: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MicstreamError>;

/// Errors reported by an [`AudioSource`](crate::source::AudioSource).
///
/// The capture loop recovers transient failures locally (log and retry) and
/// treats fatal ones as end-of-stream: the ring is closed and the loop stops.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// One chunk failed to read; the device is still usable.
    #[error("transient source read failure: {reason}")]
    Transient { reason: String },

    /// The device is gone or unusable; capture cannot continue.
    #[error("fatal source failure: {reason}")]
    Fatal { reason: String },
}

impl SourceError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Whether the capture loop must terminate on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
