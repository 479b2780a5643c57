//! The producer loop: source → ring, until stopped or the source dies.
//!
//! ## Loop (per iteration)
//!
//! ```text
//! 1. Check the running flag
//! 2. Blocking-read exactly one chunk from the source
//!    - transient error → log, count, retry immediately
//!    - fatal error     → close the ring, terminate
//! 3. ring.write(chunk) — never waits on readers; overflow evicts oldest
//! ```
//!
//! The loop applies no backpressure to the source: the device runs at its
//! own pace and the ring absorbs or drops the excess.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::buffering::AudioRing;
use crate::capture::CaptureDiagnostics;
use crate::events::{CaptureEvent, StopReason};
use crate::source::AudioSource;

/// All context the worker needs, passed as one struct so the spawn closure
/// stays tidy.
pub(crate) struct WorkerContext {
    pub source: Box<dyn AudioSource>,
    pub ring: Arc<AudioRing>,
    pub running: Arc<AtomicBool>,
    pub subscribers: Arc<Mutex<Vec<Sender<CaptureEvent>>>>,
    pub diagnostics: Arc<CaptureDiagnostics>,
    pub chunk_size: usize,
}

/// Run the capture loop until `ctx.running` clears or the source fails.
pub(crate) fn run(mut ctx: WorkerContext) {
    let spec = ctx.source.frame_spec();
    info!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        chunk_bytes = ctx.chunk_size,
        "capture loop started"
    );
    emit(
        &ctx.subscribers,
        CaptureEvent::Started {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
    );

    let mut chunk = vec![0u8; ctx.chunk_size];
    let reason = loop {
        if !ctx.running.load(Ordering::SeqCst) {
            break StopReason::Requested;
        }

        match ctx.source.read_chunk(&mut chunk) {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                // One lost chunk; capture continuity matters more.
                warn!("transient source error, retrying: {e}");
                ctx.diagnostics
                    .transient_source_errors
                    .fetch_add(1, Ordering::Relaxed);
                emit(
                    &ctx.subscribers,
                    CaptureEvent::SourceStalled {
                        detail: e.to_string(),
                    },
                );
                continue;
            }
            Err(e) => {
                error!("fatal source error, stopping capture: {e}");
                break StopReason::SourceFailed;
            }
        }

        match ctx.ring.write(&chunk) {
            Ok(0) => {}
            Ok(evicted) => {
                ctx.diagnostics
                    .bytes_dropped
                    .fetch_add(evicted, Ordering::Relaxed);
                emit(
                    &ctx.subscribers,
                    CaptureEvent::Overflow {
                        dropped_bytes: evicted,
                        total_dropped: ctx.ring.dropped_bytes(),
                    },
                );
            }
            // Closed from the outside — stop() owns the rest of shutdown.
            Err(_) => break StopReason::Requested,
        }
        ctx.diagnostics
            .chunks_captured
            .fetch_add(1, Ordering::Relaxed);
    };

    // Terminal: wake and fail every blocked reader.
    ctx.ring.close();
    ctx.running.store(false, Ordering::SeqCst);
    emit(&ctx.subscribers, CaptureEvent::Stopped { reason });
    info!(?reason, "capture loop stopped");

    // The source drops here, releasing the device on this thread.
}

/// Deliver an event to every live subscriber without ever blocking.
fn emit(subscribers: &Mutex<Vec<Sender<CaptureEvent>>>, event: CaptureEvent) {
    subscribers.lock().retain(|tx| {
        match tx.try_send(event.clone()) {
            Ok(()) => true,
            // A full channel loses this event; capture never stalls on it.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    });
}
