//! Lifecycle and diagnostics events emitted by the capture worker.
//!
//! Events are serializable so a delivery layer can forward them to clients
//! verbatim. Subscribe with
//! [`CaptureEngine::subscribe`](crate::CaptureEngine::subscribe); each
//! subscriber gets a bounded channel, and a subscriber that falls behind
//! loses events rather than stalling capture.

use serde::{Deserialize, Serialize};

/// One event from the capture worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CaptureEvent {
    /// The worker opened its source and entered the loop.
    Started { sample_rate: u32, channels: u16 },
    /// The ring evicted unread audio to make room for a write.
    Overflow {
        /// Bytes evicted by this write.
        dropped_bytes: u64,
        /// Cumulative bytes evicted since the ring was created.
        total_dropped: u64,
    },
    /// One chunk failed to read; the loop is retrying.
    SourceStalled { detail: String },
    /// Terminal: the loop exited and the ring is closed.
    Stopped { reason: StopReason },
}

/// Why the capture loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The source reported a fatal error.
    SourceFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_event_serializes_with_tag_and_camel_case() {
        let event = CaptureEvent::Overflow {
            dropped_bytes: 2048,
            total_dropped: 6144,
        };

        let json = serde_json::to_value(&event).expect("serialize overflow event");
        assert_eq!(json["type"], "overflow");
        assert_eq!(json["droppedBytes"], 2048);
        assert_eq!(json["totalDropped"], 6144);

        let round_trip: CaptureEvent =
            serde_json::from_value(json).expect("deserialize overflow event");
        assert!(matches!(
            round_trip,
            CaptureEvent::Overflow {
                dropped_bytes: 2048,
                ..
            }
        ));
    }

    #[test]
    fn stop_reason_serializes_lowercase() {
        let event = CaptureEvent::Stopped {
            reason: StopReason::SourceFailed,
        };

        let json = serde_json::to_value(&event).expect("serialize stopped event");
        assert_eq!(json["type"], "stopped");
        assert_eq!(json["reason"], "sourcefailed");

        let round_trip: CaptureEvent =
            serde_json::from_value(json).expect("deserialize stopped event");
        assert!(matches!(
            round_trip,
            CaptureEvent::Stopped {
                reason: StopReason::SourceFailed
            }
        ));
    }

    #[test]
    fn started_event_round_trips() {
        let event = CaptureEvent::Started {
            sample_rate: 48000,
            channels: 2,
        };
        let json = serde_json::to_string(&event).expect("serialize started event");
        let round_trip: CaptureEvent =
            serde_json::from_str(&json).expect("deserialize started event");
        assert!(matches!(
            round_trip,
            CaptureEvent::Started {
                sample_rate: 48000,
                channels: 2
            }
        ));
    }
}
