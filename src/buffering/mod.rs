//! Concurrent audio ring buffer.
//!
//! ## Design
//!
//! One producer — the capture worker — appends whole frames with
//! [`AudioRing::write`] and never waits for readers. Each consuming reader
//! owns an independent cursor ([`StreamReader`], created by
//! [`AudioRing::stream_reader`]) and drains the stream exactly once, in
//! order, from its own position. Polling consumers take cursor-free
//! snapshots of the newest window with [`AudioRing::latest`].
//!
//! When a write would lap a reader, that reader's oldest unread bytes are
//! evicted first: realtime capture favors dropping stale audio over blocking
//! the device or growing without bound. Evictions are counted, never raised.
//!
//! All state lives behind one `parking_lot::Mutex`; a `Condvar` wakes every
//! blocked reader on write and on close.

pub mod frame;
pub mod reader;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{MicstreamError, Result};
use frame::FrameSpec;
use reader::StreamReader;

/// Shared ring state. Only ever touched with the mutex held.
struct RingState {
    storage: Box<[u8]>,
    /// Total bytes ever appended; the write cursor is `total_written % capacity`.
    total_written: u64,
    /// Stream offset of each live consuming reader, keyed by reader id.
    /// Invariant: every offset is frame-aligned and within `capacity` of
    /// `total_written`.
    readers: HashMap<u64, u64>,
    /// Terminal flag, set once by `close()`.
    closed: bool,
    /// Cumulative unread bytes evicted across all readers.
    dropped_bytes: u64,
}

impl RingState {
    /// Append at stream position `pos`, splitting across the end of storage.
    fn copy_in(&mut self, pos: u64, data: &[u8]) {
        let capacity = self.storage.len();
        let start = (pos % capacity as u64) as usize;
        let first = (capacity - start).min(data.len());
        self.storage[start..start + first].copy_from_slice(&data[..first]);
        let rest = &data[first..];
        self.storage[..rest.len()].copy_from_slice(rest);
    }

    /// Copy `len` stream bytes starting at position `pos` into a fresh Vec,
    /// splitting across the end of storage.
    fn copy_out(&self, pos: u64, len: usize) -> Vec<u8> {
        let capacity = self.storage.len();
        let start = (pos % capacity as u64) as usize;
        let first = (capacity - start).min(len);
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.storage[start..start + first]);
        out.extend_from_slice(&self.storage[..len - first]);
        out
    }
}

/// Fixed-capacity circular byte store for one PCM stream.
///
/// Share as `Arc<AudioRing>`: the capture worker holds one clone and writes,
/// any number of reader threads hold clones and consume or snapshot.
pub struct AudioRing {
    spec: FrameSpec,
    capacity: usize,
    state: Mutex<RingState>,
    /// Signalled on every write and on close.
    data_ready: Condvar,
    next_reader_id: AtomicU64,
}

impl AudioRing {
    /// Create a ring holding `capacity_bytes` of audio at `spec`.
    ///
    /// The capacity is fixed for the ring's lifetime; it is never resized.
    ///
    /// # Errors
    /// `InvalidConfig` when the capacity is zero or not frame-aligned.
    pub fn new(spec: FrameSpec, capacity_bytes: usize) -> Result<Arc<Self>> {
        if capacity_bytes == 0 || !spec.is_frame_aligned(capacity_bytes) {
            return Err(MicstreamError::InvalidConfig(format!(
                "ring capacity {capacity_bytes} must be a positive multiple of the {}-byte frame size",
                spec.frame_size()
            )));
        }
        Ok(Arc::new(Self {
            spec,
            capacity: capacity_bytes,
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity_bytes].into_boxed_slice(),
                total_written: 0,
                readers: HashMap::new(),
                closed: false,
                dropped_bytes: 0,
            }),
            data_ready: Condvar::new(),
            next_reader_id: AtomicU64::new(0),
        }))
    }

    /// Append whole frames at the write cursor, evicting each reader's
    /// oldest unread bytes when the write would lap it. Returns how many
    /// bytes were evicted.
    ///
    /// Never waits on readers; wakes every blocked reader.
    ///
    /// # Errors
    /// - `UnalignedWrite` when `data` is not a whole number of frames.
    /// - `BufferClosed` after `close()` — the producer loop uses this as its
    ///   shutdown signal.
    pub fn write(&self, data: &[u8]) -> Result<u64> {
        if !self.spec.is_frame_aligned(data.len()) {
            return Err(MicstreamError::UnalignedWrite {
                len: data.len(),
                frame_size: self.spec.frame_size(),
            });
        }
        if data.is_empty() {
            return Ok(0);
        }

        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MicstreamError::BufferClosed);
            }

            // A write longer than the whole ring keeps only its final
            // `capacity` bytes; the prefix never lands in storage.
            let skipped = data.len().saturating_sub(self.capacity);
            let stored = &data[skipped..];

            let new_total = state.total_written + data.len() as u64;
            let floor = new_total.saturating_sub(self.capacity as u64);

            // Advance every reader the new frontier would lap.
            let mut evicted = 0u64;
            for offset in state.readers.values_mut() {
                if *offset < floor {
                    evicted += floor - *offset;
                    *offset = floor;
                }
            }

            let pos = state.total_written + skipped as u64;
            state.copy_in(pos, stored);
            state.total_written = new_total;

            if evicted > 0 {
                state.dropped_bytes += evicted;
                warn!(
                    evicted,
                    total_dropped = state.dropped_bytes,
                    "ring overflow: unread audio evicted"
                );
            }
            evicted
        };

        // Notify outside the lock so woken readers can take it immediately.
        self.data_ready.notify_all();
        Ok(evicted)
    }

    /// Snapshot of the most recent `len` bytes, without touching any cursor.
    ///
    /// This is the polling delivery contract: repeated calls may return
    /// overlapping data. Returns `Ok(None)` while fewer than `len` bytes are
    /// resident; it never blocks.
    ///
    /// # Errors
    /// `UnalignedRead` / `ReadBeyondCapacity` on a bad `len`, `BufferClosed`
    /// after close.
    pub fn latest(&self, len: usize) -> Result<Option<Vec<u8>>> {
        self.check_read_len(len)?;
        let state = self.state.lock();
        if state.closed {
            return Err(MicstreamError::BufferClosed);
        }
        let resident = state.total_written.min(self.capacity as u64);
        if (len as u64) > resident {
            return Ok(None);
        }
        Ok(Some(state.copy_out(state.total_written - len as u64, len)))
    }

    /// Close the ring: every blocked reader wakes into `BufferClosed`, and
    /// once the buffered tail is drained all further reads observe it too.
    ///
    /// Idempotent — closing twice is a no-op. This is the single
    /// cancellation mechanism for consumers.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.data_ready.notify_all();
    }

    /// Register a new consuming reader with its own cursor.
    ///
    /// The cursor starts at the oldest byte still resident, so a reader
    /// attached mid-stream picks up the buffered window and then follows
    /// live. Sessions never resume a previous reader's position; the cursor
    /// dies with the `StreamReader`.
    pub fn stream_reader(self: &Arc<Self>) -> StreamReader {
        let id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let offset = state
            .total_written
            .saturating_sub(self.capacity as u64);
        state.readers.insert(id, offset);
        drop(state);
        StreamReader::new(Arc::clone(self), id)
    }

    /// Frame parameters this ring was created with.
    pub fn frame_spec(&self) -> FrameSpec {
        self.spec
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Cumulative unread bytes evicted by overflow, across all readers.
    pub fn dropped_bytes(&self) -> u64 {
        self.state.lock().dropped_bytes
    }

    // ── Internals shared with StreamReader ───────────────────────────────

    pub(crate) fn check_read_len(&self, len: usize) -> Result<()> {
        if !self.spec.is_frame_aligned(len) {
            return Err(MicstreamError::UnalignedRead {
                requested: len,
                frame_size: self.spec.frame_size(),
            });
        }
        if len > self.capacity {
            return Err(MicstreamError::ReadBeyondCapacity {
                requested: len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Blocking consuming read for reader `id`: exactly `len` bytes once
    /// available, advancing that reader's cursor.
    pub(crate) fn consume(
        &self,
        id: u64,
        len: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        self.check_read_len(len)?;

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            // Reader entries live exactly as long as their StreamReader, and
            // eviction keeps every offset within `capacity` of the frontier.
            let offset = state.readers[&id];
            let available = state.total_written - offset;
            if available >= len as u64 {
                let data = state.copy_out(offset, len);
                state.readers.insert(id, offset + len as u64);
                return Ok(data);
            }

            // Closed with not enough left: terminal. Buffered audio written
            // before close is still drained by the arm above.
            if state.closed {
                return Err(MicstreamError::BufferClosed);
            }

            match deadline {
                None => self.data_ready.wait(&mut state),
                Some(deadline) => {
                    if self
                        .data_ready
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return Err(MicstreamError::ReadTimeout {
                            requested: len,
                            available: available as usize,
                        });
                    }
                }
            }
        }
    }

    /// Unread bytes currently available to reader `id`.
    pub(crate) fn available_for(&self, id: u64) -> usize {
        let state = self.state.lock();
        (state.total_written - state.readers[&id]) as usize
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.state.lock().readers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono8k() -> FrameSpec {
        FrameSpec::pcm16(8000, 1) // 2-byte frames
    }

    /// Byte pattern where every byte encodes its stream position (mod 251,
    /// a prime, so the pattern never lines up with chunk or ring sizes).
    fn pattern(start: usize, len: usize) -> Vec<u8> {
        (start..start + len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn rejects_unaligned_capacity() {
        assert!(AudioRing::new(mono8k(), 0).is_err());
        assert!(AudioRing::new(mono8k(), 4097).is_err());
        assert!(AudioRing::new(mono8k(), 4096).is_ok());
    }

    #[test]
    fn rejects_unaligned_read_size() {
        let ring = AudioRing::new(mono8k(), 8192).unwrap();
        let mut reader = ring.stream_reader();
        match reader.read(3) {
            Err(MicstreamError::UnalignedRead {
                requested: 3,
                frame_size: 2,
            }) => {}
            other => panic!("expected UnalignedRead, got {other:?}"),
        }
        // latest() enforces the same rule
        assert!(matches!(
            ring.latest(5),
            Err(MicstreamError::UnalignedRead { .. })
        ));
    }

    #[test]
    fn rejects_unaligned_write() {
        let ring = AudioRing::new(mono8k(), 8192).unwrap();
        assert!(matches!(
            ring.write(&[0u8; 7]),
            Err(MicstreamError::UnalignedWrite { .. })
        ));
    }

    #[test]
    fn rejects_read_beyond_capacity() {
        let ring = AudioRing::new(mono8k(), 4096).unwrap();
        let mut reader = ring.stream_reader();
        assert!(matches!(
            reader.read(8192),
            Err(MicstreamError::ReadBeyondCapacity { .. })
        ));
    }

    #[test]
    fn read_returns_written_bytes_in_order() {
        let ring = AudioRing::new(mono8k(), 8192).unwrap();
        let mut reader = ring.stream_reader();

        ring.write(&pattern(0, 2048)).unwrap();
        ring.write(&pattern(2048, 2048)).unwrap();

        assert_eq!(reader.available(), 4096);
        assert_eq!(reader.read(1024).unwrap(), pattern(0, 1024));
        assert_eq!(reader.read(3072).unwrap(), pattern(1024, 3072));
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn wrapping_writes_and_reads_split_correctly() {
        let ring = AudioRing::new(mono8k(), 4096).unwrap();
        let mut reader = ring.stream_reader();

        // Move both cursors near the end of storage, then wrap.
        ring.write(&pattern(0, 3072)).unwrap();
        assert_eq!(reader.read(3072).unwrap(), pattern(0, 3072));

        ring.write(&pattern(3072, 2048)).unwrap(); // crosses the boundary
        assert_eq!(reader.read(2048).unwrap(), pattern(3072, 2048));
    }

    #[test]
    fn overflow_evicts_oldest_and_keeps_most_recent_capacity() {
        let capacity = 4096;
        let ring = AudioRing::new(mono8k(), capacity).unwrap();
        let mut reader = ring.stream_reader();

        // Writes totaling 3x capacity with no reads.
        let total = capacity * 3;
        for start in (0..total).step_by(1024) {
            ring.write(&pattern(start, 1024)).unwrap();
        }

        assert_eq!(reader.available(), capacity);
        assert_eq!(ring.dropped_bytes(), (total - capacity) as u64);
        assert_eq!(
            reader.read(capacity).unwrap(),
            pattern(total - capacity, capacity)
        );
    }

    #[test]
    fn oversized_write_keeps_only_the_tail() {
        let capacity = 2048;
        let ring = AudioRing::new(mono8k(), capacity).unwrap();
        let mut reader = ring.stream_reader();

        let big = pattern(0, capacity * 2 + 512);
        ring.write(&big).unwrap();

        assert_eq!(reader.available(), capacity);
        let data = reader.read(capacity).unwrap();
        assert_eq!(&data[..], &big[big.len() - capacity..]);
    }

    #[test]
    fn eviction_is_counted_per_lapped_reader() {
        let ring = AudioRing::new(mono8k(), 2048).unwrap();
        let _slow = ring.stream_reader();
        let _slower = ring.stream_reader();

        ring.write(&pattern(0, 2048)).unwrap();
        let evicted = ring.write(&pattern(2048, 1024)).unwrap();

        // Both readers were lapped by 1024 bytes.
        assert_eq!(evicted, 2048);
        assert_eq!(ring.dropped_bytes(), 2048);
    }

    #[test]
    fn latest_returns_newest_window_without_consuming() {
        let ring = AudioRing::new(mono8k(), 8192).unwrap();
        let mut reader = ring.stream_reader();

        assert_eq!(ring.latest(1024).unwrap(), None);

        ring.write(&pattern(0, 4096)).unwrap();
        let first = ring.latest(1024).unwrap().unwrap();
        let second = ring.latest(1024).unwrap().unwrap();
        assert_eq!(first, pattern(3072, 1024));
        assert_eq!(first, second); // snapshots overlap freely

        // The consuming cursor was never touched.
        assert_eq!(reader.available(), 4096);
        assert_eq!(reader.read(4096).unwrap(), pattern(0, 4096));
    }

    #[test]
    fn late_reader_starts_at_oldest_resident_byte() {
        let capacity = 2048;
        let ring = AudioRing::new(mono8k(), capacity).unwrap();
        ring.write(&pattern(0, 3072)).unwrap(); // 1024 bytes already lapped

        let mut reader = ring.stream_reader();
        assert_eq!(reader.available(), capacity);
        assert_eq!(reader.read(capacity).unwrap(), pattern(1024, capacity));
    }

    #[test]
    fn close_is_idempotent_and_fails_subsequent_io() {
        let ring = AudioRing::new(mono8k(), 4096).unwrap();
        let mut reader = ring.stream_reader();
        ring.write(&pattern(0, 1024)).unwrap();

        ring.close();
        ring.close(); // no panic, no effect
        assert!(ring.is_closed());

        assert!(matches!(
            ring.write(&pattern(0, 1024)),
            Err(MicstreamError::BufferClosed)
        ));
        assert!(matches!(
            ring.latest(1024),
            Err(MicstreamError::BufferClosed)
        ));

        // Audio buffered before close still drains; the terminal signal
        // arrives once the remainder cannot satisfy the read.
        assert_eq!(reader.read(1024).unwrap(), pattern(0, 1024));
        assert!(matches!(
            reader.read(1024),
            Err(MicstreamError::BufferClosed)
        ));
    }

    #[test]
    fn read_timeout_expires_on_empty_ring() {
        let ring = AudioRing::new(mono8k(), 4096).unwrap();
        let mut reader = ring.stream_reader();

        let started = Instant::now();
        match reader.read_timeout(2048, Duration::from_millis(20)) {
            Err(MicstreamError::ReadTimeout {
                requested: 2048,
                available: 0,
            }) => {}
            other => panic!("expected ReadTimeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_length_read_returns_immediately() {
        let ring = AudioRing::new(mono8k(), 4096).unwrap();
        let mut reader = ring.stream_reader();
        assert_eq!(reader.read(0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn dropping_a_reader_unregisters_its_cursor() {
        let ring = AudioRing::new(mono8k(), 2048).unwrap();
        let slow = ring.stream_reader();
        ring.write(&pattern(0, 2048)).unwrap();
        drop(slow);

        // With no readers left to lap, further writes evict nothing.
        assert_eq!(ring.write(&pattern(2048, 2048)).unwrap(), 0);
        assert_eq!(ring.dropped_bytes(), 0);
    }
}
