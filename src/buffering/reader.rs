//! Consuming readers: the pull-until-closed delivery contract.

use std::sync::Arc;
use std::time::Duration;

use super::AudioRing;
use crate::error::{MicstreamError, Result};

/// An independent consuming cursor over an [`AudioRing`].
///
/// Created by [`AudioRing::stream_reader`]. Every byte the producer writes is
/// delivered through this handle at most once and in write order, minus
/// bytes evicted by overflow when the reader falls a full capacity behind.
/// Dropping the reader retires its cursor.
pub struct StreamReader {
    ring: Arc<AudioRing>,
    id: u64,
}

impl StreamReader {
    pub(crate) fn new(ring: Arc<AudioRing>, id: u64) -> Self {
        Self { ring, id }
    }

    /// The ring this reader consumes from.
    pub fn ring(&self) -> &Arc<AudioRing> {
        &self.ring
    }

    /// Unread bytes currently buffered for this reader.
    pub fn available(&self) -> usize {
        self.ring.available_for(self.id)
    }

    /// Blocking read of exactly `len` bytes.
    ///
    /// Suspends the calling thread until the producer has supplied enough
    /// bytes or the ring closes.
    ///
    /// # Errors
    /// - `UnalignedRead` when `len` is not a whole number of frames — never
    ///   silently truncated or rounded.
    /// - `ReadBeyondCapacity` when `len` exceeds the ring capacity and could
    ///   never be satisfied.
    /// - `BufferClosed` once the ring is closed and fewer than `len` bytes
    ///   remain buffered. A read blocked when `close()` runs wakes into this
    ///   error; audio written before close still drains first.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ring.consume(self.id, len, None)
    }

    /// Like [`read`](Self::read), but gives up after `timeout` so a stalled
    /// producer cannot hang the caller forever.
    ///
    /// # Errors
    /// `ReadTimeout` when the wait elapses, plus everything `read` returns.
    pub fn read_timeout(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.ring.consume(self.id, len, Some(timeout))
    }

    /// Turn this reader into an iterator of exactly-`chunk_bytes` blocks.
    ///
    /// The sequence is infinite while the ring is open; after close it
    /// drains the buffered whole chunks and then ends. It is not
    /// restartable.
    ///
    /// # Errors
    /// `chunk_bytes` is validated up front (`UnalignedRead`,
    /// `ReadBeyondCapacity`, `InvalidConfig` for zero) so the iterator
    /// itself cannot fail.
    pub fn chunks(self, chunk_bytes: usize) -> Result<ChunkStream> {
        if chunk_bytes == 0 {
            return Err(MicstreamError::InvalidConfig(
                "chunk size must be positive".into(),
            ));
        }
        self.ring.check_read_len(chunk_bytes)?;
        Ok(ChunkStream {
            reader: self,
            chunk_bytes,
        })
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.ring.unregister(self.id);
    }
}

/// Blocking iterator over fixed-size chunks; see [`StreamReader::chunks`].
pub struct ChunkStream {
    reader: StreamReader,
    chunk_bytes: usize,
}

impl ChunkStream {
    /// Size of every yielded block, in bytes.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }
}

impl Iterator for ChunkStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        // chunk_bytes was validated in chunks(); the only remaining failure
        // is closure, which ends the stream.
        self.reader.read(self.chunk_bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::frame::FrameSpec;

    #[test]
    fn chunks_rejects_invalid_sizes_up_front() {
        let ring = AudioRing::new(FrameSpec::pcm16(8000, 1), 4096).unwrap();
        assert!(matches!(
            ring.stream_reader().chunks(0),
            Err(MicstreamError::InvalidConfig(_))
        ));
        assert!(matches!(
            ring.stream_reader().chunks(3),
            Err(MicstreamError::UnalignedRead { .. })
        ));
        assert!(matches!(
            ring.stream_reader().chunks(8192),
            Err(MicstreamError::ReadBeyondCapacity { .. })
        ));
    }

    #[test]
    fn chunk_stream_ends_on_close() {
        let ring = AudioRing::new(FrameSpec::pcm16(8000, 1), 4096).unwrap();
        let mut stream = ring.stream_reader().chunks(1024).unwrap();

        ring.write(&vec![7u8; 2048]).unwrap();
        assert_eq!(stream.next().unwrap().len(), 1024);
        assert_eq!(stream.next().unwrap().len(), 1024);

        ring.close();
        assert!(stream.next().is_none());
    }
}
