//! Buffered decoding of the raw event byte stream
//!
//! The ring is drained in large chunks into a local buffer so the decoder can
//! read fixed-size fields without touching shared memory per field. Any
//! [`ByteSource`] can feed the reader: the live ring [`Consumer`] or a
//! recorded stream through [`ReadSource`].

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ring::Consumer;
use crate::domain::ProtocolError;

/// Default size of the local receive buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Something the reader can drain bytes from
pub trait ByteSource {
    /// Move available bytes into `buf`. `Ok(0)` means nothing is available
    /// right now, which is final only once [`ByteSource::is_closed`] is true.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// No bytes beyond those already queued will arrive
    fn is_closed(&self) -> bool;
}

impl ByteSource for Consumer {
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.pop(buf))
    }

    fn is_closed(&self) -> bool {
        Consumer::is_closed(self)
    }
}

/// Adapts any [`Read`] (file, pipe, byte slice) into a [`ByteSource`]
pub struct ReadSource<R> {
    inner: R,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, eof: false }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        loop {
            match self.inner.read(buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.eof
    }
}

/// Fixed-size little-endian field of the wire format
pub trait WireField: Sized + Copy {
    const SIZE: usize;

    /// Decode from exactly [`WireField::SIZE`] bytes
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn put_le(self, out: &mut Vec<u8>);
}

macro_rules! wire_field {
    ($($t:ty),*) => {$(
        impl WireField for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            #[inline]
            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

wire_field!(u8, u32, u64);

/// Decoder-side view of the event stream
pub struct EventReader<S> {
    source: S,
    buf: Box<[u8]>,
    /// First unread byte in `buf`
    start: usize,
    /// One past the last valid byte in `buf`
    end: usize,
    /// Stream offset of `buf[start]`
    offset: u64,
    stop: Option<Arc<AtomicBool>>,
}

impl<S: ByteSource> EventReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_capacity(source, DEFAULT_BUFFER_SIZE)
    }

    /// # Panics
    /// Panics if `capacity` is smaller than the largest wire field
    pub fn with_capacity(source: S, capacity: usize) -> Self {
        assert!(capacity >= u64::SIZE, "reader buffer must hold at least one u64");
        Self {
            source,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            offset: 0,
            stop: None,
        }
    }

    /// Abort waits on an empty source once `stop` becomes true
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Bytes consumed from the stream so far
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read one field.
    ///
    /// # Errors
    /// `Truncated` if the source closed before the field was complete,
    /// `Interrupted` if the stop flag was raised while waiting
    pub fn pop<T: WireField>(&mut self) -> Result<T, ProtocolError> {
        if !self.ensure(T::SIZE)? {
            return Err(ProtocolError::Truncated { offset: self.offset });
        }
        let value = T::from_le_slice(&self.buf[self.start..self.start + T::SIZE]);
        self.start += T::SIZE;
        self.offset += T::SIZE as u64;
        Ok(value)
    }

    /// Read the tag of the next event, or `None` if the stream ended cleanly
    /// on an event boundary.
    ///
    /// # Errors
    /// `Interrupted` if the stop flag was raised while waiting
    pub fn next_tag(&mut self) -> Result<Option<u8>, ProtocolError> {
        if !self.ensure(1)? {
            return Ok(None);
        }
        self.pop::<u8>().map(Some)
    }

    /// Wait until `n` unread bytes are buffered. Returns `false` if the
    /// source closed with fewer available.
    fn ensure(&mut self, n: usize) -> Result<bool, ProtocolError> {
        while self.end - self.start < n {
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            if self.refill()? > 0 {
                continue;
            }
            if self.source.is_closed() {
                // `closed` is published after the last bytes, so one more
                // drain is authoritative
                if self.refill()? > 0 {
                    continue;
                }
                return Ok(false);
            }
            if self.stop.as_ref().is_some_and(|s| s.load(Ordering::Relaxed)) {
                return Err(ProtocolError::Interrupted { offset: self.offset });
            }
            std::thread::yield_now();
        }
        Ok(true)
    }

    /// Pull whatever is available, up to the free tail of `buf`
    fn refill(&mut self) -> Result<usize, ProtocolError> {
        let got = self.source.fill(&mut self.buf[self.end..])?;
        self.end += got;
        Ok(got)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ring::{region_len, Ring};
    use crate::transport::shm::SharedRegion;

    fn from_bytes(bytes: &[u8], capacity: usize) -> EventReader<ReadSource<&[u8]>> {
        EventReader::with_capacity(ReadSource::new(bytes), capacity)
    }

    #[test]
    fn test_pop_little_endian_fields() {
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        bytes.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());

        let mut reader = from_bytes(&bytes, 64);
        assert_eq!(reader.pop::<u8>().unwrap(), 7);
        assert_eq!(reader.pop::<u32>().unwrap(), 0x0102_0304);
        assert_eq!(reader.pop::<u64>().unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(reader.offset(), 13);
        assert_eq!(reader.next_tag().unwrap(), None);
    }

    #[test]
    fn test_fields_straddle_small_buffer() {
        let values: Vec<u64> = (0..100).map(|i| i * 0x0101_0101).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        // 11 bytes: every refill leaves a partial field behind
        let mut reader = from_bytes(&bytes, 11);
        for v in values {
            assert_eq!(reader.pop::<u64>().unwrap(), v);
        }
    }

    #[test]
    fn test_truncated_field() {
        let bytes = [1u8, 2, 3];
        let mut reader = from_bytes(&bytes, 64);
        assert!(matches!(reader.pop::<u32>(), Err(ProtocolError::Truncated { offset: 0 })));
    }

    #[test]
    fn test_empty_stream_has_no_tag() {
        let mut reader = from_bytes(&[], 64);
        assert_eq!(reader.next_tag().unwrap(), None);
    }

    #[test]
    fn test_stop_flag_interrupts_idle_ring() {
        let region = SharedRegion::anonymous(region_len(64)).unwrap();
        let (_producer, consumer) = Ring::create(region, 64).unwrap().split();
        let stop = Arc::new(AtomicBool::new(true));
        let mut reader = EventReader::new(consumer).with_stop_flag(stop);
        assert!(matches!(reader.next_tag(), Err(ProtocolError::Interrupted { offset: 0 })));
    }

    #[test]
    fn test_reads_ring_until_closed() {
        let region = SharedRegion::anonymous(region_len(64)).unwrap();
        let (mut producer, consumer) = Ring::create(region, 64).unwrap().split();
        producer.push(&42u32.to_le_bytes());
        drop(producer);

        let mut reader = EventReader::new(consumer);
        assert_eq!(reader.pop::<u32>().unwrap(), 42);
        assert_eq!(reader.next_tag().unwrap(), None);
    }
}
