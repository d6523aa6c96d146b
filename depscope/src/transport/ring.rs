//! # Single-Producer Single-Consumer Byte Ring
//!
//! Lock-free byte queue laid out in a [`SharedRegion`]:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────────┐
//! │ RingHeader (5 cache lines)   │ data[capacity]                       │
//! │ magic | capacity | head |    │ byte i of the stream lives at        │
//! │ tail | closed                │ data[i & (capacity - 1)]             │
//! └──────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! `head` and `tail` count bytes since creation and never wrap in practice
//! (2^64 bytes). `head - tail` is the fill level. The producer publishes data
//! with a `Release` store of `head`; the consumer frees space with a `Release`
//! store of `tail`. Neither side ever blocks in the kernel.
//!
//! The producer stores `head` before setting `closed`, so a consumer that sees
//! `closed` and then finds the ring empty has received every byte.

#![allow(unsafe_code)] // raw access to the shared data area

use std::sync::atomic::Ordering;
use std::sync::Arc;

use depscope_common::{RingHeader, RING_DATA_OFFSET, RING_MAGIC};
use log::debug;

use super::shm::SharedRegion;
use crate::domain::TransportError;

/// Busy-wait iterations before the producer starts yielding its time slice
const PUSH_SPIN_LIMIT: u32 = 1 << 10;

/// Busy-wait iterations a single [`Consumer::pop`] spends on an empty ring
const POP_SPIN_LIMIT: u32 = 1 << 12;

/// Region bytes needed for a ring with `capacity` data bytes
#[must_use]
pub const fn region_len(capacity: usize) -> usize {
    RING_DATA_OFFSET + capacity
}

/// A formatted ring, not yet split into its two ends
pub struct Ring {
    region: Arc<SharedRegion>,
    capacity: usize,
}

impl Ring {
    /// Format `region` as an empty ring of `capacity` data bytes.
    ///
    /// # Errors
    /// Returns an error if `capacity` is not a power of two or the region is
    /// too small
    pub fn create(region: SharedRegion, capacity: usize) -> Result<Self, TransportError> {
        check_geometry(&region, capacity)?;
        let ring = Self { region: Arc::new(region), capacity };
        let header = ring.header();
        header.capacity.0.store(capacity as u64, Ordering::Relaxed);
        header.head.0.store(0, Ordering::Relaxed);
        header.tail.0.store(0, Ordering::Relaxed);
        header.closed.0.store(0, Ordering::Relaxed);
        header.magic.0.store(RING_MAGIC, Ordering::Release);
        debug!("Ring formatted: {capacity} data bytes");
        Ok(ring)
    }

    /// Attach to a ring formatted by another process.
    ///
    /// # Errors
    /// Returns an error if the region does not hold a valid ring header
    pub fn attach(region: SharedRegion) -> Result<Self, TransportError> {
        if region.len() < RING_DATA_OFFSET {
            return Err(TransportError::RegionTooSmall { len: region.len(), capacity: 0 });
        }
        // SAFETY: the region is at least one header long and page aligned.
        let header = unsafe { &*region.as_ptr().cast::<RingHeader>() };
        let magic = header.magic.0.load(Ordering::Acquire);
        if magic != RING_MAGIC {
            return Err(TransportError::BadMagic(magic));
        }
        let raw = header.capacity.0.load(Ordering::Relaxed);
        let capacity = usize::try_from(raw).map_err(|_| TransportError::InvalidCapacity(0))?;
        check_geometry(&region, capacity)?;
        Ok(Self { region: Arc::new(region), capacity })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Both ends in one process (threads, tests)
    #[must_use]
    pub fn split(self) -> (Producer, Consumer) {
        let producer = Producer { ring: RingRef::new(Arc::clone(&self.region), self.capacity) };
        (producer, self.into_consumer())
    }

    #[must_use]
    pub fn into_producer(self) -> Producer {
        Producer { ring: RingRef::new(self.region, self.capacity) }
    }

    #[must_use]
    pub fn into_consumer(self) -> Consumer {
        Consumer { ring: RingRef::new(self.region, self.capacity) }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: geometry was checked; the header sits at offset 0.
        unsafe { &*self.region.as_ptr().cast::<RingHeader>() }
    }
}

fn check_geometry(region: &SharedRegion, capacity: usize) -> Result<(), TransportError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(TransportError::InvalidCapacity(capacity));
    }
    if region.len() < region_len(capacity) {
        return Err(TransportError::RegionTooSmall { len: region.len(), capacity });
    }
    Ok(())
}

/// Shared state of one end of the ring
struct RingRef {
    region: Arc<SharedRegion>,
    data: *mut u8,
    mask: u64,
    capacity: u64,
}

// SAFETY: each end touches only the bytes the protocol hands to it, and the
// counters are atomics.
unsafe impl Send for RingRef {}

impl RingRef {
    fn new(region: Arc<SharedRegion>, capacity: usize) -> Self {
        // SAFETY: the region holds header + capacity bytes.
        let data = unsafe { region.as_ptr().add(RING_DATA_OFFSET) };
        let capacity = capacity as u64;
        Self { region, data, mask: capacity - 1, capacity }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: geometry was checked when the ring was created or attached.
        unsafe { &*self.region.as_ptr().cast::<RingHeader>() }
    }

    /// Copy `src` into the data area starting at stream position `pos`
    ///
    /// # Safety
    /// `src.len()` bytes starting at `pos` must be owned by the producer.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn copy_in(&self, pos: u64, src: &[u8]) {
        let off = (pos & self.mask) as usize;
        let first = src.len().min(self.capacity as usize - off);
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.data.add(off), first);
        std::ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data, src.len() - first);
    }

    /// Copy from the data area starting at stream position `pos` into `dst`
    ///
    /// # Safety
    /// `dst.len()` bytes starting at `pos` must be published by the producer.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let off = (pos & self.mask) as usize;
        let first = dst.len().min(self.capacity as usize - off);
        std::ptr::copy_nonoverlapping(self.data.add(off), dst.as_mut_ptr(), first);
        std::ptr::copy_nonoverlapping(self.data, dst.as_mut_ptr().add(first), dst.len() - first);
    }
}

/// Writing end. Closing (explicitly or by drop) tells the consumer no more
/// bytes will follow.
pub struct Producer {
    ring: RingRef,
}

impl Producer {
    /// Append all of `bytes`, waiting for space as needed
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, mut bytes: &[u8]) {
        let header = self.ring.header();
        let mut head = header.head.0.load(Ordering::Relaxed);
        let mut spins = 0u32;
        while !bytes.is_empty() {
            let tail = header.tail.0.load(Ordering::Acquire);
            let free = self.ring.capacity - (head - tail);
            if free == 0 {
                if spins < PUSH_SPIN_LIMIT {
                    spins += 1;
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
                continue;
            }
            spins = 0;
            let n = bytes.len().min(free as usize);
            // SAFETY: [head, head + n) is free space owned by the producer.
            unsafe { self.ring.copy_in(head, &bytes[..n]) };
            head += n as u64;
            header.head.0.store(head, Ordering::Release);
            bytes = &bytes[n..];
        }
    }

    /// Mark the stream complete
    pub fn close(&mut self) {
        self.ring.header().closed.0.store(1, Ordering::Release);
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading end
pub struct Consumer {
    ring: RingRef,
}

impl Consumer {
    /// Move up to `buf.len()` available bytes into `buf`.
    ///
    /// Spins a bounded number of times while the ring is empty and returns 0
    /// if nothing arrived.
    #[allow(clippy::cast_possible_truncation)]
    pub fn pop(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let header = self.ring.header();
        let tail = header.tail.0.load(Ordering::Relaxed);
        for _ in 0..POP_SPIN_LIMIT {
            let head = header.head.0.load(Ordering::Acquire);
            let available = head - tail;
            if available == 0 {
                std::hint::spin_loop();
                continue;
            }
            let n = buf.len().min(available as usize);
            // SAFETY: [tail, tail + n) was published by the producer's
            // Release store of `head`.
            unsafe { self.ring.copy_out(tail, &mut buf[..n]) };
            header.tail.0.store(tail + n as u64, Ordering::Release);
            return n;
        }
        0
    }

    /// Whether the producer has closed the stream. Bytes may still be queued.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ring.header().closed.0.load(Ordering::Acquire) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (Producer, Consumer) {
        let region = SharedRegion::anonymous(region_len(capacity)).unwrap();
        Ring::create(region, capacity).unwrap().split()
    }

    fn drain(consumer: &mut Consumer, want: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 37];
        while out.len() < want {
            let n = consumer.pop(&mut buf);
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_rejects_bad_capacity() {
        let region = SharedRegion::anonymous(region_len(1000)).unwrap();
        assert!(matches!(Ring::create(region, 1000), Err(TransportError::InvalidCapacity(1000))));
    }

    #[test]
    fn test_rejects_small_region() {
        let region = SharedRegion::anonymous(4096).unwrap();
        assert!(matches!(
            Ring::create(region, 1 << 16),
            Err(TransportError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn test_attach_requires_magic() {
        let region = SharedRegion::anonymous(region_len(4096)).unwrap();
        assert!(matches!(Ring::attach(region), Err(TransportError::BadMagic(0))));
    }

    #[test]
    fn test_empty_pop_returns_zero() {
        let (_producer, mut consumer) = ring(64);
        let mut buf = [0u8; 8];
        assert_eq!(consumer.pop(&mut buf), 0);
        assert!(!consumer.is_closed());
    }

    #[test]
    fn test_fifo_across_wrap_around() {
        let (mut producer, mut consumer) = ring(64);
        let mut expected = Vec::new();
        let mut received = Vec::new();
        // 10 rounds of 50 bytes through a 64 byte ring forces every offset
        // to wrap at some point
        for round in 0..10u8 {
            let chunk: Vec<u8> = (0..50).map(|i| round.wrapping_mul(50).wrapping_add(i)).collect();
            producer.push(&chunk);
            expected.extend_from_slice(&chunk);
            received.extend(drain(&mut consumer, 50));
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_close_after_data() {
        let (mut producer, mut consumer) = ring(64);
        producer.push(b"abc");
        producer.close();
        assert!(consumer.is_closed());
        assert_eq!(drain(&mut consumer, 3), b"abc");
        let mut buf = [0u8; 4];
        assert_eq!(consumer.pop(&mut buf), 0);
    }

    #[test]
    fn test_drop_closes() {
        let (producer, consumer) = ring(64);
        drop(producer);
        assert!(consumer.is_closed());
    }

    #[test]
    fn test_fifo_across_threads() {
        const TOTAL: usize = 1 << 20;
        let (mut producer, mut consumer) = ring(4096);

        let writer = std::thread::spawn(move || {
            let mut sent = 0usize;
            let mut size = 1usize;
            while sent < TOTAL {
                let n = size.min(TOTAL - sent);
                #[allow(clippy::cast_possible_truncation)]
                let chunk: Vec<u8> = (sent..sent + n).map(|i| (i % 251) as u8).collect();
                producer.push(&chunk);
                sent += n;
                size = size % 997 + 13;
            }
        });

        let mut buf = vec![0u8; 1500];
        let mut got = 0usize;
        while got < TOTAL {
            let n = consumer.pop(&mut buf);
            for (i, byte) in buf[..n].iter().enumerate() {
                assert_eq!(usize::from(*byte), (got + i) % 251, "byte {}", got + i);
            }
            got += n;
        }
        writer.join().unwrap();
        assert!(consumer.is_closed());
    }

    #[test]
    fn test_attach_sees_formatted_ring() {
        let name = format!("/depscope-test-ring-{}", std::process::id());
        let capacity = 1024;
        let created = SharedRegion::create(&name, region_len(capacity)).unwrap();
        let mut producer = Ring::create(created, capacity).unwrap().into_producer();

        let attached = Ring::attach(SharedRegion::open(&name).unwrap()).unwrap();
        assert_eq!(attached.capacity(), capacity);
        let mut consumer = attached.into_consumer();

        producer.push(&[1, 2, 3, 4]);
        assert_eq!(drain(&mut consumer, 4), [1, 2, 3, 4]);
    }
}
