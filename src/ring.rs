//! Single-producer single-consumer byte ring buffer
//!
//! The producer is the driver receive callback, the consumer is the interpreter. Each side owns
//! one index: the producer advances `head` only after the bytes are in place (release), the
//! consumer advances `tail` only after it copied the bytes out (release). Both sides read the
//! other side's index with acquire ordering, so neither ever observes half written data.
//!
//! One storage slot is kept unused to tell a full buffer from an empty one, so a buffer created
//! with `capacity` bytes allocates `capacity + 1`.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::host::{Host, poll_until};

pub struct RingBuffer {
    buf: Box<[UnsafeCell<u8>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: `head` is only stored by the producer and `tail` only by the consumer, and a byte
// range is only ever accessed by the side currently owning it (see the module docs).
unsafe impl Sync for RingBuffer {}

/// Returned by [`RingBuffer::write`] when the data does not fit. Nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full;

impl RingBuffer {
    /// Creates a buffer able to hold `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let buf = (0..capacity + 1).map(|_| UnsafeCell::new(0)).collect();
        Self {
            buf,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the buffer can hold
    pub fn capacity(&self) -> usize {
        self.size() - 1
    }

    /// Number of bytes waiting to be read
    pub fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.distance(tail, head)
    }

    /// Number of bytes that can be written
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Producer side. Appends `data` if it fits entirely.
    pub fn write(&self, data: &[u8]) -> Result<(), Full> {
        self.write_all(&[data])
    }

    /// Producer side. Appends all `parts` back to back, or nothing at all if their total length
    /// exceeds the free space. The parts become visible to the consumer together.
    pub fn write_all(&self, parts: &[&[u8]]) -> Result<(), Full> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = self.capacity() - self.distance(tail, head);

        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total > free {
            return Err(Full);
        }

        let mut pos = head;
        for part in parts {
            // Safety: the range [head, head + total) is free, the consumer does not touch it
            // until `head` is published below.
            unsafe { self.copy_in(pos, part) };
            pos = (pos + part.len()) % self.size();
        }

        self.head.store(pos, Ordering::Release);
        Ok(())
    }

    /// Consumer side. Fills `out` completely, or returns false and leaves the buffer untouched
    /// if fewer than `out.len()` bytes are available.
    pub fn read(&self, out: &mut [u8]) -> bool {
        if self.available() < out.len() {
            return false;
        }
        self.read_some(out) == out.len()
    }

    /// Consumer side. Reads up to `out.len()` bytes and returns how many were read.
    pub fn read_some(&self, out: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let n = out.len().min(self.distance(tail, head));

        // Safety: [tail, tail + n) was published by the producer and it will not write there
        // again before `tail` moves past it.
        unsafe { self.copy_out(tail, &mut out[..n]) };

        self.tail.store((tail + n) % self.size(), Ordering::Release);
        n
    }

    /// Consumer side. Waits until `out.len()` bytes are available, polling every `step_ms` and
    /// yielding to `host` in between, then reads them.
    ///
    /// A `timeout_ms` of 0 does not wait. Returns false on timeout.
    pub fn wait_and_read<H: Host + ?Sized>(
        &self,
        out: &mut [u8],
        timeout_ms: u32,
        step_ms: u32,
        host: &H,
    ) -> bool {
        let n = out.len();
        if n > self.capacity() {
            return false;
        }
        poll_until(host, timeout_ms, step_ms, || self.available() >= n) && self.read(out)
    }

    fn size(&self) -> usize {
        self.buf.len()
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.size() - from) % self.size()
    }

    unsafe fn copy_in(&self, pos: usize, data: &[u8]) {
        let first = data.len().min(self.size() - pos);
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.slot(pos), first);
            core::ptr::copy_nonoverlapping(
                data[first..].as_ptr(),
                self.slot(0),
                data.len() - first,
            );
        }
    }

    unsafe fn copy_out(&self, pos: usize, out: &mut [u8]) {
        let first = out.len().min(self.size() - pos);
        unsafe {
            core::ptr::copy_nonoverlapping(self.slot(pos), out.as_mut_ptr(), first);
            core::ptr::copy_nonoverlapping(
                self.slot(0),
                out[first..].as_mut_ptr(),
                out.len() - first,
            );
        }
    }

    fn slot(&self, pos: usize) -> *mut u8 {
        // `UnsafeCell<u8>` has the layout of `u8`, so the cells form one contiguous byte array.
        UnsafeCell::raw_get(self.buf.as_ptr().wrapping_add(pos))
    }
}

impl core::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SimHost;

    #[test]
    fn empty_and_full_accounting() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free(), 8);

        ring.write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(ring.available(), 8);
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.write(&[9]), Err(Full));
    }

    #[test]
    fn rejected_write_leaves_contents_unchanged() {
        let ring = RingBuffer::new(10);
        ring.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(ring.write_all(&[&[7, 8], &[9, 10, 11]]), Err(Full));
        assert_eq!(ring.available(), 6);

        let mut out = [0; 6];
        assert!(ring.read(&mut out));
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn data_wraps_around_the_end() {
        let ring = RingBuffer::new(7);
        let mut out = [0; 5];
        for round in 0u8..10 {
            let data = [round, round + 1, round + 2, round + 3, round + 4];
            ring.write_all(&[&data[..2], &data[2..]]).unwrap();
            assert!(ring.read(&mut out));
            assert_eq!(out, data);
        }
    }

    #[test]
    fn short_read_fails_without_consuming() {
        let ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3]).unwrap();
        let mut out = [0; 4];
        assert!(!ring.read(&mut out));
        assert_eq!(ring.available(), 3);

        assert_eq!(ring.read_some(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[test]
    fn wait_and_read_times_out_on_virtual_clock() {
        let host = SimHost::new();
        let ring = RingBuffer::new(16);
        let mut out = [0; 2];

        assert!(!ring.wait_and_read(&mut out, 0, 25, &host));
        assert_eq!(host.now(), 0);

        assert!(!ring.wait_and_read(&mut out, 50, 25, &host));
        assert!(host.now() >= 50 && host.now() < 75);

        ring.write(&[7, 8]).unwrap();
        assert!(ring.wait_and_read(&mut out, 0, 25, &host));
        assert_eq!(out, [7, 8]);
    }

    #[test]
    fn request_larger_than_capacity_never_waits() {
        let host = SimHost::new();
        let ring = RingBuffer::new(4);
        let mut out = [0; 5];
        assert!(!ring.wait_and_read(&mut out, 1000, 25, &host));
        assert_eq!(host.now(), 0);
    }

    #[test]
    fn producer_thread_and_consumer_agree() {
        use std::sync::Arc;

        let ring = Arc::new(RingBuffer::new(64));
        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                let mut n = 0u32;
                while n < 2000 {
                    if ring.write(&n.to_le_bytes()).is_ok() {
                        n += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0u32;
        let mut out = [0; 4];
        while expected < 2000 {
            if ring.read(&mut out) {
                assert_eq!(u32::from_le_bytes(out), expected);
                expected += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
