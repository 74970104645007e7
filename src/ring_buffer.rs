//! Bounded single-producer/single-consumer byte FIFO.
//!
//! One mutex guards both cursors; two condition variables signal "has data"
//! and "has free space" separately so a blocked writer isn't woken by a
//! reader's progress and vice versa. The abort flag is checked on every
//! wake-up and is the only way out of a blocked call other than normal
//! completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

struct State {
    buf: Vec<u8>,
    /// Index of the next byte to be read, modulo capacity.
    read_pos: usize,
    /// Index of the next byte to be written, modulo capacity.
    write_pos: usize,
    /// Bytes currently holding valid unread data.
    available_read: usize,
}

/// Blocking, abortable SPSC byte ring buffer.
pub struct RingBuffer {
    state: Mutex<State>,
    has_data: Condvar,
    has_space: Condvar,
    abort: AtomicBool,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a ring buffer of the given capacity. Capacity must exceed the
    /// size of any single read/write request the caller intends to issue;
    /// larger requests are serviced by repeated wrap-around copies.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "ring buffer capacity must be > 1");
        RingBuffer {
            state: Mutex::new(State {
                buf: vec![0u8; capacity],
                read_pos: 0,
                write_pos: 0,
                available_read: 0,
            }),
            has_data: Condvar::new(),
            has_space: Condvar::new(),
            abort: AtomicBool::new(false),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Sets the abort flag and wakes every waiter. Idempotent, irreversible.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
        self.has_data.notify_all();
        self.has_space.notify_all();
    }

    /// Blocks until at least one byte is readable or the buffer is aborted.
    /// Returns true iff data arrived (false means abort with nothing left).
    pub fn wait_for_data(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        while st.available_read == 0 && !self.is_aborted() {
            st = self.has_data.wait(st).unwrap();
        }
        st.available_read > 0
    }

    pub fn available_read(&self) -> usize {
        self.state.lock().unwrap().available_read
    }

    pub fn available_write(&self) -> usize {
        let st = self.state.lock().unwrap();
        self.capacity - 1 - st.available_read
    }

    /// Resets the buffer to empty. Only safe to call when no concurrent
    /// reader/writer can be mid-copy (the decoder worker must be paused).
    pub fn clear(&self) {
        let mut st = self.state.lock().unwrap();
        st.read_pos = 0;
        st.write_pos = 0;
        st.available_read = 0;
        drop(st);
        self.has_space.notify_all();
    }

    /// Copies up to `src.len()` bytes in. Blocks while full, resuming on
    /// freed space or abort. Returns the number of bytes actually written;
    /// less than requested only on abort.
    pub fn write(&self, src: &[u8]) -> usize {
        let mut written = 0;
        let mut st = self.state.lock().unwrap();
        while written < src.len() {
            while st.available_read == self.capacity - 1 && !self.is_aborted() {
                st = self.has_space.wait(st).unwrap();
            }
            if self.is_aborted() {
                break;
            }
            let avail_write = self.capacity - 1 - st.available_read;
            let to_write = (src.len() - written).min(avail_write);
            if to_write == 0 {
                continue;
            }
            let cap = self.capacity;
            let first_chunk = to_write.min(cap - st.write_pos);
            let write_pos = st.write_pos;
            st.buf[write_pos..write_pos + first_chunk]
                .copy_from_slice(&src[written..written + first_chunk]);
            if first_chunk < to_write {
                let rest = to_write - first_chunk;
                st.buf[0..rest]
                    .copy_from_slice(&src[written + first_chunk..written + to_write]);
            }
            st.write_pos = (st.write_pos + to_write) % cap;
            st.available_read += to_write;
            written += to_write;
            self.has_data.notify_all();
        }
        written
    }

    /// Dual of `write`. Blocks while empty, resuming on new data or abort.
    /// Returns the number of bytes actually read.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut read_total = 0;
        let mut st = self.state.lock().unwrap();
        while read_total < dst.len() {
            while st.available_read == 0 && !self.is_aborted() {
                st = self.has_data.wait(st).unwrap();
            }
            if st.available_read == 0 {
                // Aborted with nothing left to drain.
                break;
            }
            let to_read = (dst.len() - read_total).min(st.available_read);
            let cap = self.capacity;
            let first_chunk = to_read.min(cap - st.read_pos);
            let read_pos = st.read_pos;
            dst[read_total..read_total + first_chunk]
                .copy_from_slice(&st.buf[read_pos..read_pos + first_chunk]);
            if first_chunk < to_read {
                let rest = to_read - first_chunk;
                dst[read_total + first_chunk..read_total + to_read]
                    .copy_from_slice(&st.buf[0..rest]);
            }
            st.read_pos = (st.read_pos + to_read) % cap;
            st.available_read -= to_read;
            read_total += to_read;
            self.has_space.notify_all();
            if self.is_aborted() {
                // Drain whatever is left, then stop; don't block for more.
                break;
            }
        }
        read_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(16);
        assert_eq!(rb.write(b"hello"), 5);
        let mut buf = [0u8; 5];
        assert_eq!(rb.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn available_invariant_holds_after_each_op() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.available_read() + rb.available_write(), 7);
        rb.write(b"abc");
        assert_eq!(rb.available_read() + rb.available_write(), 7);
        let mut buf = [0u8; 2];
        rb.read(&mut buf);
        assert_eq!(rb.available_read() + rb.available_write(), 7);
    }

    #[test]
    fn wraparound_write_and_read() {
        let rb = RingBuffer::new(8);
        rb.write(&[1, 2, 3, 4, 5, 6]);
        let mut buf = [0u8; 4];
        rb.read(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        // write_pos/read_pos now both near the end; this write wraps.
        assert_eq!(rb.write(&[7, 8, 9, 10]), 4);
        let mut buf2 = [0u8; 6];
        assert_eq!(rb.read(&mut buf2), 6);
        assert_eq!(buf2, [5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn abort_wakes_blocked_reader() {
        let rb = Arc::new(RingBuffer::new(8));
        let rb2 = Arc::clone(&rb);
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 4];
            rb2.read(&mut buf)
        });
        thread::sleep(std::time::Duration::from_millis(20));
        rb.abort();
        let n = handle.join().unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn abort_wakes_blocked_writer() {
        let rb = Arc::new(RingBuffer::new(4));
        rb.write(&[1, 2, 3]); // fill to capacity - 1
        let rb2 = Arc::clone(&rb);
        let handle = thread::spawn(move || rb2.write(&[4, 5, 6]));
        thread::sleep(std::time::Duration::from_millis(20));
        rb.abort();
        let n = handle.join().unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn wait_for_data_returns_false_on_empty_abort() {
        let rb = Arc::new(RingBuffer::new(8));
        let rb2 = Arc::clone(&rb);
        let handle = thread::spawn(move || rb2.wait_for_data());
        thread::sleep(std::time::Duration::from_millis(20));
        rb.abort();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn scenario_e6_partial_read_before_abort() {
        // Ring buffer of capacity 1024, producer writes 10000 bytes in
        // 13-byte chunks, consumer reads in 17-byte chunks; abort after
        // 7000 bytes read. The 7000 bytes read equal the first 7000
        // written; no deadlock.
        let rb = Arc::new(RingBuffer::new(1024));
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();

        let producer = {
            let rb = Arc::clone(&rb);
            let data = data.clone();
            thread::spawn(move || {
                let mut written = 0;
                for chunk in data.chunks(13) {
                    if rb.is_aborted() {
                        break;
                    }
                    written += rb.write(chunk);
                }
                written
            })
        };

        let consumer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                let mut out = Vec::with_capacity(7000);
                while out.len() < 7000 {
                    let mut buf = [0u8; 17];
                    let n = rb.read(&mut buf);
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
                rb.abort();
                out
            })
        };

        let consumed = consumer.join().unwrap();
        let produced = producer.join().unwrap();

        assert_eq!(&consumed[..7000.min(consumed.len())], &data[..consumed.len().min(7000)]);
        assert!(produced >= 7000 && produced <= 7000 + 1023);
    }
}
