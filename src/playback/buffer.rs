//! `PlaybackBuffer`: a `RingBuffer` plus the target audio format and a
//! producer-side frame cursor used for position/remaining-time reporting.
//!
//! Position and remaining-time queries are derived from the write cursor,
//! not from the ring's consumer read position, so they stay monotone even
//! while the consumer is draining the ring.

use crate::audio::format::AudioFormat;
use crate::ring_buffer::RingBuffer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PlaybackBuffer {
    ring: RingBuffer,
    format: AudioFormat,
    write_cursor_frames: AtomicU64,
    total_frames: Mutex<Option<u64>>,
    eof: AtomicBool,
    error: AtomicBool,
}

impl PlaybackBuffer {
    pub fn new(format: AudioFormat, capacity_bytes: usize) -> Self {
        PlaybackBuffer {
            ring: RingBuffer::new(capacity_bytes),
            format,
            write_cursor_frames: AtomicU64::new(0),
            total_frames: Mutex::new(None),
            eof: AtomicBool::new(false),
            error: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn set_total_frames(&self, frames: Option<u64>) {
        *self.total_frames.lock().unwrap() = frames;
    }

    /// Called by the decoder worker as it writes decoded PCM in. Advances
    /// the frame cursor by whole frames only.
    pub fn write_frames(&self, bytes: &[u8]) -> usize {
        let written = self.ring.write(bytes);
        let bpf = self.format.bytes_per_frame();
        if bpf > 0 {
            self.write_cursor_frames
                .fetch_add((written / bpf) as u64, Ordering::Relaxed);
        }
        written
    }

    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.ring.read(dst)
    }

    pub fn wait_for_data(&self) -> bool {
        self.ring.wait_for_data()
    }

    pub fn abort(&self) {
        self.ring.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.ring.is_aborted()
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    /// Producer-side hint: discards ring contents and jumps the frame
    /// cursor to `frame`. The decoder worker is responsible for actually
    /// seeking the demuxer to the matching position before resuming writes.
    pub fn seek_to_frame(&self, frame: u64) {
        self.ring.clear();
        self.write_cursor_frames.store(frame, Ordering::Relaxed);
    }

    /// Marks successful completion: EOF flag set, ring aborted so the
    /// consumer's pending/future reads unblock after draining what remains.
    pub fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
        self.ring.abort();
    }

    /// Marks abrupt failure (source could not be opened/decoded at all):
    /// same mechanism as `mark_eof` with the error flag additionally set,
    /// so the chain presents an empty, immediately-EOF stream.
    pub fn mark_error(&self) {
        self.error.store(true, Ordering::Release);
        self.mark_eof();
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn position_frames(&self) -> u64 {
        self.write_cursor_frames.load(Ordering::Relaxed)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.format.sample_rate as f64
    }

    pub fn remaining_time_seconds(&self) -> Option<f64> {
        let total = (*self.total_frames.lock().unwrap())?;
        let pos = self.position_frames();
        Some((total.saturating_sub(pos)) as f64 / self.format.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, 2, 2)
    }

    #[test]
    fn write_advances_frame_cursor() {
        let pb = PlaybackBuffer::new(fmt(), 4096);
        let frame_bytes = vec![0u8; 4 * 10]; // 10 frames of stereo i16
        pb.write_frames(&frame_bytes);
        assert_eq!(pb.position_frames(), 10);
    }

    #[test]
    fn seek_resets_ring_and_sets_cursor() {
        let pb = PlaybackBuffer::new(fmt(), 4096);
        pb.write_frames(&vec![1u8; 40]);
        pb.seek_to_frame(1000);
        assert_eq!(pb.position_frames(), 1000);
        assert_eq!(pb.available_read(), 0);
    }

    #[test]
    fn mark_eof_aborts_ring() {
        let pb = PlaybackBuffer::new(fmt(), 4096);
        pb.mark_eof();
        assert!(pb.is_eof());
        assert!(pb.is_aborted());
    }

    #[test]
    fn remaining_time_uses_write_cursor_not_ring() {
        let data_bytes = 4 * 22_050; // half a second of stereo i16
        let pb = PlaybackBuffer::new(fmt(), data_bytes + 1);
        pb.set_total_frames(Some(44_100));
        pb.write_frames(&vec![0u8; data_bytes]);
        let mut drained = vec![0u8; data_bytes];
        pb.read(&mut drained); // drain the ring fully; cursor must not move
        let remaining = pb.remaining_time_seconds().unwrap();
        assert!((remaining - 0.5).abs() < 1e-9);
    }
}
