//! Linear fade-out stage. Treats interleaved multichannel samples as a
//! single stream for the envelope counter.

use crate::audio::format::AudioFormat;
use crate::playback::effects::AudioSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct FadeOutStage {
    lower: Arc<dyn AudioSource>,
    is_fading: AtomicBool,
    total_samples: AtomicU64,
    remaining_samples: AtomicU64,
}

impl FadeOutStage {
    pub fn new(lower: Arc<dyn AudioSource>) -> Self {
        FadeOutStage {
            lower,
            is_fading: AtomicBool::new(false),
            total_samples: AtomicU64::new(0),
            remaining_samples: AtomicU64::new(0),
        }
    }

    pub fn is_fading(&self) -> bool {
        self.is_fading.load(Ordering::Acquire)
    }
}

impl AudioSource for FadeOutStage {
    fn read(&self, dst: &mut [u8]) -> usize {
        // Round the request down to a whole 16-bit-sample multiple.
        let usable_len = dst.len() - (dst.len() % 2);
        if usable_len == 0 {
            return 0;
        }

        if !self.is_fading.load(Ordering::Acquire) {
            return self.lower.read(&mut dst[..usable_len]);
        }

        let remaining = self.remaining_samples.load(Ordering::Acquire);
        if remaining == 0 {
            self.lower.abort();
            return 0;
        }

        // Never pull more than the envelope has left to cover: the fade must
        // not consume source data past the point it finishes at.
        let requested_samples = (usable_len / 2) as u64;
        let limit_samples = remaining.min(requested_samples) as usize;
        let limit_bytes = limit_samples * 2;

        let got = self.lower.read(&mut dst[..limit_bytes]);
        let total = self.total_samples.load(Ordering::Acquire).max(1);
        let n_samples = got / 2;

        let mut remaining = remaining;
        for i in 0..n_samples {
            let off = i * 2;
            let s = i16::from_le_bytes([dst[off], dst[off + 1]]);
            remaining -= 1;
            let scaled = (s as i64 * remaining as i64 / total as i64) as i16;
            dst[off..off + 2].copy_from_slice(&scaled.to_le_bytes());
        }
        self.remaining_samples.store(remaining, Ordering::Release);

        if remaining == 0 {
            self.lower.abort();
        }
        got
    }

    fn wait_for_data(&self) -> bool {
        self.lower.wait_for_data()
    }
    fn abort(&self) {
        self.lower.abort()
    }
    fn should_abort(&self) -> bool {
        self.lower.should_abort()
    }
    fn clear(&self) {
        self.lower.clear()
    }
    fn seek_to(&self, frame: u64) {
        self.lower.seek_to(frame)
    }
    fn fade_out(&self, duration_ms: u64) {
        let fmt = self.lower.format();
        let total = fmt.channels as u64 * fmt.sample_rate as u64 * duration_ms / 1000;
        self.total_samples.store(total, Ordering::Release);
        self.remaining_samples.store(total, Ordering::Release);
        self.is_fading.store(true, Ordering::Release);
    }
    fn set_tempo(&self, tempo: f64) {
        self.lower.set_tempo(tempo)
    }
    fn current_position_seconds(&self) -> f64 {
        self.lower.current_position_seconds()
    }
    fn remaining_time_seconds(&self) -> Option<f64> {
        self.lower.remaining_time_seconds()
    }
    fn format(&self) -> AudioFormat {
        self.lower.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::buffer::PlaybackBuffer;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, 1, 2)
    }

    fn make_samples(value: i16, count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count * 2);
        for _ in 0..count {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    #[test]
    fn not_fading_passes_through_unchanged() {
        let pb = Arc::new(PlaybackBuffer::new(fmt(), 4096));
        let samples = make_samples(1000, 10);
        pb.write_frames(&samples);
        let stage = FadeOutStage::new(pb);
        let mut out = vec![0u8; 20];
        let n = stage.read(&mut out);
        assert_eq!(n, 20);
        assert_eq!(out, samples);
    }

    #[test]
    fn fade_out_exact_sample_count_then_aborts() {
        // 1 channel, 1000 Hz equivalent via duration math: total = channels
        // * sample_rate * ms / 1000.
        let fmt = AudioFormat::new(1000, 1, 2);
        let pb = Arc::new(PlaybackBuffer::new(fmt, 8192));
        let samples = make_samples(i16::MAX, 2000);
        pb.write_frames(&samples);
        let stage = FadeOutStage::new(pb);
        stage.fade_out(1000); // total = 1 * 1000 * 1000 / 1000 = 1000 samples
        assert_eq!(stage.total_samples.load(Ordering::Acquire), 1000);

        let mut out = vec![0u8; 4000];
        let n = stage.read(&mut out);
        assert_eq!(n, 2000); // 1000 samples * 2 bytes consumed before abort
        assert!(stage.lower.should_abort());

        // First sample attenuated by (total-1)/total.
        let first = i16::from_le_bytes([out[0], out[1]]);
        let expected_first = (i16::MAX as i64 * 999 / 1000) as i16;
        assert_eq!(first, expected_first);
    }
}
