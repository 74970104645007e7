//! Tempo/pitch stage: resamples decoder output by `tempo` coefficient T.
//! T > 1 speeds up (and raises pitch); T < 1 slows down. Pitch intentionally
//! follows tempo here rather than being held constant by a time-stretch.

use crate::audio::format::AudioFormat;
use crate::playback::effects::AudioSource;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const CHUNK_FRAMES: usize = 1024;

struct Built {
    resampler: FastFixedIn<f32>,
    dest_rate: u32,
}

pub struct TempoStage {
    lower: Arc<dyn AudioSource>,
    source_rate: u32,
    channels: u16,
    /// Destination rate, written by the UI thread via `set_tempo`, read by
    /// the consumer (output) thread. Rebuild is deferred to the next `read`
    /// so it only ever happens on the consumer thread, never racing a
    /// resampler swap against an in-flight `process` call.
    dest_rate: AtomicU32,
    built: Mutex<Option<Built>>,
}

impl TempoStage {
    pub fn new(lower: Arc<dyn AudioSource>) -> Self {
        let format = lower.format();
        TempoStage {
            source_rate: format.sample_rate,
            channels: format.channels,
            dest_rate: AtomicU32::new(format.sample_rate),
            built: Mutex::new(None),
            lower,
        }
    }

    fn rebuild_if_needed(&self) {
        let dest_rate = self.dest_rate.load(Ordering::Acquire);
        let mut built = self.built.lock().unwrap();
        let needs_rebuild = match &*built {
            Some(b) => b.dest_rate != dest_rate,
            None => true,
        };
        if !needs_rebuild {
            return;
        }
        if dest_rate == self.source_rate {
            *built = None; // identity: pass through untouched (T == 1)
            return;
        }
        let ratio = dest_rate as f64 / self.source_rate as f64;
        match FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            self.channels as usize,
        ) {
            Ok(resampler) => {
                debug!(source_rate = self.source_rate, dest_rate, "rebuilt tempo resampler");
                *built = Some(Built {
                    resampler,
                    dest_rate,
                });
            }
            Err(e) => {
                warn!(error = %e, "tempo resampler rebuild failed, holding previous resampler");
            }
        }
    }

    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2 // i16 PCM
    }
}

impl AudioSource for TempoStage {
    fn read(&self, dst: &mut [u8]) -> usize {
        self.rebuild_if_needed();
        let bpf = self.bytes_per_frame();
        if bpf == 0 {
            return 0;
        }
        let n_frames = dst.len() / bpf;
        if n_frames == 0 {
            return 0;
        }

        let dest_rate = self.dest_rate.load(Ordering::Acquire);
        if dest_rate == self.source_rate {
            // Identity path: byte-identical to decoder output.
            return self.lower.read(dst);
        }

        // pull = n * Ss / Sd, rounded, clamped to n so
        // the destination buffer can never overflow.
        let pull_frames = ((n_frames as u64 * self.source_rate as u64
            + dest_rate as u64 / 2)
            / dest_rate as u64)
            .clamp(1, n_frames as u64) as usize;

        let mut src_bytes = vec![0u8; pull_frames * bpf];
        let got = self.lower.read(&mut src_bytes);
        let got_frames = got / bpf;
        if got_frames == 0 {
            return 0;
        }

        let channels = self.channels as usize;
        let mut deinterleaved: Vec<Vec<f32>> = vec![Vec::with_capacity(got_frames); channels];
        for frame in src_bytes[..got_frames * bpf].chunks_exact(bpf) {
            for (ch, chunk) in frame.chunks_exact(2).enumerate() {
                let s = i16::from_le_bytes([chunk[0], chunk[1]]);
                deinterleaved[ch].push(s as f32 / i16::MAX as f32);
            }
        }

        let mut built = self.built.lock().unwrap();
        let produced: Vec<Vec<f32>> = match built.as_mut() {
            Some(b) => match b.resampler.process(&deinterleaved, None) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "tempo resampler process failed, passing silence");
                    vec![vec![0.0; n_frames]; channels]
                }
            },
            None => deinterleaved,
        };
        drop(built);

        let out_frames = produced.first().map(|c| c.len()).unwrap_or(0).min(n_frames);
        for i in 0..out_frames {
            for ch in 0..channels {
                let sample = (produced[ch][i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                let off = i * bpf + ch * 2;
                dst[off..off + 2].copy_from_slice(&sample.to_le_bytes());
            }
        }
        if out_frames < n_frames {
            dst[out_frames * bpf..n_frames * bpf].fill(0);
        }
        out_frames * bpf
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
        *self.built.lock().unwrap() = None;
        self.lower.clear()
    }
    fn seek_to(&self, frame: u64) {
        self.lower.seek_to(frame)
    }
    fn fade_out(&self, duration_ms: u64) {
        self.lower.fade_out(duration_ms)
    }
    fn set_tempo(&self, tempo: f64) {
        if tempo <= 0.0 {
            return;
        }
        let dest_rate = (self.source_rate as f64 / tempo).round().max(1.0) as u32;
        self.dest_rate.store(dest_rate, Ordering::Release);
    }
    fn current_position_seconds(&self) -> f64 {
        let t = self.source_rate as f64 / self.dest_rate.load(Ordering::Acquire).max(1) as f64;
        self.lower.current_position_seconds() / t
    }
    fn remaining_time_seconds(&self) -> Option<f64> {
        let t = self.source_rate as f64 / self.dest_rate.load(Ordering::Acquire).max(1) as f64;
        self.lower.remaining_time_seconds().map(|s| s / t)
    }
    fn format(&self) -> AudioFormat {
        let mut fmt = self.lower.format();
        fmt.sample_rate = self.source_rate;
        fmt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::buffer::PlaybackBuffer;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, 2, 2)
    }

    #[test]
    fn default_tempo_is_identity_rate() {
        let pb: Arc<dyn AudioSource> = Arc::new(PlaybackBuffer::new(fmt(), 4096));
        let stage = TempoStage::new(Arc::clone(&pb));
        assert_eq!(stage.dest_rate.load(Ordering::Acquire), 44_100);
    }

    #[test]
    fn set_tempo_two_halves_dest_rate() {
        let pb: Arc<dyn AudioSource> = Arc::new(PlaybackBuffer::new(fmt(), 4096));
        let stage = TempoStage::new(pb);
        stage.set_tempo(2.0);
        assert_eq!(stage.dest_rate.load(Ordering::Acquire), 22_050);
    }

    #[test]
    fn identity_tempo_reads_through_unchanged() {
        let pb = Arc::new(PlaybackBuffer::new(fmt(), 4096));
        let samples: Vec<u8> = (0..40u8).collect();
        pb.write_frames(&samples);
        let stage = TempoStage::new(pb);
        let mut out = vec![0u8; 40];
        let n = stage.read(&mut out);
        assert_eq!(n, 40);
        assert_eq!(out, samples);
    }
}
