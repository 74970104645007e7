//! Pull-mode effect chain: a stack of stages over a byte stream of PCM
//! frames, each satisfying the same contract as `PlaybackBuffer` itself.
//! Default methods forward to the stage below; a stage overrides only what
//! it transforms.

pub mod fadeout;
pub mod tempo;

use crate::audio::format::AudioFormat;

/// Common pull contract for every link in the chain, including the bottom
/// (`PlaybackBuffer`) and every stage above it.
pub trait AudioSource: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> usize;
    fn wait_for_data(&self) -> bool;
    fn abort(&self);
    fn should_abort(&self) -> bool;
    fn clear(&self);
    fn seek_to(&self, frame: u64);
    fn fade_out(&self, duration_ms: u64);
    fn set_tempo(&self, tempo: f64);
    fn current_position_seconds(&self) -> f64;
    fn remaining_time_seconds(&self) -> Option<f64>;
    fn format(&self) -> AudioFormat;
}

impl AudioSource for crate::playback::buffer::PlaybackBuffer {
    fn read(&self, dst: &mut [u8]) -> usize {
        PlaybackBuffer::read(self, dst)
    }
    fn wait_for_data(&self) -> bool {
        PlaybackBuffer::wait_for_data(self)
    }
    fn abort(&self) {
        PlaybackBuffer::abort(self)
    }
    fn should_abort(&self) -> bool {
        self.is_aborted()
    }
    fn clear(&self) {
        // PlaybackBuffer doesn't expose a bare clear: seeking to the
        // current position is the only legal bottom-of-chain clear.
        let pos = self.position_frames();
        self.seek_to_frame(pos);
    }
    fn seek_to(&self, frame: u64) {
        self.seek_to_frame(frame);
    }
    fn fade_out(&self, _duration_ms: u64) {
        // The bottom of the chain has no envelope; fade-out only makes
        // sense on the FadeOutStage above it.
    }
    fn set_tempo(&self, _tempo: f64) {
        // No tempo stage at the bottom; forwarded calls stop here.
    }
    fn current_position_seconds(&self) -> f64 {
        self.position_seconds()
    }
    fn remaining_time_seconds(&self) -> Option<f64> {
        PlaybackBuffer::remaining_time_seconds(self)
    }
    fn format(&self) -> AudioFormat {
        PlaybackBuffer::format(self)
    }
}

use crate::playback::buffer::PlaybackBuffer;
use std::sync::Arc;

/// Read-only adapter exposing the top of the chain to the audio device's
/// pull callback. Writes are not part of this type's surface at all.
pub struct Adapter {
    top: Arc<dyn AudioSource>,
}

impl Adapter {
    pub fn new(top: Arc<dyn AudioSource>) -> Self {
        Adapter { top }
    }

    /// Fills `dst` with PCM bytes, returning the number of bytes actually
    /// written (less than `dst.len()` only at/after EOF).
    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.top.read(dst)
    }

    pub fn source(&self) -> &Arc<dyn AudioSource> {
        &self.top
    }
}
