//! `SongDecoder`: owns the demux/decode/resample pipeline that feeds a
//! `PlaybackBuffer` from a background worker thread.
//!
//! Construction schedules the worker immediately; if the item carries a
//! skip-start offset, the worker seeks there before producing the first
//! frame. Destruction aborts the buffer (unblocking a worker stuck writing
//! to a full ring) then joins the worker thread, guaranteeing a clean
//! shutdown before the buffer is dropped.

use crate::audio::format::AudioFormat;
use crate::playback::buffer::PlaybackBuffer;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CodecRegistry, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia_adapter_libopus::OpusDecoder;
use tracing::{debug, info, warn};

const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Brings decoded audio from its container's native sample rate up to the
/// device rate. Distinct from the tempo stage's resampler further up the
/// chain, which retunes the already-device-rate stream by the playback
/// tempo coefficient.
enum InternalResampler {
    PassThrough,
    Active(FastFixedIn<f32>),
}

impl InternalResampler {
    fn new(source_rate: u32, dest_rate: u32, channels: usize) -> Self {
        if source_rate == dest_rate {
            return InternalResampler::PassThrough;
        }
        let ratio = dest_rate as f64 / source_rate as f64;
        match FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK_FRAMES,
            channels,
        ) {
            Ok(r) => InternalResampler::Active(r),
            Err(e) => {
                warn!(error = %e, source_rate, dest_rate, "internal resampler init failed, passing through");
                InternalResampler::PassThrough
            }
        }
    }

    fn process(&mut self, planar: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        match self {
            InternalResampler::PassThrough => planar,
            InternalResampler::Active(r) => match r.process(&planar, None) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "internal resample failed, dropping packet");
                    vec![Vec::new(); planar.len()]
                }
            },
        }
    }
}

/// Codec registry augmented with Opus, which the default registry doesn't
/// carry (it needs the libopus C library and so lives in a separate crate).
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<OpusDecoder>();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry.register_all::<symphonia::default::codecs::AacDecoder>();
        registry
    })
}

enum DecoderCommand {
    SeekTo(f64),
}

pub struct SongDecoder {
    buffer: Arc<PlaybackBuffer>,
    command_tx: Sender<DecoderCommand>,
    worker: Option<JoinHandle<()>>,
}

impl SongDecoder {
    /// Opens `path` and begins decoding into a fresh `PlaybackBuffer` at
    /// `format`. `skip_start_seconds` is applied before the first frame is
    /// produced if positive.
    pub fn start(
        path: PathBuf,
        format: AudioFormat,
        skip_start_seconds: f64,
        ring_capacity_bytes: usize,
    ) -> Self {
        let buffer = Arc::new(PlaybackBuffer::new(format, ring_capacity_bytes));
        let (command_tx, command_rx) = mpsc::channel();

        let worker_buffer = Arc::clone(&buffer);
        let worker = std::thread::Builder::new()
            .name("song-decoder".into())
            .spawn(move || decode_loop(path, format, skip_start_seconds, worker_buffer, command_rx))
            .expect("failed to spawn decoder worker thread");

        SongDecoder {
            buffer,
            command_tx,
            worker: Some(worker),
        }
    }

    pub fn buffer(&self) -> Arc<PlaybackBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Thread-safe; signals the worker to clear the buffer, jump the
    /// demuxer, and resume decoding from the nearest keyframe at or before
    /// `seconds`.
    pub fn seek_to(&self, seconds: f64) {
        let _ = self.command_tx.send(DecoderCommand::SeekTo(seconds));
    }
}

impl Drop for SongDecoder {
    fn drop(&mut self) {
        self.buffer.abort();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn decode_loop(
    path: PathBuf,
    format: AudioFormat,
    skip_start_seconds: f64,
    buffer: Arc<PlaybackBuffer>,
    command_rx: Receiver<DecoderCommand>,
) {
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open source file");
            buffer.mark_error();
            return;
        }
    };

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unsupported container or corrupt file");
            buffer.mark_error();
            return;
        }
    };

    let mut reader = probed.format;
    let track = match reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        Some(t) => t.clone(),
        None => {
            warn!(path = %path.display(), "no audio track found");
            buffer.mark_error();
            return;
        }
    };
    let track_id = track.id;

    let mut decoder = match codec_registry()
        .make(&track.codec_params, &DecoderOptions::default())
    {
        Ok(d) => d,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to construct codec decoder");
            buffer.mark_error();
            return;
        }
    };

    if skip_start_seconds > 0.0 {
        let _ = reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: symphonia::core::units::Time::from(skip_start_seconds),
                track_id: Some(track_id),
            },
        );
        buffer.seek_to_frame((skip_start_seconds * format.sample_rate as f64) as u64);
    }

    info!(path = %path.display(), "decoder worker started");

    let mut resampler: Option<InternalResampler> = None;

    loop {
        while let Ok(cmd) = command_rx.try_recv() {
            match cmd {
                DecoderCommand::SeekTo(seconds) => {
                    buffer.seek_to_frame((seconds * format.sample_rate as f64) as u64);
                    if reader
                        .seek(
                            SeekMode::Accurate,
                            SeekTo::Time {
                                time: symphonia::core::units::Time::from(seconds),
                                track_id: Some(track_id),
                            },
                        )
                        .is_err()
                    {
                        warn!(seconds, "seek past end of stream");
                    }
                    decoder.reset();
                }
            }
        }

        if buffer.is_aborted() {
            break;
        }

        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("decoder reset required mid-stream");
                decoder.reset();
                continue;
            }
            Err(e) => {
                warn!(error = %e, "fatal demux error, stopping");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let (planar, frames, src_channels, src_rate) = decode_to_planar(&decoded);
                if frames == 0 {
                    continue;
                }
                let resampler = resampler
                    .get_or_insert_with(|| InternalResampler::new(src_rate, format.sample_rate, src_channels));
                let resampled = resampler.process(planar);
                let out_frames = resampled.first().map(|c| c.len()).unwrap_or(0);
                let bytes = mix_to_device(&resampled, out_frames, format.channels as usize);
                let written = buffer.write_frames(&bytes);
                if written < bytes.len() {
                    // Aborted mid-write.
                    break;
                }
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!(error = %msg, "transient decode error, resyncing");
                continue;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
            }
            Err(e) => {
                warn!(error = %e, "fatal decode error, stopping");
                break;
            }
        }
    }

    buffer.mark_eof();
    info!(path = %path.display(), "decoder worker finished");
}

/// Converts a decoded buffer to planar f32, normalized to [-1.0, 1.0].
/// Returns `(planar, frames, src_channels, src_rate)`.
fn decode_to_planar(decoded: &AudioBufferRef) -> (Vec<Vec<f32>>, usize, usize, u32) {
    let spec = *decoded.spec();
    let frames = decoded.frames();
    let src_channels = spec.channels.count();
    let src_rate = spec.rate;

    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); src_channels];
    match decoded {
        AudioBufferRef::F32(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend_from_slice(buf.chan(ch));
            }
        }
        AudioBufferRef::F64(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32));
            }
        }
        AudioBufferRef::S32(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32 / i32::MAX as f32));
            }
        }
        AudioBufferRef::S24(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| s.inner() as f32 / 8_388_608.0));
            }
        }
        AudioBufferRef::S16(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32 / i16::MAX as f32));
            }
        }
        AudioBufferRef::S8(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32 / i8::MAX as f32));
            }
        }
        AudioBufferRef::U32(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(
                    buf.chan(ch)
                        .iter()
                        .map(|s| (*s as f64 - 2_147_483_648.0) as f32 / 2_147_483_648.0),
                );
            }
        }
        AudioBufferRef::U24(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(
                    buf.chan(ch)
                        .iter()
                        .map(|s| (s.inner() as f32 - 8_388_608.0) / 8_388_608.0),
                );
            }
        }
        AudioBufferRef::U16(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(
                    buf.chan(ch)
                        .iter()
                        .map(|s| (*s as f32 - 32_768.0) / 32_768.0),
                );
            }
        }
        AudioBufferRef::U8(buf) => {
            for ch in 0..src_channels {
                planar[ch].extend(buf.chan(ch).iter().map(|s| (*s as f32 - 128.0) / 128.0));
            }
        }
    }
    (planar, frames, src_channels, src_rate)
}

/// Mixes planar f32 down/up to `dst_channels` and quantizes to interleaved
/// little-endian i16 PCM.
fn mix_to_device(planar: &[Vec<f32>], frames: usize, dst_channels: usize) -> Vec<u8> {
    let src_channels = planar.len().max(1);
    let mut out = Vec::with_capacity(frames * dst_channels * 2);
    for i in 0..frames {
        for ch in 0..dst_channels {
            let src_ch = if src_channels == 1 { 0 } else { ch.min(src_channels - 1) };
            let sample = (planar[src_ch][i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}
