use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use wkmp_dap::audio::format::AudioFormat;
use wkmp_dap::playback::buffer::PlaybackBuffer;
use wkmp_dap::playback::effects::fadeout::FadeOutStage;
use wkmp_dap::playback::effects::AudioSource;

fn fade_out_envelope_throughput(c: &mut Criterion) {
    c.bench_function("fade_out_stereo_44k1_one_second", |b| {
        b.iter(|| {
            let fmt = AudioFormat::new(44_100, 2, 2);
            let pb = Arc::new(PlaybackBuffer::new(fmt, 1 << 20));
            let frames = 44_100usize;
            let samples = vec![0x11u8; frames * fmt.bytes_per_frame()];
            pb.write_frames(&samples);

            let stage = FadeOutStage::new(pb as Arc<dyn AudioSource>);
            stage.fade_out(1000);

            let mut out = vec![0u8; frames * fmt.bytes_per_frame()];
            stage.read(&mut out);
        });
    });
}

criterion_group!(benches, fade_out_envelope_throughput);
criterion_main!(benches);
