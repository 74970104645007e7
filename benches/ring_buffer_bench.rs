use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::thread;
use wkmp_dap::ring_buffer::RingBuffer;

fn producer_consumer_throughput(c: &mut Criterion) {
    c.bench_function("ring_buffer_16kb_chunked_transfer", |b| {
        b.iter(|| {
            let rb = Arc::new(RingBuffer::new(4096));
            let data = vec![0xABu8; 16 * 1024];

            let producer = {
                let rb = Arc::clone(&rb);
                let data = data.clone();
                thread::spawn(move || {
                    for chunk in data.chunks(512) {
                        rb.write(chunk);
                    }
                })
            };

            let consumer = {
                let rb = Arc::clone(&rb);
                let total = data.len();
                thread::spawn(move || {
                    let mut got = 0;
                    let mut buf = [0u8; 512];
                    while got < total {
                        got += rb.read(&mut buf);
                    }
                })
            };

            producer.join().unwrap();
            consumer.join().unwrap();
        });
    });
}

criterion_group!(benches, producer_consumer_throughput);
criterion_main!(benches);
