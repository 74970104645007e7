//! Integration-level check of the ring buffer's E6 scenario end-to-end,
//! through the public crate API rather than the unit tests inside the
//! module itself.

use std::sync::Arc;
use std::thread;
use wkmp_dap::ring_buffer::RingBuffer;

#[test]
fn e6_partial_drain_then_abort_has_no_deadlock() {
    let rb = Arc::new(RingBuffer::new(1024));
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let producer = {
        let rb = Arc::clone(&rb);
        let data = data.clone();
        thread::spawn(move || {
            let mut total = 0;
            for chunk in data.chunks(13) {
                if rb.is_aborted() {
                    break;
                }
                total += rb.write(chunk);
            }
            total
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

    let consumed = consumer.join().expect("consumer panicked");
    let produced = producer.join().expect("producer panicked");

    assert_eq!(consumed.len(), 7000);
    assert_eq!(&consumed[..], &data[..7000]);
    assert!(produced >= 7000 && produced <= 7000 + 1023);
}
