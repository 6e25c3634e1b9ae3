//! Benchmarks for the per-frame capture path
//!
//! Covers the work done for every retrieved frame:
//! - Throughput window accounting at the default and a tiny window size
//! - A full `capture_once` round trip against the in-memory mock device
//!
//! Platform: Cross-platform (no device required, CI-safe)

use capture_session::test_utils::MockDevice;
use capture_session::{
    Endpoint, ParameterSet, SessionController, SessionOptions, ThroughputSampler,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

fn bench_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput_sampler");
    group.throughput(Throughput::Elements(1));

    for window in [300u32, 2] {
        let window = NonZeroU32::new(window).expect("non-zero window");
        group.bench_function(format!("on_frame_window_{}", window), |b| {
            let start = Instant::now();
            let mut sampler = ThroughputSampler::starting_at(window, start);
            let mut tick = 0u64;
            b.iter(|| {
                tick += 1;
                let now = start + Duration::from_micros(tick * 33_333);
                if sampler.on_frame_at(now, black_box(10_000)) {
                    black_box(sampler.report_if_complete());
                }
            })
        });
    }

    group.finish();
}

fn bench_capture_once(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");

    let device = MockDevice::new();
    device.set_frame_size(10_000);
    let options = SessionOptions { warmup_pings: 0, slow_read: None, ..SessionOptions::default() };
    let mut session = SessionController::new(
        device.clone(),
        Endpoint::new("127.0.0.1", 4001),
        ParameterSet::default(),
        options,
    );
    runtime.block_on(session.start()).expect("Failed to start session");

    let mut group = c.benchmark_group("capture");
    group.throughput(Throughput::Bytes(10_000));
    group.bench_function("capture_once_mock", |b| {
        b.iter(|| {
            let frame = runtime.block_on(session.capture_once()).expect("capture failed");
            // keep the call log from growing across iterations
            device.clear_calls();
            black_box(frame)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sampler, bench_capture_once);
criterion_main!(benches);
