/*Measures the cost of framing one snapshot for notification and of decoding it
again on the central side, for both wire formats. Encoding runs inside the
snapshot guard, so it bounds how long the transmitter holds the guard. */
use criterion::{
    criterion_group,
    criterion_main,
    Criterion,
    BenchmarkId,
};
use insole_stream::component_a::snapshot::{
    decode_frame, encode_frame, FrameFormat, SensorSnapshot, PRESSURE_CHANNELS,
};
use std::hint::black_box;

fn sample_snapshot() -> SensorSnapshot {
    let mut pressure = [0u16; PRESSURE_CHANNELS];
    for (i, p) in pressure.iter_mut().enumerate() {
        *p = 1_000 + (i as u16) * 37;
    }
    SensorSnapshot {
        timestamp: 123_456,
        battery: 87,
        accel_x: -120,
        accel_y: 45,
        accel_z: 981,
        pressure,
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    let snap = sample_snapshot();

    for format in [FrameFormat::Timestamped, FrameFormat::Legacy] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", format)),
            &format,
            |b, &format| b.iter(|| encode_frame(black_box(&snap), format)),
        );
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");
    let snap = sample_snapshot();

    for format in [FrameFormat::Timestamped, FrameFormat::Legacy] {
        let frame = encode_frame(&snap, format);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", format)),
            &format,
            |b, &format| b.iter(|| decode_frame(black_box(frame.as_bytes()), format)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
