use criterion::{criterion_group, criterion_main, Criterion};
use rnn_denoise::DenoiseState;

fn sine_wave(len: usize, freq_hz: f32, sample_rate: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            (i as f32 * freq_hz * 2.0 * std::f32::consts::PI / sample_rate).sin() * 5000.0
        })
        .collect()
}

fn process_frame(c: &mut Criterion) {
    let input = sine_wave(DenoiseState::FRAME_SIZE, 440.0, 48_000.0);
    let mut state = DenoiseState::new();
    let mut out = vec![0.0f32; DenoiseState::FRAME_SIZE];

    c.bench_function("process_frame", |b| {
        b.iter(|| {
            state.process_frame(&mut out[..], &input[..]);
        })
    });
}

criterion_group!(benches, process_frame);
criterion_main!(benches);
