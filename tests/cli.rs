#![cfg(feature = "bin")]

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

fn write_test_wav(path: &std::path::Path, len: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..len {
        let v = ((i as f32 * 220.0 * 2.0 * std::f32::consts::PI / 48_000.0).sin() * 8000.0) as i16;
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn denoises_a_short_wav_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("input.wav");
    let output = dir.child("output.wav");
    write_test_wav(input.path(), 48_000);

    Command::cargo_bin("rnn-denoise")
        .unwrap()
        .arg(input.path())
        .arg("-o")
        .arg(output.path())
        .assert()
        .success();

    output.assert(predicate::path::exists());

    let reader = hound::WavReader::open(output.path()).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(spec.channels, 1);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 48_000);
}
