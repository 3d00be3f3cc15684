//! Command-line front end: denoises a WAV file, frame by frame.
//!
//! This binary is ambient plumbing around the crate's real-time core — it
//! owns file I/O, resampling, and argument parsing, none of which
//! [`rnn_denoise::DenoiseState`] needs to know about.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use dasp::{signal, Signal};
use dasp_interpolate::sinc::Sinc;
use dasp_ring_buffer::Fixed;
use rnn_denoise::{DenoiseState, RnnModel};

const TARGET_SAMPLE_RATE: u32 = 48_000;

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("rnn-denoise")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time single-channel speech denoising")
        .arg(
            Arg::new("input")
                .help("input WAV file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("output WAV file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .help("path to a model file produced by the training harness")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let input_path = matches.get_one::<PathBuf>("input").unwrap();
    let output_path = matches.get_one::<PathBuf>("output").unwrap();

    let model = match matches.get_one::<PathBuf>("model") {
        Some(path) => {
            log::info!("loading model from {}", path.display());
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read model file {}", path.display()))?;
            Arc::new(RnnModel::from_bytes(&bytes).context("failed to parse model file")?)
        }
        None => {
            log::debug!("no --model given, using the embedded default model");
            Arc::new(RnnModel::builtin().clone())
        }
    };

    run(input_path, output_path, model)
}

fn run(input_path: &PathBuf, output_path: &PathBuf, model: Arc<RnnModel>) -> Result<()> {
    let reader = BufReader::new(
        File::open(input_path)
            .with_context(|| format!("failed to open input file {}", input_path.display()))?,
    );
    let mut wav = hound::WavReader::new(reader)
        .with_context(|| format!("failed to parse WAV header in {}", input_path.display()))?;
    let spec = wav.spec();
    log::info!(
        "input: {} Hz, {} channel(s), {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );
    anyhow::ensure!(
        spec.channels == 1,
        "only single-channel (mono) input is supported, got {} channels",
        spec.channels
    );

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => wav
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32))
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode integer PCM samples")?,
        hound::SampleFormat::Float => wav
            .samples::<f32>()
            .map(|s| s.map(|v| v * i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode float PCM samples")?,
    };

    let samples = if spec.sample_rate == TARGET_SAMPLE_RATE {
        samples
    } else {
        log::info!(
            "resampling from {} Hz to {} Hz",
            spec.sample_rate,
            TARGET_SAMPLE_RATE
        );
        resample(&samples, spec.sample_rate, TARGET_SAMPLE_RATE)
    };

    let out_spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output_path, out_spec)
        .with_context(|| format!("failed to create output file {}", output_path.display()))?;

    let mut denoise = DenoiseState::with_model(model);
    let mut in_buf = [0.0f32; DenoiseState::FRAME_SIZE];
    let mut out_buf = [0.0f32; DenoiseState::FRAME_SIZE];
    let mut frames = 0usize;

    for chunk in samples.chunks(DenoiseState::FRAME_SIZE) {
        in_buf[..chunk.len()].copy_from_slice(chunk);
        for v in in_buf[chunk.len()..].iter_mut() {
            *v = 0.0;
        }
        let vad = denoise.process_frame(&mut out_buf[..], &in_buf[..]);
        log::trace!("frame {} vad={:.3}", frames, vad);
        for &s in out_buf.iter() {
            writer
                .write_sample(s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                .context("failed to write output sample")?;
        }
        frames += 1;
    }

    writer.finalize().context("failed to finalize output file")?;
    log::info!("processed {} frames", frames);
    Ok(())
}

/// Resamples `samples` from `from_rate` to `to_rate` using a windowed-sinc
/// interpolator, matching the quality the teacher's `dasp_interpolate`
/// dependency was chosen to provide.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ring: Fixed<[f32; 128]> = Fixed::from([0.0; 128]);
    let sinc = Sinc::new(ring);
    let source = signal::from_iter(samples.iter().copied());
    let converted = source.from_hz_to_hz(sinc, from_rate as f64, to_rate as f64);
    let n_out = (samples.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    converted.until_exhausted().take(n_out).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_preserves_duration_ratio() {
        let samples = vec![0.0f32; 480];
        let out = resample(&samples, 44_100, 48_000);
        let expected = (480.0 * 48_000.0 / 44_100.0).ceil() as usize;
        assert_eq!(out.len(), expected);
    }
}
