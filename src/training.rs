//! Offline training-data generator.
//!
//! Mirrors the synthetic speech/noise mixing harness used to train the
//! reference RNNoise model: for each example, a speech clip and a noise clip
//! are randomly leveled and spectrally colored, then mixed. The mixed
//! signal's per-frame features (the same ones [`rnn_denoise::DenoiseState`]
//! feeds its RNN) are paired with the "ideal" per-band gain recovered from
//! the clean speech energy, producing a `(features, gains, vad)` training
//! matrix. Actually training a model from this matrix is out of scope here;
//! this binary only produces the matrix.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use ndarray::Array2;
use rand::prelude::*;
use rnn_denoise::analysis::BandEnergyAnalyzer;
use rnn_denoise::{DenoiseState, NB_BANDS, NB_FEATURES};

const FRAME_SIZE: usize = DenoiseState::FRAME_SIZE;
/// Below this summed clean-band energy, a frame is labeled as non-speech.
const VAD_ENERGY_THRESHOLD: f32 = 0.1;

struct Args {
    speech_glob: String,
    noise_glob: String,
    count: usize,
    output: PathBuf,
}

fn parse_args() -> Args {
    let matches = Command::new("train")
        .about("Generates (features, gains, vad) training examples from speech/noise corpora")
        .arg(
            Arg::new("speech")
                .long("speech")
                .help("glob pattern matching clean-speech WAV files")
                .required(true),
        )
        .arg(
            Arg::new("noise")
                .long("noise")
                .help("glob pattern matching noise-only WAV files")
                .required(true),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .help("number of mixed examples to generate")
                .value_parser(value_parser!(usize))
                .default_value("1000"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("HDF5 file to write the training matrix to")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    Args {
        speech_glob: matches.get_one::<String>("speech").unwrap().clone(),
        noise_glob: matches.get_one::<String>("noise").unwrap().clone(),
        count: *matches.get_one::<usize>("count").unwrap(),
        output: matches.get_one::<PathBuf>("output").unwrap().clone(),
    }
}

fn load_corpus(pattern: &str) -> Result<Vec<Vec<f32>>> {
    let mut clips = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
        let path = entry?;
        let mut reader = hound::WavReader::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let spec = reader.spec();
        anyhow::ensure!(
            spec.channels == 1 && spec.sample_rate == 48_000,
            "{} is not 48kHz mono (got {} Hz, {} channels)",
            path.display(),
            spec.sample_rate,
            spec.channels
        );
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32))
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| v * i16::MAX as f32))
                .collect::<std::result::Result<_, _>>()?,
        };
        log::debug!("loaded {} ({} samples)", path.display(), samples.len());
        clips.push(samples);
    }
    anyhow::ensure!(!clips.is_empty(), "no files matched {}", pattern);
    Ok(clips)
}

/// A direct-form-II biquad, used only to randomly spectrally color the noise
/// clips before mixing (a crude stand-in for recording-channel coloring).
struct Biquad {
    b: [f32; 3],
    a: [f32; 2],
    mem: [f32; 2],
}

impl Biquad {
    /// A random first-order-ish lowpass/highpass blend, parameterized by a
    /// random cutoff; not acoustically calibrated, just enough variety that
    /// the training set isn't all spectrally identical noise.
    fn random(rng: &mut impl Rng) -> Biquad {
        let cutoff: f32 = rng.gen_range(0.05..0.45);
        let k = (std::f32::consts::PI * cutoff).tan();
        let norm = 1.0 / (1.0 + k);
        if rng.gen_bool(0.5) {
            // lowpass
            Biquad {
                b: [k * norm, k * norm, 0.0],
                a: [(k - 1.0) * norm, 0.0],
                mem: [0.0; 2],
            }
        } else {
            // highpass
            Biquad {
                b: [norm, -norm, 0.0],
                a: [(k - 1.0) * norm, 0.0],
                mem: [0.0; 2],
            }
        }
    }

    fn apply(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let x = *s;
            let y = self.b[0] * x + self.mem[0];
            self.mem[0] = self.b[1] * x - self.a[0] * y + self.mem[1];
            self.mem[1] = self.b[2] * x - self.a[1] * y;
            *s = y;
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args();

    log::info!("loading speech corpus from {}", args.speech_glob);
    let speech = load_corpus(&args.speech_glob)?;
    log::info!("loading noise corpus from {}", args.noise_glob);
    let noise = load_corpus(&args.noise_glob)?;

    let mut rng = rand::thread_rng();
    let mut feature_rows = Vec::with_capacity(args.count);
    let mut gain_rows = Vec::with_capacity(args.count);
    let mut vad_rows = Vec::with_capacity(args.count);

    for example in 0..args.count {
        let speech_clip = speech.choose(&mut rng).unwrap();
        let noise_clip = noise.choose(&mut rng).unwrap();
        let len = speech_clip.len().min(4 * 48_000);
        if len < FRAME_SIZE {
            continue;
        }

        let speech_gain: f32 = rng.gen_range(0.3..1.0);
        let noise_gain: f32 = rng.gen_range(0.0..0.6);
        let mut color = Biquad::random(&mut rng);

        let mut noisy_state = DenoiseState::new();
        let mut clean_analyzer = BandEnergyAnalyzer::new();

        let frames = len / FRAME_SIZE;
        for f in 0..frames {
            let start = f * FRAME_SIZE;
            let mut clean_frame = speech_clip[start..start + FRAME_SIZE].to_vec();
            for v in clean_frame.iter_mut() {
                *v *= speech_gain;
            }

            let mut noise_frame: Vec<f32> = (0..FRAME_SIZE)
                .map(|i| noise_clip[(start + i) % noise_clip.len()])
                .collect();
            color.apply(&mut noise_frame);
            for v in noise_frame.iter_mut() {
                *v *= noise_gain;
            }

            let mixed: Vec<f32> = clean_frame
                .iter()
                .zip(noise_frame.iter())
                .map(|(&c, &n)| c + n)
                .collect();

            let (features, ex, silence) = noisy_state.analyze_frame_for_training(&mixed[..]);
            let ey = clean_analyzer.band_energy(&clean_frame[..]);
            if silence {
                continue;
            }

            let mut gains = [0.0f32; NB_BANDS];
            for i in 0..NB_BANDS {
                gains[i] = (ey[i] / (ex[i] + 1e-9)).sqrt().clamp(0.0, 1.0);
            }
            let vad = if ey.iter().sum::<f32>() > VAD_ENERGY_THRESHOLD {
                1.0
            } else {
                0.0
            };

            feature_rows.push(features);
            gain_rows.push(gains);
            vad_rows.push(vad);
        }

        if example % 100 == 0 {
            log::info!("generated {}/{} examples", example, args.count);
        }
    }

    anyhow::ensure!(!feature_rows.is_empty(), "no non-silent frames were generated");

    let n = feature_rows.len();
    let features = Array2::from_shape_vec(
        (n, NB_FEATURES),
        feature_rows.into_iter().flatten().collect(),
    )?;
    let gains = Array2::from_shape_vec((n, NB_BANDS), gain_rows.into_iter().flatten().collect())?;
    let vad = Array2::from_shape_vec((n, 1), vad_rows)?;

    let file = hdf5::File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    file.new_dataset_builder()
        .with_data(&features)
        .create("features")
        .context("failed to write features dataset")?;
    file.new_dataset_builder()
        .with_data(&gains)
        .create("gains")
        .context("failed to write gains dataset")?;
    file.new_dataset_builder()
        .with_data(&vad)
        .create("vad")
        .context("failed to write vad dataset")?;

    log::info!("wrote {} training examples to {}", n, args.output.display());
    Ok(())
}
