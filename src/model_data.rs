//! The embedded default model.
//!
//! Real RNNoise-style deployments ship a pretrained weights file produced by
//! the training harness (see `src/training.rs`); that file is a large opaque
//! binary artifact, out of scope for this crate (see [`crate::model`]'s
//! documentation). What's embedded here is a small, deterministically
//! generated placeholder of the same shape (layer sizes match the reference
//! RNNoise topology), so that [`crate::DenoiseState::new`] works out of the
//! box without requiring an external file.

use once_cell::sync::Lazy;

use crate::model::{Activation, DenseLayer, GruLayer, RnnModel};
use crate::{NB_BANDS, NB_FEATURES};

/// Hidden size of the shared input dense layer.
pub(crate) const INPUT_DENSE_SIZE: usize = 24;
/// Hidden size of the VAD GRU (matches the reference RNNoise topology).
pub const VAD_GRU_SIZE: usize = 24;
/// Hidden size of the noise-estimation GRU.
pub const NOISE_GRU_SIZE: usize = 48;
/// Hidden size of the denoising GRU.
pub const DENOISE_GRU_SIZE: usize = 96;

/// A small, deterministic pseudo-random number generator (splitmix-style),
/// used only to fill the placeholder weight tables below with reproducible,
/// bounded values -- not a cryptographic or statistical RNG.
struct WeightSource {
    state: u64,
}

impl WeightSource {
    fn new(seed: u64) -> WeightSource {
        WeightSource { state: seed }
    }

    fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        // Map to a small, bounded range so that a stack of dense+GRU layers
        // stays numerically tame without any trained scaling.
        let unit = (z >> 40) as f32 / (1u64 << 24) as f32; // in [0, 1)
        (unit - 0.5) * 0.2
    }

    fn fill(&mut self, out: &mut [f32]) {
        for v in out.iter_mut() {
            *v = self.next_f32();
        }
    }
}

fn dense(seed: u64, input_size: usize, output_size: usize, activation: Activation) -> DenseLayer {
    let mut src = WeightSource::new(seed);
    let mut weights = vec![0.0; input_size * output_size];
    let mut bias = vec![0.0; output_size];
    src.fill(&mut weights);
    src.fill(&mut bias);
    DenseLayer {
        input_size,
        output_size,
        weights,
        bias,
        activation,
    }
}

fn gru(seed: u64, input_size: usize, output_size: usize) -> GruLayer {
    let mut src = WeightSource::new(seed);
    let mut layer = GruLayer {
        input_size,
        output_size,
        update_input: vec![0.0; input_size * output_size],
        update_hidden: vec![0.0; output_size * output_size],
        reset_input: vec![0.0; input_size * output_size],
        reset_hidden: vec![0.0; output_size * output_size],
        candidate_input: vec![0.0; input_size * output_size],
        candidate_hidden: vec![0.0; output_size * output_size],
        bias_update: vec![0.0; output_size],
        bias_reset: vec![0.0; output_size],
        bias_candidate: vec![0.0; output_size],
        activation: Activation::Tanh,
    };
    src.fill(&mut layer.update_input);
    src.fill(&mut layer.update_hidden);
    src.fill(&mut layer.reset_input);
    src.fill(&mut layer.reset_hidden);
    src.fill(&mut layer.candidate_input);
    src.fill(&mut layer.candidate_hidden);
    src.fill(&mut layer.bias_update);
    src.fill(&mut layer.bias_reset);
    src.fill(&mut layer.bias_candidate);
    layer
}

pub(crate) static BUILTIN: Lazy<RnnModel> = Lazy::new(|| RnnModel {
    input_dense: dense(1, NB_FEATURES, INPUT_DENSE_SIZE, Activation::Tanh),
    vad_gru: gru(2, INPUT_DENSE_SIZE, VAD_GRU_SIZE),
    noise_gru: gru(3, INPUT_DENSE_SIZE + VAD_GRU_SIZE, NOISE_GRU_SIZE),
    denoise_gru: gru(
        4,
        INPUT_DENSE_SIZE + VAD_GRU_SIZE + NOISE_GRU_SIZE,
        DENOISE_GRU_SIZE,
    ),
    denoise_output: dense(5, DENOISE_GRU_SIZE, NB_BANDS, Activation::Sigmoid),
    vad_output: dense(6, VAD_GRU_SIZE, 1, Activation::Sigmoid),
});
