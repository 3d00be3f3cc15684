//! The RNN collaborator: turns a 42-element feature vector into 22 per-band
//! gains and a voice-activity probability, given (and updating) a small
//! amount of recurrent state.

use crate::model::{DenseLayer, GruLayer, RnnModel};
use crate::NB_BANDS;

/// The per-stream hidden state of the three GRU layers.
///
/// This is owned exclusively by a single [`crate::DenoiseState`]; there is no
/// sharing or aliasing between streams.
#[derive(Clone, Debug)]
pub struct RnnState {
    vad_gru_state: Vec<f32>,
    noise_gru_state: Vec<f32>,
    denoise_gru_state: Vec<f32>,
}

impl RnnState {
    /// Creates a new, zeroed RNN state sized for the builtin model.
    pub fn new() -> RnnState {
        RnnState::with_model(RnnModel::builtin())
    }

    /// Creates a new, zeroed RNN state sized for `model`.
    pub fn with_model(model: &RnnModel) -> RnnState {
        RnnState {
            vad_gru_state: vec![0.0; model.vad_gru_size()],
            noise_gru_state: vec![0.0; model.noise_gru_size()],
            denoise_gru_state: vec![0.0; model.denoise_gru_size()],
        }
    }
}

impl Default for RnnState {
    fn default() -> RnnState {
        RnnState::new()
    }
}

fn apply_dense(layer: &DenseLayer, input: &[f32], out: &mut [f32]) {
    debug_assert_eq!(input.len(), layer.input_size);
    debug_assert_eq!(out.len(), layer.output_size);
    for i in 0..layer.output_size {
        let mut sum = layer.bias[i];
        let row = &layer.weights[i * layer.input_size..(i + 1) * layer.input_size];
        for (w, x) in row.iter().zip(input) {
            sum += w * x;
        }
        out[i] = layer.activation.apply(sum);
    }
}

/// Upper bound on any GRU layer's hidden size or dense layer's input size,
/// used to size stack buffers so that a frame of RNN inference needs no heap
/// allocation. RNNoise-scale models (tens of hidden units) fit comfortably.
const MAX_UNITS: usize = 256;

/// One GRU step: `state` is updated in place given the new `input`.
fn apply_gru(layer: &GruLayer, input: &[f32], state: &mut [f32]) {
    debug_assert_eq!(input.len(), layer.input_size);
    debug_assert_eq!(state.len(), layer.output_size);
    assert!(layer.output_size <= MAX_UNITS, "GRU layer exceeds MAX_UNITS");
    let n = layer.output_size;
    let m = layer.input_size;

    let mut z = [0.0f32; MAX_UNITS];
    let mut r = [0.0f32; MAX_UNITS];
    let mut h = [0.0f32; MAX_UNITS];
    let (z, r, h) = (&mut z[..n], &mut r[..n], &mut h[..n]);

    for i in 0..n {
        let mut zi = layer.bias_update[i];
        let mut ri = layer.bias_reset[i];
        let in_row_u = &layer.update_input[i * m..(i + 1) * m];
        let in_row_r = &layer.reset_input[i * m..(i + 1) * m];
        for j in 0..m {
            zi += in_row_u[j] * input[j];
            ri += in_row_r[j] * input[j];
        }
        let hid_row_u = &layer.update_hidden[i * n..(i + 1) * n];
        let hid_row_r = &layer.reset_hidden[i * n..(i + 1) * n];
        for j in 0..n {
            zi += hid_row_u[j] * state[j];
            ri += hid_row_r[j] * state[j];
        }
        z[i] = Activation::Sigmoid.apply_raw(zi);
        r[i] = Activation::Sigmoid.apply_raw(ri);
    }

    for i in 0..n {
        let mut hi = layer.bias_candidate[i];
        let in_row = &layer.candidate_input[i * m..(i + 1) * m];
        for j in 0..m {
            hi += in_row[j] * input[j];
        }
        let hid_row = &layer.candidate_hidden[i * n..(i + 1) * n];
        for j in 0..n {
            hi += hid_row[j] * (r[i] * state[j]);
        }
        h[i] = layer.activation.apply(hi);
    }

    for i in 0..n {
        state[i] = z[i] * state[i] + (1.0 - z[i]) * h[i];
    }
}

// A tiny local mirror of `model::Activation::Sigmoid`'s formula, used for the
// GRU gates (which are always sigmoid, regardless of the layer's declared
// "output" activation used for the candidate state).
enum Activation {
    Sigmoid,
}
impl Activation {
    fn apply_raw(&self, x: f32) -> f32 {
        0.5 + 0.5 * (0.5 * x).tanh()
    }
}

/// Runs one frame's worth of RNN inference: `features` (length 42) in,
/// `gains` (length [`NB_BANDS`]) and a VAD probability out. `state` is
/// advanced in place.
pub fn compute_rnn(state: &mut RnnState, gains: &mut [f32], vad: &mut [f32], features: &[f32]) {
    compute_rnn_with_model(RnnModel::builtin(), state, gains, vad, features)
}

/// Like [`compute_rnn`], but against an explicit model (used when a
/// [`crate::DenoiseState`] was constructed with a caller-supplied model).
pub(crate) fn compute_rnn_with_model(
    model: &RnnModel,
    state: &mut RnnState,
    gains: &mut [f32],
    vad: &mut [f32],
    features: &[f32],
) {
    debug_assert_eq!(gains.len(), NB_BANDS);
    debug_assert_eq!(vad.len(), 1);
    assert!(model.input_dense.output_size <= MAX_UNITS);

    let mut dense_out = [0.0f32; MAX_UNITS];
    let dense_out = &mut dense_out[..model.input_dense.output_size];
    apply_dense(&model.input_dense, features, dense_out);

    apply_gru(&model.vad_gru, dense_out, &mut state.vad_gru_state);
    apply_dense(&model.vad_output, &state.vad_gru_state, vad);

    let mut concat = [0.0f32; 3 * MAX_UNITS];
    let noise_len = dense_out.len() + state.vad_gru_state.len();
    concat[..dense_out.len()].copy_from_slice(dense_out);
    concat[dense_out.len()..noise_len].copy_from_slice(&state.vad_gru_state);
    apply_gru(&model.noise_gru, &concat[..noise_len], &mut state.noise_gru_state);

    let denoise_len = noise_len + state.noise_gru_state.len();
    concat[noise_len..denoise_len].copy_from_slice(&state.noise_gru_state);
    apply_gru(
        &model.denoise_gru,
        &concat[..denoise_len],
        &mut state.denoise_gru_state,
    );

    apply_dense(&model.denoise_output, &state.denoise_gru_state, gains);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_model_produces_bounded_output() {
        let mut state = RnnState::new();
        let features = [0.1f32; crate::NB_FEATURES];
        let mut gains = [0.0f32; NB_BANDS];
        let mut vad = [0.0f32];
        compute_rnn(&mut state, &mut gains, &mut vad, &features);
        for g in gains.iter() {
            assert!(g.is_finite());
            assert!((0.0..=1.0).contains(g));
        }
        assert!((0.0..=1.0).contains(&vad[0]));
    }

    #[test]
    fn state_updates_across_calls() {
        let mut state = RnnState::new();
        let before = state.denoise_gru_state.clone();
        let features = [0.3f32; crate::NB_FEATURES];
        let mut gains = [0.0f32; NB_BANDS];
        let mut vad = [0.0f32];
        compute_rnn(&mut state, &mut gains, &mut vad, &features);
        assert_ne!(before, state.denoise_gru_state);
    }
}
