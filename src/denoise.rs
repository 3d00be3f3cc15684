use std::sync::Arc;

use crate::model::RnnModel;
use crate::{
    Complex, CEPS_MEM, FRAME_SIZE, FREQ_SIZE, NB_BANDS, NB_DELTA_CEPS, NB_FEATURES, PITCH_BUF_SIZE,
    PITCH_FRAME_SIZE, PITCH_MAX_PERIOD, PITCH_MIN_PERIOD, WINDOW_SIZE,
};

/// This is the main entry-point into this crate. It mainly contains the various memory buffers
/// that are used while denoising. As such, this is quite a large struct, and should probably be
/// kept behind some kind of pointer.
///
/// # Example
///
/// ```rust
/// # use rnn_denoise::DenoiseState;
/// // One second of 440Hz sine wave at 48kHz sample rate. Note that the input data consists of
/// // `f32`s, but the values should be in the range of an `i16`.
/// let sine: Vec<_> = (0..48_000)
///     .map(|x| (x as f32 * 440.0 * 2.0 * std::f32::consts::PI / 48_000.0).sin() * i16::MAX as f32)
///     .collect();
/// let mut output = Vec::new();
/// let mut out_buf = [0.0; DenoiseState::FRAME_SIZE];
/// let mut denoise = DenoiseState::new();
/// let mut first = true;
/// for chunk in sine.chunks_exact(DenoiseState::FRAME_SIZE) {
///     denoise.process_frame(&mut out_buf[..], chunk);
///
///     // We throw away the first output, as discussed in the documentation for
///     // `DenoiseState::process_frame`.
///     if !first {
///         output.extend_from_slice(&out_buf[..]);
///     }
///     first = false;
/// }
/// ```
pub struct DenoiseState {
    analysis_mem: [f32; FRAME_SIZE],
    /// This is some sort of ring buffer, storing the last bunch of cepstra.
    cepstral_mem: [[f32; NB_BANDS]; CEPS_MEM],
    /// The index pointing to the most recent cepstrum in `cepstral_mem`. The previous cepstra are
    /// at indices `mem_id - 1`, `mem_id - 2`, etc (wrapped appropriately).
    mem_id: usize,
    synthesis_mem: [f32; FRAME_SIZE],
    pitch_buf: [f32; PITCH_BUF_SIZE],
    last_gain: f32,
    last_period: usize,
    mem_hp_x: [f32; 2],
    lastg: [f32; NB_BANDS],
    model: Arc<RnnModel>,
    rnn: crate::rnn::RnnState,
}

impl DenoiseState {
    /// A `DenoiseState` processes this many samples at a time.
    pub const FRAME_SIZE: usize = FRAME_SIZE;

    /// Creates a new `DenoiseState`, using the embedded default model.
    pub fn new() -> Box<DenoiseState> {
        DenoiseState::with_model(Arc::new(RnnModel::builtin().clone()))
    }

    /// Creates a new `DenoiseState` using a caller-supplied model (see
    /// [`RnnModel::from_bytes`]), instead of the embedded default.
    pub fn with_model(model: Arc<RnnModel>) -> Box<DenoiseState> {
        let rnn = crate::rnn::RnnState::with_model(&model);
        Box::new(DenoiseState {
            analysis_mem: [0.0; FRAME_SIZE],
            cepstral_mem: [[0.0; NB_BANDS]; CEPS_MEM],
            mem_id: 0,
            synthesis_mem: [0.0; FRAME_SIZE],
            pitch_buf: [0.0; PITCH_BUF_SIZE],
            last_gain: 0.0,
            last_period: 0,
            mem_hp_x: [0.0; 2],
            lastg: [0.0; NB_BANDS],
            model,
            rnn,
        })
    }

    /// Processes a chunk of samples.
    ///
    /// Both `output` and `input` should be slices of length `DenoiseState::FRAME_SIZE`. Samples
    /// are 32-bit floats with nominal range matching 16-bit PCM (roughly `±32768`, not `±1.0`).
    ///
    /// The current output of `process_frame` depends on the current input, but also on the
    /// preceding inputs. Because of this, you might prefer to discard the very first output; it
    /// will contain some fade-in artifacts.
    ///
    /// Returns the voice-activity probability for this frame, in `[0, 1]`.
    pub fn process_frame(&mut self, output: &mut [f32], input: &[f32]) -> f32 {
        process_frame(self, output, input)
    }

    /// Runs this stream's feature extraction and pitch tracking on `input`
    /// without evaluating the RNN or synthesizing output.
    ///
    /// This is the same analysis [`DenoiseState::process_frame`] performs
    /// internally; it's exposed separately so that the training harness can
    /// pair a noisy frame's features with the ideal gains computed from a
    /// clean reference, without having to also run (and discard) the RNN.
    ///
    /// Returns the feature vector together with the noisy frame's per-band
    /// energy (needed to turn a clean-energy reference into a gain target)
    /// and whether the frame was judged silent.
    #[cfg(feature = "train")]
    pub fn analyze_frame_for_training(
        &mut self,
        input: &[f32],
    ) -> ([f32; NB_FEATURES], [f32; NB_BANDS], bool) {
        let mut x_freq = [Complex::from(0.0); FREQ_SIZE];
        let mut p = [Complex::from(0.0); WINDOW_SIZE];
        let mut x_time = [0.0; FRAME_SIZE];
        let mut ex = [0.0; NB_BANDS];
        let mut ep = [0.0; NB_BANDS];
        let mut exp = [0.0; NB_BANDS];
        let mut features = [0.0; NB_FEATURES];
        const B_HP: [f64; 2] = [-2.0, 1.0];
        const A_HP: [f64; 2] = [-1.99599, 0.99600];

        biquad(&mut x_time[..], &mut self.mem_hp_x, input, B_HP, A_HP);
        let silence = compute_frame_features(
            self,
            &mut x_freq[..],
            &mut p[..],
            &mut ex[..],
            &mut ep[..],
            &mut exp[..],
            &mut features[..],
            &x_time[..],
        ) != 0;
        (features, ex, silence)
    }
}

fn frame_analysis(state: &mut DenoiseState, x: &mut [Complex], ex: &mut [f32], input: &[f32]) {
    let mut buf = [0.0; WINDOW_SIZE];
    buf[..FRAME_SIZE].copy_from_slice(&state.analysis_mem);
    buf[FRAME_SIZE..].copy_from_slice(input);
    state.analysis_mem.copy_from_slice(input);

    crate::apply_window(&mut buf[..]);
    crate::forward_transform(x, &buf[..]);
    crate::compute_band_energy(ex, x);
}

fn compute_frame_features(
    state: &mut DenoiseState,
    x: &mut [Complex],
    p: &mut [Complex],
    ex: &mut [f32],
    ep: &mut [f32],
    exp: &mut [f32],
    features: &mut [f32],
    input: &[f32],
) -> usize {
    let mut ly = [0.0; NB_BANDS];
    let mut p_buf = [0.0; WINDOW_SIZE];
    // Apparently, PITCH_BUF_SIZE wasn't the best name...
    let mut pitch_buf = [0.0; PITCH_BUF_SIZE / 2];
    let mut tmp = [0.0; NB_BANDS];

    frame_analysis(state, x, ex, input);
    state.pitch_buf.copy_within(FRAME_SIZE.., 0);
    state.pitch_buf[PITCH_BUF_SIZE - FRAME_SIZE..].copy_from_slice(input);

    crate::pitch::pitch_downsample(&state.pitch_buf[..], &mut pitch_buf);
    let pitch_idx = crate::pitch::pitch_search(
        &pitch_buf[(PITCH_MAX_PERIOD / 2)..],
        &pitch_buf,
        PITCH_FRAME_SIZE,
        PITCH_MAX_PERIOD - 3 * PITCH_MIN_PERIOD,
    );
    let pitch_idx = PITCH_MAX_PERIOD - pitch_idx;

    let (pitch_idx, gain) = crate::pitch::remove_doubling(
        &pitch_buf[..],
        PITCH_MAX_PERIOD,
        PITCH_MIN_PERIOD,
        PITCH_FRAME_SIZE,
        pitch_idx,
        state.last_period,
        state.last_gain,
    );
    state.last_period = pitch_idx;
    state.last_gain = gain;

    for i in 0..WINDOW_SIZE {
        p_buf[i] = state.pitch_buf[PITCH_BUF_SIZE - WINDOW_SIZE - pitch_idx + i];
    }
    crate::apply_window(&mut p_buf[..]);
    crate::forward_transform(p, &p_buf[..]);
    crate::compute_band_energy(ep, p);
    crate::compute_band_corr(exp, x, p);
    for i in 0..NB_BANDS {
        exp[i] /= (0.001 + ex[i] * ep[i]).sqrt();
    }
    crate::dct(&mut tmp[..], exp);
    for i in 0..NB_DELTA_CEPS {
        features[NB_BANDS + 2 * NB_DELTA_CEPS + i] = tmp[i];
    }

    features[NB_BANDS + 2 * NB_DELTA_CEPS] -= 1.3;
    features[NB_BANDS + 2 * NB_DELTA_CEPS + 1] -= 0.9;
    features[NB_BANDS + 3 * NB_DELTA_CEPS] = 0.01 * (pitch_idx as f32 - 300.0);
    let mut log_max = -2.0;
    let mut follow = -2.0;
    let mut e = 0.0;
    for i in 0..NB_BANDS {
        ly[i] = (1e-2 + ex[i]).log10().max(log_max - 7.0).max(follow - 1.5);
        log_max = log_max.max(ly[i]);
        follow = (follow - 1.5).max(ly[i]);
        e += ex[i];
    }

    if e < 0.04 {
        // If there's no audio, avoid messing up the state.
        for i in 0..NB_FEATURES {
            features[i] = 0.0;
        }
        return 1;
    }
    crate::dct(features, &ly[..]);
    features[0] -= 12.0;
    features[1] -= 4.0;
    let ceps_0_idx = state.mem_id;
    let ceps_1_idx = if state.mem_id < 1 {
        CEPS_MEM + state.mem_id - 1
    } else {
        state.mem_id - 1
    };
    let ceps_2_idx = if state.mem_id < 2 {
        CEPS_MEM + state.mem_id - 2
    } else {
        state.mem_id - 2
    };

    state.cepstral_mem[ceps_0_idx].copy_from_slice(&features[..NB_BANDS]);
    state.mem_id = (state.mem_id + 1) % CEPS_MEM;

    let ceps_0 = state.cepstral_mem[ceps_0_idx];
    let ceps_1 = state.cepstral_mem[ceps_1_idx];
    let ceps_2 = state.cepstral_mem[ceps_2_idx];
    for i in 0..NB_DELTA_CEPS {
        features[i] = ceps_0[i] + ceps_1[i] + ceps_2[i];
        features[NB_BANDS + i] = ceps_0[i] - ceps_2[i];
        features[NB_BANDS + NB_DELTA_CEPS + i] = ceps_0[i] - 2.0 * ceps_1[i] + ceps_2[i];
    }

    // Spectral variability features.
    let mut spec_variability = 0.0;
    for i in 0..CEPS_MEM {
        let mut min_dist = 1e15f32;
        for j in 0..CEPS_MEM {
            if j == i {
                continue;
            }
            let mut dist = 0.0;
            for k in 0..NB_BANDS {
                let d = state.cepstral_mem[i][k] - state.cepstral_mem[j][k];
                dist += d * d;
            }
            min_dist = min_dist.min(dist);
        }
        spec_variability += min_dist;
    }

    features[NB_BANDS + 3 * NB_DELTA_CEPS + 1] = spec_variability / CEPS_MEM as f32 - 2.1;

    0
}

fn frame_synthesis(state: &mut DenoiseState, out: &mut [f32], y: &[Complex]) {
    let mut x = [0.0; WINDOW_SIZE];
    crate::inverse_transform(&mut x[..], y);
    crate::apply_window(&mut x[..]);
    for i in 0..FRAME_SIZE {
        out[i] = x[i] + state.synthesis_mem[i];
        state.synthesis_mem[i] = x[FRAME_SIZE + i];
    }
}

/// A streaming, direct-form-II-transposed biquad, with a fixed numerator
/// leading coefficient of 1. The inner products are accumulated in double
/// precision to match the reference implementation's numerics.
fn biquad(y: &mut [f32], mem: &mut [f32; 2], x: &[f32], b: [f64; 2], a: [f64; 2]) {
    for i in 0..x.len() {
        let xi = x[i] as f64;
        let yi = xi + mem[0] as f64;
        mem[0] = (mem[1] as f64 + (b[0] * xi - a[0] * yi)) as f32;
        mem[1] = (b[1] * xi - a[1] * yi) as f32;
        y[i] = yi as f32;
    }
}

/// Mixes the pitch-aligned spectrum `p` into `x`, attenuating noise between
/// pitch harmonics while conserving each band's total energy.
fn pitch_filter(x: &mut [Complex], p: &[Complex], ex: &[f32], ep: &[f32], exp: &[f32], g: &[f32]) {
    let mut r = [0.0; NB_BANDS];
    let mut rf = [0.0; FREQ_SIZE];
    for i in 0..NB_BANDS {
        r[i] = if exp[i] > g[i] {
            1.0
        } else {
            let exp_sq = exp[i] * exp[i];
            let g_sq = g[i] * g[i];
            exp_sq * (1.0 - g_sq) / (0.001 + g_sq * (1.0 - exp_sq))
        };
        r[i] = r[i].clamp(0.0, 1.0).sqrt();
        r[i] *= (ex[i] / (1e-8 + ep[i])).sqrt();
    }
    crate::interp_band_gain(&mut rf[..], &r[..]);
    for i in 0..FREQ_SIZE {
        x[i] += p[i] * rf[i];
    }

    let mut new_e = [0.0; NB_BANDS];
    crate::compute_band_energy(&mut new_e[..], x);
    let mut norm = [0.0; NB_BANDS];
    let mut normf = [0.0; FREQ_SIZE];
    for i in 0..NB_BANDS {
        norm[i] = (ex[i] / (1e-8 + new_e[i])).sqrt();
    }
    crate::interp_band_gain(&mut normf[..], &norm[..]);
    for i in 0..FREQ_SIZE {
        x[i] *= normf[i];
    }
}

fn process_frame(state: &mut DenoiseState, output: &mut [f32], input: &[f32]) -> f32 {
    let mut x_freq = [Complex::from(0.0); FREQ_SIZE];
    let mut p = [Complex::from(0.0); WINDOW_SIZE];
    let mut x_time = [0.0; FRAME_SIZE];
    let mut ex = [0.0; NB_BANDS];
    let mut ep = [0.0; NB_BANDS];
    let mut exp = [0.0; NB_BANDS];
    let mut features = [0.0; NB_FEATURES];
    let mut g = [0.0; NB_BANDS];
    let mut gf = [1.0; FREQ_SIZE];
    // Fixed hum/DC-suppressing high-pass filter coefficients.
    const B_HP: [f64; 2] = [-2.0, 1.0];
    const A_HP: [f64; 2] = [-1.99599, 0.99600];
    let mut vad_prob = [0.0];

    biquad(&mut x_time[..], &mut state.mem_hp_x, input, B_HP, A_HP);
    let silence = compute_frame_features(
        state,
        &mut x_freq[..],
        &mut p[..],
        &mut ex[..],
        &mut ep[..],
        &mut exp[..],
        &mut features[..],
        &x_time[..],
    );
    if silence == 0 {
        let model = Arc::clone(&state.model);
        crate::rnn::compute_rnn_with_model(
            &model,
            &mut state.rnn,
            &mut g[..],
            &mut vad_prob[..],
            &features[..],
        );
        pitch_filter(&mut x_freq[..], &p[..], &ex[..], &ep[..], &exp[..], &g[..]);
        for i in 0..NB_BANDS {
            g[i] = g[i].max(0.6 * state.lastg[i]);
            state.lastg[i] = g[i];
        }
        crate::interp_band_gain(&mut gf[..], &g[..]);
        for i in 0..FREQ_SIZE {
            x_freq[i] *= gf[i];
        }
    }

    frame_synthesis(state, output, &x_freq[..]);
    vad_prob[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_input_yields_zero_output() {
        let mut state = DenoiseState::new();
        let zeros = [0.0f32; FRAME_SIZE];
        let mut out = [0.0f32; FRAME_SIZE];
        let mut vad = 0.0;
        for _ in 0..10 {
            vad = state.process_frame(&mut out[..], &zeros[..]);
            for &s in out.iter() {
                assert_eq!(s, 0.0);
            }
        }
        assert_eq!(vad, 0.0);
    }

    #[test]
    fn two_streams_are_independent_and_deterministic() {
        let mut a = DenoiseState::new();
        let mut b = DenoiseState::new();
        let input: Vec<f32> = (0..FRAME_SIZE).map(|i| (i as f32 * 0.37).sin() * 5000.0).collect();
        let mut out_a = [0.0f32; FRAME_SIZE];
        let mut out_b = [0.0f32; FRAME_SIZE];
        for _ in 0..5 {
            a.process_frame(&mut out_a[..], &input[..]);
            b.process_frame(&mut out_b[..], &input[..]);
            assert_eq!(out_a, out_b);
        }
    }

    #[test]
    fn silence_gate_preserves_lastg_through_silent_stretch() {
        let mut state = DenoiseState::new();
        let mut out = [0.0f32; FRAME_SIZE];
        let noisy: Vec<f32> = (0..FRAME_SIZE)
            .map(|i| ((i as f32 * 0.9).sin() + (i as f32 * 2.1).cos()) * 5000.0)
            .collect();
        let zeros = [0.0f32; FRAME_SIZE];

        for _ in 0..5 {
            state.process_frame(&mut out[..], &noisy[..]);
        }
        let lastg_noisy = state.lastg;
        assert!(lastg_noisy.iter().any(|&g| g != 0.0));

        for _ in 0..5 {
            state.process_frame(&mut out[..], &zeros[..]);
        }
        // `lastg` is only touched on non-silent frames, so it must survive
        // the silent stretch unchanged.
        assert_eq!(state.lastg, lastg_noisy);
    }

    #[test]
    fn windowed_ola_round_trip_reconstructs_input() {
        // Exercises frame_analysis/frame_synthesis directly, with the
        // spectrum passed through unmodified (no RNN gain, no pitch comb
        // filter): the squared-sine analysis/synthesis window gives perfect
        // overlap-add reconstruction, one frame delayed.
        let mut state = DenoiseState::new();
        let mut x_freq = [Complex::from(0.0); FREQ_SIZE];
        let mut ex = [0.0; NB_BANDS];
        let mut out = [0.0f32; FRAME_SIZE];

        let zeros = [0.0f32; FRAME_SIZE];
        frame_analysis(&mut state, &mut x_freq[..], &mut ex[..], &zeros[..]);
        frame_synthesis(&mut state, &mut out[..], &x_freq[..]);

        let mut impulse = [0.0f32; FRAME_SIZE];
        impulse[0] = 1.0;
        frame_analysis(&mut state, &mut x_freq[..], &mut ex[..], &impulse[..]);
        frame_synthesis(&mut state, &mut out[..], &x_freq[..]);

        frame_analysis(&mut state, &mut x_freq[..], &mut ex[..], &zeros[..]);
        frame_synthesis(&mut state, &mut out[..], &x_freq[..]);

        for (i, &s) in out.iter().enumerate() {
            let expected = if i == 0 { 1.0 } else { 0.0 };
            assert!(
                (s - expected).abs() < 1e-4,
                "sample {}: got {}, expected {}",
                i,
                s,
                expected
            );
        }
    }

    #[test]
    fn with_model_accepts_builtin_clone() {
        let model = Arc::new(RnnModel::builtin().clone());
        let mut state = DenoiseState::with_model(model);
        let input = [0.0f32; FRAME_SIZE];
        let mut out = [0.0f32; FRAME_SIZE];
        state.process_frame(&mut out[..], &input[..]);
    }
}
