//! Real-time, single-channel speech denoising.
//!
//! This crate implements a hybrid signal-processing / recurrent-neural-network
//! denoiser: for every 10ms (480-sample, 48kHz) frame of noisy input, it
//! produces a cleaned 10ms frame of output together with a voice-activity
//! probability. A small network (see [`rnn`]) is evaluated once per frame to
//! predict per-critical-band gains; those gains, together with a pitch-based
//! comb filter, are applied in the frequency domain, and the result is
//! resynthesized by overlap-add.
//!
//! The main entry point is [`DenoiseState`]; see its documentation for an
//! example.
#![deny(missing_docs)]

use once_cell::sync::Lazy;

#[cfg(feature = "train")]
pub mod analysis;
pub mod denoise;
pub mod fft;
pub mod model;
mod model_data;
pub mod pitch;
pub mod rnn;

pub use crate::denoise::DenoiseState;
pub use crate::model::RnnModel;

/// The number of samples in a single frame (10ms at 48kHz).
pub const FRAME_SIZE_SHIFT: usize = 2;
/// The number of samples in a single frame (10ms at 48kHz).
pub const FRAME_SIZE: usize = 120 << FRAME_SIZE_SHIFT;
/// The number of samples used in the analysis window (two frames).
pub const WINDOW_SIZE: usize = 2 * FRAME_SIZE;
/// The number of distinct frequency bins in a one-sided spectrum of a
/// [`WINDOW_SIZE`]-length transform.
pub const FREQ_SIZE: usize = FRAME_SIZE + 1;

/// The minimum pitch period that we will look for, in samples.
pub const PITCH_MIN_PERIOD: usize = 60;
/// The maximum pitch period that we will look for, in samples.
pub const PITCH_MAX_PERIOD: usize = 768;
/// The number of samples used for pitch analysis.
pub const PITCH_FRAME_SIZE: usize = 960;
/// The size of the rolling buffer used to look for pitch periods.
pub const PITCH_BUF_SIZE: usize = PITCH_MAX_PERIOD + PITCH_FRAME_SIZE;

/// The number of critical bands that we divide the spectrum into.
pub const NB_BANDS: usize = 22;
/// The number of old cepstral coefficient vectors that we remember.
pub const CEPS_MEM: usize = 8;
/// The number of cepstral coefficients that contribute delta/delta-delta features.
pub const NB_DELTA_CEPS: usize = 6;
/// The length of the feature vector that is fed to the RNN.
pub const NB_FEATURES: usize = NB_BANDS + 3 * NB_DELTA_CEPS + 2;

/// The edges (in units of 4 FFT bins, i.e. 200Hz groups) of our critical bands.
///
/// There are [`NB_BANDS`] bands, so this has `NB_BANDS` entries; the last
/// entry is the upper edge of the final band.
pub(crate) const EBAND5MS: [usize; NB_BANDS] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// A complex number, used for the frequency-domain representation of a frame.
///
/// This is a thin wrapper so that the rest of the crate isn't tied to any
/// particular FFT crate's complex-number type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex {
    /// The real part.
    pub re: f32,
    /// The imaginary part.
    pub im: f32,
}

impl Complex {
    /// Creates a complex number with the given real part and a zero imaginary part.
    pub fn from(re: f32) -> Complex {
        Complex { re, im: 0.0 }
    }

    /// Creates a complex number from its real and imaginary parts.
    pub fn new(re: f32, im: f32) -> Complex {
        Complex { re, im }
    }

    /// The complex conjugate.
    pub fn conj(self) -> Complex {
        Complex {
            re: self.re,
            im: -self.im,
        }
    }
}

impl std::ops::Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::AddAssign for Complex {
    fn add_assign(&mut self, rhs: Complex) {
        self.re += rhs.re;
        self.im += rhs.im;
    }
}

impl std::ops::Mul<f32> for Complex {
    type Output = Complex;
    fn mul(self, rhs: f32) -> Complex {
        Complex::new(self.re * rhs, self.im * rhs)
    }
}

impl std::ops::MulAssign<f32> for Complex {
    fn mul_assign(&mut self, rhs: f32) {
        self.re *= rhs;
        self.im *= rhs;
    }
}

impl std::ops::Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// Tables that are shared between every [`DenoiseState`]: the analysis window
/// and the DCT basis.
///
/// These only depend on the compile-time constants above, so we build them
/// once (lazily, but without ever needing to re-check an init flag on every
/// call) and share them behind a `'static` reference.
struct CommonState {
    /// `half_window[i]` is the window coefficient at sample `i` (and, by
    /// symmetry, also at sample `WINDOW_SIZE - 1 - i`).
    half_window: [f32; FRAME_SIZE],
    /// The (row-major) DCT-II basis, `dct_table[i * NB_BANDS + j]`.
    dct_table: [f32; NB_BANDS * NB_BANDS],
}

impl CommonState {
    fn new() -> CommonState {
        let mut half_window = [0.0; FRAME_SIZE];
        for (i, w) in half_window.iter_mut().enumerate() {
            let phase = 0.5 * std::f64::consts::PI * (i as f64 + 0.5) / FRAME_SIZE as f64;
            *w = (0.5 * std::f64::consts::PI * phase.sin() * phase.sin()).sin() as f32;
        }

        let mut dct_table = [0.0; NB_BANDS * NB_BANDS];
        for i in 0..NB_BANDS {
            for j in 0..NB_BANDS {
                let mut v =
                    (std::f64::consts::PI * (i as f64 + 0.5) * j as f64 / NB_BANDS as f64).cos();
                if j == 0 {
                    v *= 0.5f64.sqrt();
                }
                dct_table[i * NB_BANDS + j] = v as f32;
            }
        }

        CommonState {
            half_window,
            dct_table,
        }
    }
}

static COMMON: Lazy<CommonState> = Lazy::new(CommonState::new);

/// Computes the DCT-II of a length-[`NB_BANDS`] vector, with the standard
/// orthonormalizing scale factor.
pub fn dct(out: &mut [f32], input: &[f32]) {
    debug_assert_eq!(out.len(), NB_BANDS);
    debug_assert_eq!(input.len(), NB_BANDS);
    let scale = (2.0 / NB_BANDS as f32).sqrt();
    for i in 0..NB_BANDS {
        let mut sum = 0.0;
        for j in 0..NB_BANDS {
            sum += input[j] * COMMON.dct_table[j * NB_BANDS + i];
        }
        out[i] = sum * scale;
    }
}

/// Applies the (symmetric) analysis window to a length-[`WINDOW_SIZE`] buffer, in place.
pub fn apply_window(x: &mut [f32]) {
    debug_assert_eq!(x.len(), WINDOW_SIZE);
    for i in 0..FRAME_SIZE {
        x[i] *= COMMON.half_window[i];
        x[WINDOW_SIZE - 1 - i] *= COMMON.half_window[i];
    }
}

/// Computes the one-sided forward FFT of a length-[`WINDOW_SIZE`] real signal.
pub fn forward_transform(out: &mut [Complex], input: &[f32]) {
    debug_assert_eq!(input.len(), WINDOW_SIZE);
    debug_assert_eq!(out.len(), FREQ_SIZE);
    fft::forward(out, input);
}

/// Computes the inverse FFT of a one-sided, length-[`FREQ_SIZE`] spectrum,
/// reconstructing the Hermitian-symmetric full spectrum first.
///
/// The result is written to `out` (length [`WINDOW_SIZE`]) in the
/// time-reversed order that the overlap-add synthesis step expects, already
/// scaled by `WINDOW_SIZE`.
pub fn inverse_transform(out: &mut [f32], input: &[Complex]) {
    debug_assert_eq!(input.len(), FREQ_SIZE);
    debug_assert_eq!(out.len(), WINDOW_SIZE);
    fft::inverse(out, input);
}

/// Computes the per-band energy of a spectrum, using the triangular,
/// 50%-overlapping critical-band filterbank.
pub fn compute_band_energy(band_e: &mut [f32], x: &[Complex]) {
    compute_band_corr(band_e, x, x);
}

/// Computes the per-band cross-correlation between two spectra, using the
/// same triangular filterbank as [`compute_band_energy`] (which is just the
/// special case `compute_band_corr(e, x, x)`).
pub fn compute_band_corr(band_e: &mut [f32], x: &[Complex], p: &[Complex]) {
    debug_assert_eq!(band_e.len(), NB_BANDS);
    let mut sum = [0.0f32; NB_BANDS];
    for i in 0..NB_BANDS - 1 {
        let band_size = (EBAND5MS[i + 1] - EBAND5MS[i]) << FRAME_SIZE_SHIFT;
        let start = EBAND5MS[i] << FRAME_SIZE_SHIFT;
        for j in 0..band_size {
            let frac = j as f32 / band_size as f32;
            let t = x[start + j].re * p[start + j].re + x[start + j].im * p[start + j].im;
            sum[i] += (1.0 - frac) * t;
            sum[i + 1] += frac * t;
        }
    }
    sum[0] *= 2.0;
    sum[NB_BANDS - 1] *= 2.0;
    band_e.copy_from_slice(&sum);
}

/// Expands a length-[`NB_BANDS`] vector of per-band values into a
/// length-[`FREQ_SIZE`] vector of per-bin values, by linear interpolation
/// across each band's two triangular halves.
pub fn interp_band_gain(g: &mut [f32], band_e: &[f32]) {
    debug_assert_eq!(band_e.len(), NB_BANDS);
    debug_assert_eq!(g.len(), FREQ_SIZE);
    for v in g.iter_mut() {
        *v = 0.0;
    }
    for i in 0..NB_BANDS - 1 {
        let band_size = (EBAND5MS[i + 1] - EBAND5MS[i]) << FRAME_SIZE_SHIFT;
        let start = EBAND5MS[i] << FRAME_SIZE_SHIFT;
        for j in 0..band_size {
            let frac = j as f32 / band_size as f32;
            g[start + j] = (1.0 - frac) * band_e[i] + frac * band_e[i + 1];
        }
    }
}

#[cfg(test)]
static_assertions::const_assert_eq!(NB_FEATURES, NB_BANDS + 3 * NB_DELTA_CEPS + 2);
#[cfg(test)]
static_assertions::const_assert_eq!(FREQ_SIZE, FRAME_SIZE + 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric_and_bounded() {
        for i in 0..FRAME_SIZE {
            let w = COMMON.half_window[i];
            assert!((0.0..=1.0).contains(&w));
        }
    }

    #[test]
    fn dct_round_trips_energy_roughly() {
        let input = [1.0f32; NB_BANDS];
        let mut out = [0.0f32; NB_BANDS];
        dct(&mut out, &input);
        // DC-only input should produce (almost) all of its energy in the
        // first coefficient.
        assert!(out[0].abs() > out[1..].iter().map(|v| v.abs()).fold(0.0, f32::max));
    }

    #[test]
    fn band_partition_of_unity() {
        // interp_band_gain is the adjoint of the binning step in
        // compute_band_energy: re-accumulating its output with the same
        // triangular weights must reproduce the original per-band values.
        let band_e: [f32; NB_BANDS] = {
            let mut b = [0.0; NB_BANDS];
            for (i, v) in b.iter_mut().enumerate() {
                *v = (i + 1) as f32;
            }
            b
        };
        let mut gf = [0.0f32; FREQ_SIZE];
        interp_band_gain(&mut gf, &band_e);

        let mut reconstructed = [0.0f32; NB_BANDS];
        for i in 0..NB_BANDS - 1 {
            let band_size = (EBAND5MS[i + 1] - EBAND5MS[i]) << FRAME_SIZE_SHIFT;
            let start = EBAND5MS[i] << FRAME_SIZE_SHIFT;
            for j in 0..band_size {
                let frac = j as f32 / band_size as f32;
                reconstructed[i] += (1.0 - frac) * gf[start + j];
                reconstructed[i + 1] += frac * gf[start + j];
            }
        }
        reconstructed[0] *= 2.0;
        reconstructed[NB_BANDS - 1] *= 2.0;
        for i in 0..NB_BANDS {
            assert!(
                (reconstructed[i] - band_e[i]).abs() < 1e-3 * band_e[i].max(1.0),
                "band {} reconstructed {} expected {}",
                i,
                reconstructed[i],
                band_e[i]
            );
        }
    }
}
