//! The FFT collaborator: a complex forward/inverse transform of length
//! [`crate::WINDOW_SIZE`].
//!
//! The rest of the crate only ever needs the one-sided spectrum of a real
//! input, and the corresponding inverse, so that's the interface we expose
//! here; the actual transform is delegated to `easyfft`.

use easyfft::dyn_size::realfft::DynRealDft;
use easyfft::prelude::*;

use crate::{Complex, FREQ_SIZE, WINDOW_SIZE};

/// Forward real FFT of a length-[`WINDOW_SIZE`] signal, truncated to its
/// one-sided, length-[`FREQ_SIZE`] spectrum.
pub(crate) fn forward(out: &mut [Complex], input: &[f32]) {
    debug_assert_eq!(input.len(), WINDOW_SIZE);
    debug_assert_eq!(out.len(), FREQ_SIZE);

    let spectrum: DynRealDft<f32> = input.real_fft();
    for (o, c) in out.iter_mut().zip(spectrum.get_frequency_bins()) {
        *o = Complex::new(c.re, c.im);
    }
}

/// Inverse real FFT: reconstructs the Hermitian-symmetric spectrum from its
/// one-sided half, transforms back to the time domain, and emits the samples
/// in the time-reversed, `WINDOW_SIZE`-scaled order that frame synthesis
/// (overlap-add) expects.
///
/// `easyfft`'s inverse transform already divides by `WINDOW_SIZE`; we undo
/// that (multiplying back up) so that the net gain through a
/// forward-then-inverse round trip stays at one, matching the reference
/// implementation's unscaled-forward/explicitly-scaled-inverse convention.
pub(crate) fn inverse(out: &mut [f32], input: &[Complex]) {
    debug_assert_eq!(input.len(), FREQ_SIZE);
    debug_assert_eq!(out.len(), WINDOW_SIZE);

    let mut full = vec![easyfft::num_complex::Complex32::new(0.0, 0.0); FREQ_SIZE];
    for (f, c) in full.iter_mut().zip(input.iter()) {
        *f = easyfft::num_complex::Complex32::new(c.re, c.im);
    }
    let spectrum = DynRealDft::new(full[0].re, &full[1..], WINDOW_SIZE);
    let time: Vec<f32> = spectrum.real_ifft();

    out[0] = WINDOW_SIZE as f32 * time[0];
    for i in 1..WINDOW_SIZE {
        out[i] = WINDOW_SIZE as f32 * time[WINDOW_SIZE - i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_then_inverse_round_trips() {
        let mut input = [0.0f32; WINDOW_SIZE];
        for (i, x) in input.iter_mut().enumerate() {
            *x = ((i as f32) * 0.01).sin();
        }
        let mut spectrum = [Complex::from(0.0); FREQ_SIZE];
        forward(&mut spectrum, &input);

        let mut time = [0.0f32; WINDOW_SIZE];
        inverse(&mut time, &spectrum);

        // `inverse` emits time-reversed, WINDOW_SIZE-scaled samples; undo
        // that to compare against the original input.
        let mut restored = [0.0f32; WINDOW_SIZE];
        restored[0] = time[0] / WINDOW_SIZE as f32;
        for i in 1..WINDOW_SIZE {
            restored[i] = time[WINDOW_SIZE - i] / WINDOW_SIZE as f32;
        }
        for i in 0..WINDOW_SIZE {
            assert!(
                (restored[i] - input[i]).abs() < 1e-3,
                "sample {}: {} vs {}",
                i,
                restored[i],
                input[i]
            );
        }
    }
}
