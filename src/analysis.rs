//! Band-energy analysis with no pitch tracking, used only by the training
//! harness to measure the clean-speech and noise-only energy that a mixed,
//! noisy frame should be denoised towards.
//!
//! This mirrors [`crate::denoise`]'s own windowed analysis step, but without
//! any of the pitch or cepstral state a real-time stream needs — the
//! training harness runs this once per reference signal (speech-only,
//! noise-only) alongside the full [`crate::DenoiseState`] analysis of the
//! mixed signal.

use crate::{Complex, FRAME_SIZE, FREQ_SIZE, NB_BANDS, WINDOW_SIZE};

/// Tracks the one frame of window overlap needed to analyze a stream of
/// frames independently of a full [`crate::DenoiseState`].
pub struct BandEnergyAnalyzer {
    mem: [f32; FRAME_SIZE],
}

impl BandEnergyAnalyzer {
    /// Creates a new analyzer with zeroed overlap memory.
    pub fn new() -> BandEnergyAnalyzer {
        BandEnergyAnalyzer {
            mem: [0.0; FRAME_SIZE],
        }
    }

    /// Computes the per-band energy of one frame (length [`FRAME_SIZE`]),
    /// given the windowing continuity from the previous call.
    pub fn band_energy(&mut self, input: &[f32]) -> [f32; NB_BANDS] {
        debug_assert_eq!(input.len(), FRAME_SIZE);
        let mut buf = [0.0; WINDOW_SIZE];
        buf[..FRAME_SIZE].copy_from_slice(&self.mem);
        buf[FRAME_SIZE..].copy_from_slice(input);
        self.mem.copy_from_slice(input);

        crate::apply_window(&mut buf[..]);
        let mut x = [Complex::from(0.0); FREQ_SIZE];
        crate::forward_transform(&mut x[..], &buf[..]);
        let mut e = [0.0; NB_BANDS];
        crate::compute_band_energy(&mut e[..], &x[..]);
        e
    }
}

impl Default for BandEnergyAnalyzer {
    fn default() -> BandEnergyAnalyzer {
        BandEnergyAnalyzer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_energy() {
        let mut a = BandEnergyAnalyzer::new();
        let zeros = [0.0f32; FRAME_SIZE];
        for _ in 0..3 {
            let e = a.band_energy(&zeros[..]);
            for v in e.iter() {
                assert_eq!(*v, 0.0);
            }
        }
    }
}
