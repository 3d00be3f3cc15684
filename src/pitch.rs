//! Open-loop pitch estimation.
//!
//! This is a fairly direct translation of the classical pitch search used by
//! CELT/RNNoise: downsample, whiten with a short LPC, coarse-search by
//! autocorrelation, then refine the coarse lag and remove octave ("doubling")
//! errors by checking sub-multiples of the coarse period.

use crate::{PITCH_BUF_SIZE, PITCH_FRAME_SIZE, PITCH_MAX_PERIOD, PITCH_MIN_PERIOD};

/// Computes the linear-prediction coefficients (order `lpc.len()`) from an
/// autocorrelation sequence `ac` (of length `lpc.len() + 1`), using the
/// Levinson-Durbin recursion.
fn celt_lpc(lpc: &mut [f32], ac: &[f32]) {
    let p = lpc.len();
    let mut error = ac[0];

    for b in lpc.iter_mut() {
        *b = 0.0;
    }

    if ac[0] == 0.0 {
        return;
    }

    for i in 0..p {
        let mut rr = 0.0;
        for j in 0..i {
            rr += lpc[j] * ac[i - j];
        }
        rr += ac[i + 1];
        let r = -rr / error;
        lpc[i] = r;
        for j in 0..((i + 1) / 2) {
            let tmp1 = lpc[j];
            let tmp2 = lpc[i - 1 - j];
            lpc[j] = tmp1 + r * tmp2;
            lpc[i - 1 - j] = tmp2 + r * tmp1;
        }

        error -= r * r * error;
        if error < 0.001 * ac[0] {
            return;
        }
    }
}

/// The (unnormalized) cross-correlation of `x` against sliding windows of `y`.
///
/// `y` must have length `x.len() + xcorr.len() - 1`.
fn pitch_xcorr(x: &[f32], y: &[f32], xcorr: &mut [f32]) {
    for (i, out) in xcorr.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (j, &xj) in x.iter().enumerate() {
            sum += xj * y[j + i];
        }
        *out = sum;
    }
}

/// Returns the indices of the largest and second-largest normalized
/// autocorrelation in `xcorr` (the autocorrelation of `ys`, in windows of
/// length `len`).
fn find_best_pitch(xcorr: &[f32], ys: &[f32], len: usize) -> (usize, usize) {
    let mut best_num = -1.0;
    let mut second_best_num = -1.0;
    let mut best_den = 0.0f32;
    let mut second_best_den = 0.0f32;
    let mut best_pitch = 0;
    let mut second_best_pitch = 1;
    let mut y_sq_norm = 1.0f32;
    for y in &ys[0..len] {
        y_sq_norm += y * y;
    }
    for (i, &corr) in xcorr.iter().enumerate() {
        if corr > 0.0 {
            let num = corr * corr;
            if num * second_best_den > second_best_num * y_sq_norm {
                if num * best_den > best_num * y_sq_norm {
                    second_best_num = best_num;
                    second_best_den = best_den;
                    second_best_pitch = best_pitch;
                    best_num = num;
                    best_den = y_sq_norm;
                    best_pitch = i;
                } else {
                    second_best_num = num;
                    second_best_den = y_sq_norm;
                    second_best_pitch = i;
                }
            }
        }
        y_sq_norm += ys[i + len] * ys[i + len] - ys[i] * ys[i];
        y_sq_norm = y_sq_norm.max(1.0);
    }
    (best_pitch, second_best_pitch)
}

/// Coarse pitch search: finds the lag (in `[0, max_pitch)`) maximizing
/// normalized autocorrelation, using a two-stage (quarter-rate, then
/// half-rate) decimated search followed by pseudo-interpolation.
///
/// `x_lp` has length `len / 2`; `y` has length `len / 2 + max_pitch`.
pub(crate) fn pitch_search(x_lp: &[f32], y: &[f32], len: usize, max_pitch: usize) -> usize {
    // Sized for this crate's one call site (len = PITCH_FRAME_SIZE, max_pitch
    // = PITCH_MAX_PERIOD - 3*PITCH_MIN_PERIOD); fixed arrays instead of the
    // reference's per-call allocations.
    const MAX_LEN4: usize = PITCH_FRAME_SIZE / 4;
    const MAX_LAG4: usize = (PITCH_FRAME_SIZE + PITCH_MAX_PERIOD) / 4 + 1;
    const MAX_XCORR: usize = PITCH_MAX_PERIOD / 2;

    let lag = len + max_pitch;
    debug_assert!(x_lp.len() >= len / 2);
    debug_assert!(y.len() >= lag / 2);

    let mut x_lp4 = [0.0f32; MAX_LEN4];
    let mut y_lp4 = [0.0f32; MAX_LAG4];
    let mut xcorr = [0.0f32; MAX_XCORR];

    let x4_len = len / 4;
    let y4_len = lag / 4;
    for j in 0..x4_len {
        x_lp4[j] = x_lp[2 * j];
    }
    for j in 0..y4_len {
        y_lp4[j] = y[2 * j];
    }

    pitch_xcorr(&x_lp4[0..x4_len], &y_lp4[0..y4_len], &mut xcorr[0..(max_pitch / 4)]);
    let (best_pitch, second_best_pitch) =
        find_best_pitch(&xcorr[0..(max_pitch / 4)], &y_lp4[0..y4_len], x4_len);

    // Finer search with 2x decimation.
    for i in 0..(max_pitch / 2) {
        xcorr[i] = 0.0;
        if (i as isize - 2 * best_pitch as isize).abs() > 2
            && (i as isize - 2 * second_best_pitch as isize).abs() > 2
        {
            continue;
        }
        let mut sum = 0.0;
        for j in 0..(len / 2) {
            sum += x_lp[j] * y[j + i];
        }
        xcorr[i] = sum.max(-1.0);
    }

    let (best_pitch, _) = find_best_pitch(&xcorr[0..(max_pitch / 2)], y, len / 2);

    let offset: isize = if best_pitch > 0 && best_pitch < (max_pitch / 2) - 1 {
        let a = xcorr[best_pitch - 1];
        let b = xcorr[best_pitch];
        let c = xcorr[best_pitch + 1];
        if c - a > 0.7 * (b - a) {
            1
        } else if a - c > 0.7 * (b - c) {
            -1
        } else {
            0
        }
    } else {
        0
    };
    (2 * best_pitch as isize - offset) as usize
}

/// A 5-tap streaming FIR filter, used to apply the whitening LPC during
/// downsampling. Operates in place: `buf[i]` is read before being
/// overwritten, so no separate output buffer is needed.
fn fir5_in_place(buf: &mut [f32], num: &[f32; 5], mem: &mut [f32; 5]) {
    let (num0, num1, num2, num3, num4) = (num[0], num[1], num[2], num[3], num[4]);
    let (mut mem0, mut mem1, mut mem2, mut mem3, mut mem4) = (mem[0], mem[1], mem[2], mem[3], mem[4]);

    for x in buf.iter_mut() {
        let xi = *x;
        let sum = xi + num0 * mem0 + num1 * mem1 + num2 * mem2 + num3 * mem3 + num4 * mem4;
        mem4 = mem3;
        mem3 = mem2;
        mem2 = mem1;
        mem1 = mem0;
        mem0 = xi;
        *x = sum;
    }

    *mem = [mem0, mem1, mem2, mem3, mem4];
}

/// Computes the autocorrelation of `x`, for lags `0..ac.len()`.
fn celt_autocorr(x: &[f32], ac: &mut [f32]) {
    let n = x.len();
    let lag = ac.len() - 1;
    let fast_n = n - lag;
    pitch_xcorr(&x[0..fast_n], x, ac);

    for (k, out) in ac.iter_mut().enumerate() {
        let mut d = 0.0;
        for i in (k + fast_n)..n {
            d += x[i] * x[i - k];
        }
        *out += d;
    }
}

/// Downsamples the (high-passed) pitch history by 2, whitening it with a
/// short (order-4) LPC computed from its own autocorrelation.
///
/// `x` has length [`PITCH_BUF_SIZE`]; `x_lp` has length `PITCH_BUF_SIZE / 2`.
pub(crate) fn pitch_downsample(x: &[f32], x_lp: &mut [f32]) {
    debug_assert_eq!(x.len(), PITCH_BUF_SIZE);
    debug_assert_eq!(x_lp.len(), PITCH_BUF_SIZE / 2);

    for i in 1..x_lp.len() {
        x_lp[i] = 0.25 * (x[2 * i - 1] + x[2 * i + 1]) + 0.5 * x[2 * i];
    }
    x_lp[0] = 0.25 * x[1] + 0.5 * x[0];

    let mut ac = [0.0f32; 5];
    celt_autocorr(x_lp, &mut ac);

    ac[0] *= 1.0001;
    for (i, a) in ac.iter_mut().enumerate().skip(1) {
        let damp = 0.008 * i as f32;
        *a -= *a * damp * damp;
    }

    let mut lpc = [0.0f32; 4];
    celt_lpc(&mut lpc, &ac);

    let mut tmp = 1.0f32;
    for c in lpc.iter_mut() {
        tmp *= 0.9;
        *c *= tmp;
    }

    let c1 = 0.8;
    let lpc2 = [
        lpc[0] + 0.8,
        lpc[1] + c1 * lpc[0],
        lpc[2] + c1 * lpc[1],
        lpc[3] + c1 * lpc[2],
        c1 * lpc[3],
    ];
    let mut mem = [0.0f32; 5];
    fir5_in_place(x_lp, &lpc2, &mut mem);
}

fn compute_pitch_gain(xy: f32, xx: f32, yy: f32) -> f32 {
    xy / (1.0 + xx * yy).sqrt()
}

/// The sub-multiple, for each possible divisor `k`, used as a secondary
/// lag candidate when checking for octave errors at `T0 / k`.
const SECOND_CHECK: [usize; 16] = [0, 0, 3, 2, 3, 2, 5, 2, 3, 2, 3, 2, 5, 2, 3, 2];

/// Refines a coarse pitch estimate, preferring the shortest plausible period
/// among integer sub-multiples of the coarse lag ("doubling removal"), with
/// hysteresis toward the previous frame's period for continuity.
///
/// Returns the refined pitch period (clamped to `[PITCH_MIN_PERIOD,
/// PITCH_MAX_PERIOD]`) and an associated gain in `[0, 1]`.
pub(crate) fn remove_doubling(
    pitch_buf: &[f32],
    max_period: usize,
    min_period: usize,
    n_full: usize,
    t0_init: usize,
    prev_period: usize,
    prev_gain: f32,
) -> (usize, f32) {
    let minperiod0 = min_period;
    let maxperiod = max_period / 2;
    let minperiod = (min_period / 2).max(1);
    let mut t0 = (t0_init / 2).min(maxperiod - 1);
    let prev_period = prev_period / 2;
    let n = n_full / 2;

    // `x(i)` indexes `pitch_buf` relative to a base offset of `maxperiod`
    // samples in (mirroring the reference's `x += maxperiod` pointer bump),
    // which is exactly where `pitch_search`'s caller already sliced from.
    let base = maxperiod;
    debug_assert!(base + n <= pitch_buf.len());
    let xv = |i: isize| -> f32 { pitch_buf[(base as isize + i) as usize] };

    let mut yy_lookup = [0.0f32; PITCH_MAX_PERIOD / 2 + 1];
    let yy_lookup = &mut yy_lookup[..=maxperiod];
    let (mut xx, mut xy) = (0.0, 0.0);
    for j in 0..n {
        let xj = xv(j as isize);
        xx += xj * xj;
        xy += xj * xv(j as isize - t0 as isize);
    }
    yy_lookup[0] = xx;
    let mut yy = xx;
    for i in 1..=maxperiod {
        let old = xv(-(i as isize));
        let new = xv((n as isize) - i as isize);
        yy += old * old - new * new;
        yy_lookup[i] = yy.max(0.0);
    }

    let yy_t0 = yy_lookup[t0];
    let mut best_xy = xy;
    let mut best_yy = yy_t0;
    let g0 = compute_pitch_gain(xy, xx, yy_t0);
    let mut g = g0;
    let mut t = t0;

    let mut k = 2;
    while k <= 15 {
        let t1 = (2 * t0 + k) / (2 * k);
        if t1 < minperiod {
            break;
        }
        let t1b = if k == 2 {
            if t1 + t0 > maxperiod {
                t0
            } else {
                t0 - t1
            }
        } else {
            (2 * SECOND_CHECK[k] * t0 + k) / (2 * k)
        };

        let (mut xy_a, mut xy_b) = (0.0, 0.0);
        for j in 0..n {
            let xj = xv(j as isize);
            xy_a += xj * xv(j as isize - t1 as isize);
            xy_b += xj * xv(j as isize - t1b as isize);
        }
        let xy1 = 0.5 * (xy_a + xy_b);
        let yy1 = 0.5 * (yy_lookup[t1] + yy_lookup[t1b]);
        let g1 = compute_pitch_gain(xy1, xx, yy1);

        let cont = if (t1 as isize - prev_period as isize).abs() <= 1 {
            prev_gain
        } else if (t1 as isize - prev_period as isize).abs() <= 2 && 5 * k * k < t0 {
            prev_gain * 0.5
        } else {
            0.0
        };

        let mut thresh = (0.3f32).max(0.7 * g0 - cont);
        if t1 < 3 * minperiod {
            thresh = (0.4f32).max(0.85 * g0 - cont);
        } else if t1 < 2 * minperiod {
            thresh = (0.5f32).max(0.9 * g0 - cont);
        }

        if g1 > thresh {
            best_xy = xy1;
            best_yy = yy1;
            t = t1;
            g = g1;
        }
        k += 1;
    }

    best_xy = best_xy.max(0.0);
    let pg = if best_yy <= best_xy {
        1.0
    } else {
        best_xy / (best_yy + 1.0)
    };

    let mut xcorr = [0.0f32; 3];
    for (k, out) in xcorr.iter_mut().enumerate() {
        let lag = t as isize + (k as isize - 1);
        let mut sum = 0.0;
        for j in 0..n {
            sum += xv(j as isize) * xv(j as isize - lag);
        }
        *out = sum;
    }
    let offset: isize = if xcorr[2] - xcorr[0] > 0.7 * (xcorr[1] - xcorr[0]) {
        1
    } else if xcorr[0] - xcorr[2] > 0.7 * (xcorr[1] - xcorr[2]) {
        -1
    } else {
        0
    };

    t0 = (2 * t as isize + offset).max(minperiod0 as isize) as usize;
    t0 = t0.clamp(PITCH_MIN_PERIOD, PITCH_MAX_PERIOD);

    (t0, pg.min(g).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celt_lpc_zero_input_is_zero() {
        let mut lpc = [0.0; 4];
        let ac = [0.0; 5];
        celt_lpc(&mut lpc, &ac);
        assert_eq!(lpc, [0.0; 4]);
    }

    #[test]
    fn fir5_preserves_dc_gain_scale() {
        let mut buf = [1.0f32; 32];
        let num = [0.0f32; 5];
        let mut mem = [0.0f32; 5];
        fir5_in_place(&mut buf, &num, &mut mem);
        // With all-zero filter taps, fir5 is the identity.
        assert!(buf.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn pitch_gain_is_bounded() {
        assert!(compute_pitch_gain(1.0, 1.0, 1.0) <= 1.0);
        assert!(compute_pitch_gain(0.0, 1.0, 1.0) == 0.0);
    }

    #[test]
    fn recovers_pitch_period_of_a_sine_wave() {
        let freq = 440.0f32;
        let sample_rate = 48_000.0f32;
        let mut buf = [0.0f32; PITCH_BUF_SIZE];
        for (i, s) in buf.iter_mut().enumerate() {
            *s = (i as f32 * freq * 2.0 * std::f32::consts::PI / sample_rate).sin() * 8000.0;
        }

        let mut half = [0.0f32; PITCH_BUF_SIZE / 2];
        pitch_downsample(&buf, &mut half);

        let coarse = pitch_search(
            &half[(PITCH_MAX_PERIOD / 2)..],
            &half,
            PITCH_FRAME_SIZE,
            PITCH_MAX_PERIOD - 3 * PITCH_MIN_PERIOD,
        );
        let t0_init = PITCH_MAX_PERIOD - coarse;

        let (period, gain) = remove_doubling(
            &half,
            PITCH_MAX_PERIOD,
            PITCH_MIN_PERIOD,
            PITCH_FRAME_SIZE,
            t0_init,
            0,
            0.0,
        );

        // 440 Hz at 48 kHz has a period of about 109.09 samples.
        let expected = sample_rate / freq;
        assert!(
            (period as f32 - expected).abs() < 5.0,
            "expected period near {}, got {} (gain {})",
            expected,
            period,
            gain
        );
    }
}
