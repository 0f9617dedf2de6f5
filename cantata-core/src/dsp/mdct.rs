// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mdct` module implements the Modified Discrete Cosine Transform (MDCT).
//!
//! Rather than evaluating the transform directly, the N-point inverse MDCT is computed with an
//! N/2-point complex forward FFT bracketed by twiddle-factor rotations, giving O(N log N) cost.

use std::sync::Arc;

use rustfft::num_complex::Complex;

/// The Inverse Modified Discrete Cosine Transform (IMDCT).
///
/// An instance is specific to one transform length and owns all the scratch memory and
/// pre-computed rotation factors it needs, so repeated transforms allocate nothing.
pub struct Imdct {
    fft: Arc<dyn rustfft::Fft<f32>>,
    fft_scratch: Box<[Complex<f32>]>,
    scratch: Box<[Complex<f32>]>,
    twiddle: Box<[Complex<f32>]>,
}

impl Imdct {
    /// Instantiate an IMDCT taking `n` spectral samples, with unity scaling. `n` must be a
    /// power-of-two.
    pub fn new(n: usize) -> Self {
        Imdct::new_scaled(n, 1.0)
    }

    /// Instantiate an IMDCT taking `n` spectral samples, scaling every output sample by
    /// `scale`. `n` must be a power-of-two.
    pub fn new_scaled(n: usize, scale: f64) -> Self {
        assert!(n.is_power_of_two(), "n must be a power of two");

        let n2 = n / 2;

        // The scale factor is baked into the twiddles. Since a twiddle touches each sample once
        // before and once after the FFT, each twiddle carries the square root of it.
        let alpha = 1.0 / 8.0 + if scale.is_sign_positive() { 0.0 } else { n2 as f64 };
        let pi_n = std::f64::consts::PI / n as f64;
        let magnitude = scale.abs().sqrt();

        let twiddle: Vec<Complex<f32>> = (0..n2)
            .map(|k| {
                let theta = pi_n * (alpha + k as f64);
                Complex::new(
                    (magnitude * theta.cos()) as f32,
                    (magnitude * theta.sin()) as f32,
                )
            })
            .collect();

        // The transform runs over a half-length complex FFT.
        let fft = rustfft::FftPlanner::<f32>::new().plan_fft_forward(n2);

        let fft_scratch =
            vec![Default::default(); fft.get_inplace_scratch_len()].into_boxed_slice();

        let scratch = vec![Default::default(); n2].into_boxed_slice();

        Imdct { fft, fft_scratch, scratch, twiddle: twiddle.into_boxed_slice() }
    }

    /// Perform the inverse MDCT, expanding the `n` spectral samples in `spec` into `2n` time
    /// domain samples in `out`. Both slices must have exactly those lengths.
    pub fn imdct(&mut self, spec: &[f32], out: &mut [f32]) {
        // The spectral length n, in terms of the FFT length.
        let n = self.fft.len() << 1;
        let n2 = n >> 1;
        let n4 = n >> 2;

        assert_eq!(spec.len(), n);
        assert_eq!(out.len(), 2 * n);

        // Fold pairs of spectral samples, taken from opposite ends of the spectrum, into
        // twiddle-rotated complex values.
        for (i, (&w, t)) in self.twiddle.iter().zip(self.scratch.iter_mut()).enumerate() {
            let even = spec[2 * i];
            let odd = -spec[n - 1 - 2 * i];

            *t = Complex::new(odd * w.im - even * w.re, odd * w.re + even * w.im);
        }

        self.fft.process_with_scratch(&mut self.scratch, &mut self.fft_scratch);

        // View the 2n output samples as four n/2-sample quarters. Each rotated FFT sample
        // contributes one value to the second and one to the third quarter, and the first and
        // fourth quarters are reflections of those.
        let (q0, rest) = out.split_at_mut(n2);
        let (q1, rest) = rest.split_at_mut(n2);
        let (q2, q3) = rest.split_at_mut(n2);

        // The first half of the FFT output lands at even offsets of the second quarter and, in
        // mirror order, at odd offsets of the third.
        for (i, (x, &w)) in self.scratch[..n4].iter().zip(&self.twiddle[..n4]).enumerate() {
            let val = w * x.conj();

            q1[2 * i] = val.im;
            q2[n2 - 1 - 2 * i] = val.re;
        }

        // The second half fills the remaining offsets of both quarters from their far ends.
        for (i, (x, &w)) in self.scratch[n4..].iter().zip(&self.twiddle[n4..]).enumerate() {
            let val = w * x.conj();

            q1[n2 - 1 - 2 * i] = val.re;
            q2[2 * i] = val.im;
        }

        // Complete the block: the first quarter is the negated mirror of the second, and the
        // fourth quarter is the mirror of the third.
        for i in 0..n2 {
            q0[i] = -q1[n2 - 1 - i];
            q3[i] = q2[n2 - 1 - i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Imdct;

    /// Direct evaluation of the IMDCT from its definition. O(n^2), test use only.
    fn imdct_direct(spec: &[f32], out: &mut [f32], scale: f64) {
        let n = spec.len();
        let step = std::f64::consts::PI / (2.0 * (2 * n) as f64);

        for (i, out) in out.iter_mut().enumerate() {
            let mut sum = 0.0f64;

            for (j, &s) in spec.iter().enumerate() {
                let angle = step * ((2 * i + 1 + n) * (2 * j + 1)) as f64;
                sum += f64::from(s) * angle.cos();
            }

            *out = (scale * sum) as f32;
        }
    }

    #[test]
    fn verify_imdct_against_direct() {
        const N: usize = 64;

        // An arbitrary spectrum with energy in every bin.
        let mut spec = [0.0f32; N];

        for (j, s) in spec.iter_mut().enumerate() {
            *s = (j as f32 * 0.37).sin() + 0.25 * (j as f32 * 1.7).cos();
        }

        let scale = (2.0f64 / (2 * N) as f64).sqrt();

        let mut expected = [0.0f32; 2 * N];
        imdct_direct(&spec, &mut expected, scale);

        let mut actual = [0.0f32; 2 * N];
        let mut imdct = Imdct::new_scaled(N, scale);
        imdct.imdct(&spec, &mut actual);

        for (a, e) in actual.iter().zip(&expected) {
            assert!((f64::from(*a) - f64::from(*e)).abs() < 1e-5);
        }
    }
}
