// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use cantata_core::dsp::mdct::Imdct;

use super::window::{Window, WindowHalf, Windows};

/// State retained between packets for overlap-add.
pub struct LappingState {
    /// The size of the previous block.
    pub prev_block_size: usize,
    /// The right window half applied to the previous block.
    pub prev_win_right: WindowHalf,
}

pub struct Dsp {
    /// DSP channels (max. 256 per-spec, but limited to the number of supported output channels).
    pub channels: Vec<DspChannel>,
    /// IMDCT for short-blocks.
    pub imdct_short: Imdct,
    /// IMDCT for long-blocks.
    pub imdct_long: Imdct,
    /// Windows for overlap-add.
    pub windows: Windows,
    /// Lapping state.
    pub lapping_state: Option<LappingState>,
}

impl Dsp {
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }

        self.lapping_state = None;
    }
}

pub struct DspChannel {
    /// The channel floor buffer.
    pub floor: Vec<f32>,
    /// The channel residue buffer.
    pub residue: Vec<f32>,
    /// Do not decode!
    pub do_not_decode: bool,
    /// The IMDCT output of the current block, and, between packets, the windowed samples that
    /// must be lapped with the next block.
    overlap: Vec<f32>,
}

impl DspChannel {
    pub fn new(bs1_exp: u8) -> Self {
        DspChannel {
            floor: vec![0.0; (1 << bs1_exp) >> 1],
            residue: vec![0.0; (1 << bs1_exp) >> 1],
            overlap: vec![0.0; 1 << bs1_exp],
            do_not_decode: false,
        }
    }

    /// Synthesize the final audio samples for this channel: perform the inverse MDCT over the
    /// spectral coefficients in the floor buffer, apply the window, and overlap-add against the
    /// previous block, writing the completed region into `buf`.
    pub fn synth(
        &mut self,
        blk_size: usize,
        lap_state: &Option<LappingState>,
        win: &Window,
        imdct: &mut Imdct,
        buf: &mut [f32],
    ) {
        let buf_len = buf.len();

        // Step 1
        //
        // Copy the right-hand side of the previous block (already windowed) out of the overlap
        // buffer and into the output buffer. The region past the end of the previous window is
        // implicitly zero and is ignored.
        let overlap_end = if let Some(lap_state) = lap_state {
            let prev_rhs_start = lap_state.prev_block_size >> 1;
            let prev_rhs_end = min(lap_state.prev_win_right.end, self.overlap.len());

            let rhs = &self.overlap[prev_rhs_start..prev_rhs_end];

            let copy_len = min(rhs.len(), buf_len);
            buf[..copy_len].copy_from_slice(&rhs[..copy_len]);

            // Samples after this are not overlapped.
            copy_len
        }
        else {
            0
        };

        // Step 2
        //
        // Perform the inverse MDCT on the audio spectrum, overwriting the overlap buffer.
        imdct.imdct(&self.floor[..blk_size >> 1], &mut self.overlap[..blk_size]);

        // Step 3
        //
        // Apply windowing to the samples produced by the IMDCT. Only the samples within the
        // lapped regions of the window need to be shaped, samples between the laps are unity.
        let l_start = win.left.start;
        let l_end = win.left.end;

        for (s, &w) in self.overlap[l_start..l_end].iter_mut().zip(&win.window[l_start..l_end]) {
            *s *= w;
        }

        let r_start = win.right.start;
        let r_end = win.right.end;

        for (s, &w) in self.overlap[r_start..r_end].iter_mut().zip(&win.window[r_start..r_end]) {
            *s *= w;
        }

        // Step 4
        //
        // Overlap-add the windowed left-hand side of the current block with the right-hand side
        // of the previous block, and copy out the remainder of the completed region. The region
        // before the left lap is implicitly zero and is ignored.
        if lap_state.is_some() {
            let mut lhs = &self.overlap[l_start..blk_size >> 1];

            // A malformed stream may produce mismatched window extents. Clamp the left-hand side
            // to the output buffer.
            let overlap_start = if lhs.len() > buf_len {
                lhs = &lhs[lhs.len() - buf_len..];
                0
            }
            else {
                buf_len - lhs.len()
            };

            let overlap_end = overlap_end.clamp(overlap_start, buf_len);

            // The left-hand side overlaps the right-hand side of the previous block in this
            // region. The output buffer contains the previous block's samples, so add the
            // left-hand side samples.
            for (o, &s) in buf[overlap_start..overlap_end].iter_mut().zip(lhs) {
                *o += s;
            }

            // The previous block has ended, so simply copy the left-hand side samples to the
            // output.
            for (o, &s) in buf[overlap_end..].iter_mut().zip(&lhs[overlap_end - overlap_start..]) {
                *o = s;
            }
        }
    }

    pub fn reset(&mut self) {
        // Clear the overlap buffer. Nothing else is used across packets.
        self.overlap.fill(0.0);
        self.do_not_decode = false;
    }
}

#[cfg(test)]
mod tests {
    use cantata_core::dsp::mdct::Imdct;

    use super::super::window::Windows;
    use super::{DspChannel, LappingState};

    #[test]
    fn verify_synth_overlap_add() {
        // Two consecutive equal-sized blocks. The emitted region must equal the windowed tail
        // of the first block summed with the windowed head of the second block.
        const N: usize = 128;

        let windows = Windows::new(N, N);
        let win = &windows.short;

        let mut spectrum0 = [0.0f32; N / 2];
        let mut spectrum1 = [0.0f32; N / 2];

        for i in 0..N / 2 {
            spectrum0[i] = (i as f32 * 0.13).sin();
            spectrum1[i] = (i as f32 * 0.07).cos();
        }

        // Compute the raw IMDCT output of both blocks independently.
        let mut raw0 = [0.0f32; N];
        let mut raw1 = [0.0f32; N];

        let mut imdct = Imdct::new(N / 2);
        imdct.imdct(&spectrum0, &mut raw0);
        imdct.imdct(&spectrum1, &mut raw1);

        // Run both blocks through the channel synthesis.
        let mut channel = DspChannel::new(7);
        let mut imdct = Imdct::new(N / 2);

        // The first block emits nothing.
        channel.floor[..N / 2].copy_from_slice(&spectrum0);
        channel.synth(N, &None, win, &mut imdct, &mut []);

        let lap_state =
            Some(LappingState { prev_block_size: N, prev_win_right: win.right });

        let mut out = [0.0f32; N / 2];

        channel.floor[..N / 2].copy_from_slice(&spectrum1);
        channel.synth(N, &lap_state, win, &mut imdct, &mut out);

        // The emitted region overlaps the right half of block 0 with the left half of block 1.
        for i in 0..N / 2 {
            let expected =
                raw0[N / 2 + i] * win.window[N / 2 + i] + raw1[i] * win.window[i];

            assert!((out[i] - expected).abs() < 1e-4);
        }
    }
}
