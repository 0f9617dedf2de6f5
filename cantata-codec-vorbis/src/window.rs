// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts;

/// The active extent of one half of a window.
#[derive(Copy, Clone, Debug, Default)]
pub struct WindowHalf {
    /// The index of the first sample of the lap region.
    pub start: usize,
    /// The index just past the final sample of the lap region.
    pub end: usize,
}

/// A `Window` is the set of coefficients, and the extents of the lapped regions, used to shape
/// one block before overlap-add.
///
/// Samples before `left.start` and after `right.end` fall outside the window and are implicitly
/// zero. Samples between `left.end` and `right.start` are implicitly unity and not shaped.
pub struct Window {
    pub left: WindowHalf,
    pub right: WindowHalf,
    pub window: Vec<f32>,
}

impl Window {
    fn new(block_size: usize, left_lap: usize, right_lap: usize) -> Self {
        let left = WindowHalf {
            start: (block_size / 4) - (left_lap / 2),
            end: (block_size / 4) + (left_lap / 2),
        };

        let right = WindowHalf {
            start: (3 * block_size / 4) - (right_lap / 2),
            end: (3 * block_size / 4) + (right_lap / 2),
        };

        let mut window = vec![0.0; block_size];

        // The rising slope of the lapped region on the left.
        let left_slope = generate_win_slope(left_lap);
        window[left.start..left.end].copy_from_slice(&left_slope);

        // The unity region between the laps.
        for w in window[left.end..right.start].iter_mut() {
            *w = 1.0;
        }

        // The falling slope of the lapped region on the right is the mirror of the rising slope.
        let right_slope = generate_win_slope(right_lap);

        for (w, &s) in window[right.start..right.end].iter_mut().zip(right_slope.iter().rev()) {
            *w = s;
        }

        Window { left, right, window }
    }
}

/// Generates the rising slope of the Vorbis window, sin(π/2 · sin²(π/2 · x)), sampled at the
/// centre of each of `len` steps (section 4.3.1 of the Vorbis I specification).
fn generate_win_slope(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let x = (i as f64 + 0.5) / len as f64;

            let inner = (consts::FRAC_PI_2 * x).sin();

            (consts::FRAC_PI_2 * inner * inner).sin() as f32
        })
        .collect()
}

/// The set of windows used by a stream.
pub struct Windows {
    /// The window for short blocks. Short blocks always lap fully on both sides.
    pub short: Window,
    /// The windows for long blocks, indexed by whether the previous and next blocks are long.
    pub long: [[Window; 2]; 2],
}

impl Windows {
    pub fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let half0 = blocksize0 / 2;
        let half1 = blocksize1 / 2;

        let short = Window::new(blocksize0, half0, half0);

        // A long block laps by half the short block size against a short neighbour, and by half
        // the long block size against a long neighbour.
        let long = [
            [
                Window::new(blocksize1, half0, half0),
                Window::new(blocksize1, half0, half1),
            ],
            [
                Window::new(blocksize1, half1, half0),
                Window::new(blocksize1, half1, half1),
            ],
        ];

        Windows { short, long }
    }
}

#[cfg(test)]
mod tests {
    use super::{generate_win_slope, Windows};

    #[test]
    fn verify_win_slope() {
        let slope = generate_win_slope(128);

        // The slope must rise monotonically from silence to unity.
        assert!(slope[0] > 0.0 && slope[0] < 1e-3);
        assert!(slope[127] > 0.9999);

        for pair in slope.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn verify_window_extents() {
        let windows = Windows::new(256, 2048);

        // A short block laps over its entire halves.
        assert_eq!(windows.short.left.start, 0);
        assert_eq!(windows.short.left.end, 128);
        assert_eq!(windows.short.right.start, 128);
        assert_eq!(windows.short.right.end, 256);

        // A long block between two short blocks laps only a short block's worth at its centres.
        let win = &windows.long[0][0];

        assert_eq!(win.left.start, 512 - 64);
        assert_eq!(win.left.end, 512 + 64);
        assert_eq!(win.right.start, 1536 - 64);
        assert_eq!(win.right.end, 1536 + 64);

        // A long block between two long blocks laps fully.
        let win = &windows.long[1][1];

        assert_eq!(win.left.start, 0);
        assert_eq!(win.left.end, 1024);
        assert_eq!(win.right.start, 1024);
        assert_eq!(win.right.end, 2048);

    }

    #[test]
    fn verify_win_slope_complementary() {
        // The lapped power sum of a rising slope and the mirrored falling slope must be unity
        // (the Princen-Bradley condition).
        let slope = generate_win_slope(1024);

        for i in 0..1024 {
            let rise = slope[i];
            let fall = slope[1024 - 1 - i];
            let sum = rise * rise + fall * fall;
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
