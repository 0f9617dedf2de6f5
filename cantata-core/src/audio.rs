// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module provides primitives for working with multi-channel audio buffers.

use std::fmt;

use bitflags::bitflags;

use crate::units::Duration;

bitflags! {
    /// A bitmask of the channels present in an audio stream.
    ///
    /// The bit order matches the canonical speaker position ordering: when samples are
    /// interleaved, channels appear in ascending bit order.
    #[derive(Default)]
    pub struct Channels: u32 {
        /// Front-left (left) or the mono channel.
        const FRONT_LEFT   = 0x0000_0001;
        /// Front-right (right) channel.
        const FRONT_RIGHT  = 0x0000_0002;
        /// Front-centre (centre) channel.
        const FRONT_CENTRE = 0x0000_0004;
        /// Low frequency channel 1.
        const LFE1         = 0x0000_0008;
        /// Rear-left (surround rear left) channel.
        const REAR_LEFT    = 0x0000_0010;
        /// Rear-right (surround rear right) channel.
        const REAR_RIGHT   = 0x0000_0020;
        /// Side-left (surround left) channel.
        const SIDE_LEFT    = 0x0000_0040;
        /// Side-right (surround right) channel.
        const SIDE_RIGHT   = 0x0000_0080;
        /// Rear-centre (surround rear centre) channel.
        const REAR_CENTRE  = 0x0000_0100;
    }
}

impl Channels {
    /// Gets the number of channels.
    pub fn count(&self) -> usize {
        self.bits.count_ones() as usize
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#032b}", self.bits)
    }
}

/// `SignalSpec` describes the characteristics of a digital audio signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SignalSpec {
    /// The signal sampling rate in hertz (Hz).
    pub rate: u32,
    /// The channel assignments of the signal. The order of the channels in the mask is the order
    /// in which each channel's samples are interleaved.
    pub channels: Channels,
}

impl SignalSpec {
    pub fn new(rate: u32, channels: Channels) -> Self {
        SignalSpec { rate, channels }
    }
}

/// `AudioBuffer` is a planar buffer of single-precision floating-point audio samples.
///
/// The buffer is allocated once for a maximum capacity of frames and never reallocates. A decoder
/// renders a variable number of frames into the buffer per packet, up-to the capacity.
pub struct AudioBuffer {
    buf: Vec<f32>,
    spec: SignalSpec,
    n_frames: usize,
    n_capacity: usize,
}

impl AudioBuffer {
    /// Instantiate a new `AudioBuffer` using the specified signal specification and of the given
    /// duration.
    pub fn new(duration: Duration, spec: SignalSpec) -> Self {
        // The number of channels * duration cannot exceed the maximum buffer size.
        let n_capacity = duration as usize;

        // Allocate sample buffer and default initialize all samples to silence.
        let buf = vec![0.0; n_capacity * spec.channels.count()];

        AudioBuffer { buf, spec, n_frames: 0, n_capacity }
    }

    /// Gets the signal specification for the buffer.
    pub fn spec(&self) -> &SignalSpec {
        &self.spec
    }

    /// Gets the total capacity of the buffer in frames.
    pub fn capacity(&self) -> usize {
        self.n_capacity
    }

    /// Gets the number of frames currently rendered in the buffer.
    pub fn frames(&self) -> usize {
        self.n_frames
    }

    /// Gets an immutable reference to all the audio samples of the channel at index `ch`.
    pub fn chan(&self, ch: usize) -> &[f32] {
        let start = ch * self.n_capacity;
        &self.buf[start..start + self.n_frames]
    }

    /// Gets a mutable reference to all the audio samples of the channel at index `ch`.
    pub fn chan_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.n_capacity;
        &mut self.buf[start..start + self.n_frames]
    }

    /// Renders `n_frames` of silence, or the remaining capacity if `None`, such that the rendered
    /// frames may be overwritten by channel.
    pub fn render_reserved(&mut self, n_frames: Option<usize>) {
        let n_reserved_frames = n_frames.unwrap_or(self.n_capacity - self.n_frames);

        // Do not render past the end of the audio buffer.
        assert!(self.n_frames + n_reserved_frames <= self.n_capacity, "capacity will be exceeded");

        self.n_frames += n_reserved_frames;
    }

    /// Clears all rendered frames.
    pub fn clear(&mut self) {
        self.n_frames = 0;
    }

    /// Trims samples from the start and end of the buffer.
    pub fn trim(&mut self, start: usize, end: usize) {
        // First, trim the end to reduce the number of frames any front trim must copy.
        self.truncate(self.n_frames.saturating_sub(end));

        if start < self.n_frames {
            self.shift(start);
        }
        else {
            self.clear();
        }
    }

    /// Truncates the buffer to the number of frames specified. If the number of frames in the
    /// buffer is less-than the number of frames specified, then this function does nothing.
    pub fn truncate(&mut self, n_frames: usize) {
        if n_frames < self.n_frames {
            self.n_frames = n_frames;
        }
    }

    /// Shifts the contents of the buffer back by the number of frames specified. The leading
    /// frames are dropped from the buffer.
    fn shift(&mut self, shift: usize) {
        debug_assert!(shift <= self.n_frames);

        for ch in 0..self.spec.channels.count() {
            // The range of the samples remaining in the channel's plane after the shift.
            let start = ch * self.n_capacity + shift;
            let end = ch * self.n_capacity + self.n_frames;

            self.buf.copy_within(start..end, ch * self.n_capacity);
        }

        self.n_frames -= shift;
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioBuffer, Channels, SignalSpec};

    fn make_buffer() -> AudioBuffer {
        let spec = SignalSpec::new(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        AudioBuffer::new(16, spec)
    }

    #[test]
    fn verify_audio_buffer_render() {
        let mut buf = make_buffer();
        assert_eq!(buf.frames(), 0);

        buf.render_reserved(Some(8));
        assert_eq!(buf.frames(), 8);

        for (i, s) in buf.chan_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }

        assert_eq!(buf.chan(0)[7], 7.0);
        assert_eq!(buf.chan(1).len(), 8);
    }

    #[test]
    fn verify_audio_buffer_trim() {
        let mut buf = make_buffer();
        buf.render_reserved(Some(10));

        for (i, s) in buf.chan_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }

        buf.trim(2, 3);

        assert_eq!(buf.frames(), 5);
        assert_eq!(buf.chan(0), &[2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
