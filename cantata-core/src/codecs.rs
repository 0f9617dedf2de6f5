// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `codecs` module provides the traits and support structures necessary to implement audio
//! codec decoders.

use std::fmt;

use crate::audio::{AudioBuffer, Channels};
use crate::errors::Result;
use crate::formats::Packet;
use crate::units::TimeBase;

/// A `CodecType` is a unique identifier used to identify a specific codec.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodecType(u32);

/// Null codec ID.
pub const CODEC_TYPE_NULL: CodecType = CodecType(0x0);

/// Vorbis audio codec.
pub const CODEC_TYPE_VORBIS: CodecType = CodecType(0x1000);
/// Free Lossless Audio Codec (FLAC).
pub const CODEC_TYPE_FLAC: CodecType = CodecType(0x1001);
/// Opus audio codec.
pub const CODEC_TYPE_OPUS: CodecType = CodecType(0x1002);
/// Speex audio codec.
pub const CODEC_TYPE_SPEEX: CodecType = CodecType(0x1003);
/// Theora video codec.
pub const CODEC_TYPE_THEORA: CodecType = CodecType(0x1004);
/// OGG Skeleton metadata bitstream. Not an actual codec, but identifiable as a logical stream.
pub const CODEC_TYPE_OGG_SKELETON: CodecType = CodecType(0x1005);

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Codec parameters stored in a container format's headers and metadata may be passed to a codec
/// using the `CodecParameters` structure.
#[derive(Clone, Debug)]
pub struct CodecParameters {
    /// The codec type.
    pub codec: CodecType,

    /// The sample rate of the audio in Hz.
    pub sample_rate: Option<u32>,

    /// The `TimeBase`.
    pub time_base: Option<TimeBase>,

    /// The length of the stream in number of frames.
    ///
    /// If a timebase is available, this field can be used to calculate the total duration of the
    /// stream in seconds by using `TimeBase::calc_time` and passing the number of frames as the
    /// timestamp.
    pub n_frames: Option<u64>,

    /// The timestamp of the first frame.
    pub start_ts: u64,

    /// A bitmask of all channels in the stream.
    pub channels: Option<Channels>,

    /// The maximum bitrate of the stream in bits per second.
    pub max_bitrate: Option<u32>,

    /// The nominal bitrate of the stream in bits per second.
    pub nominal_bitrate: Option<u32>,

    /// The minimum bitrate of the stream in bits per second.
    pub min_bitrate: Option<u32>,

    /// The demuxer guarantees packet data integrity.
    pub packet_data_integrity: bool,

    /// Extra data (defined by the codec).
    pub extra_data: Option<Box<[u8]>>,
}

impl CodecParameters {
    pub fn new() -> CodecParameters {
        CodecParameters {
            codec: CODEC_TYPE_NULL,
            sample_rate: None,
            time_base: None,
            n_frames: None,
            start_ts: 0,
            channels: None,
            max_bitrate: None,
            nominal_bitrate: None,
            min_bitrate: None,
            packet_data_integrity: false,
            extra_data: None,
        }
    }

    /// Provide the `CodecType`.
    pub fn for_codec(&mut self, codec: CodecType) -> &mut Self {
        self.codec = codec;
        self
    }

    /// Provide the sample rate in Hz.
    pub fn with_sample_rate(&mut self, sample_rate: u32) -> &mut Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Provide the `TimeBase`.
    pub fn with_time_base(&mut self, time_base: TimeBase) -> &mut Self {
        self.time_base = Some(time_base);
        self
    }

    /// Provide the total number of frames.
    pub fn with_n_frames(&mut self, n_frames: u64) -> &mut Self {
        self.n_frames = Some(n_frames);
        self
    }

    /// Provide the timestamp of the first frame.
    pub fn with_start_ts(&mut self, start_ts: u64) -> &mut Self {
        self.start_ts = start_ts;
        self
    }

    /// Provide the channel map.
    pub fn with_channels(&mut self, channels: Channels) -> &mut Self {
        self.channels = Some(channels);
        self
    }

    /// Provide the maximum bitrate.
    pub fn with_max_bitrate(&mut self, bitrate: u32) -> &mut Self {
        self.max_bitrate = Some(bitrate);
        self
    }

    /// Provide the nominal bitrate.
    pub fn with_nominal_bitrate(&mut self, bitrate: u32) -> &mut Self {
        self.nominal_bitrate = Some(bitrate);
        self
    }

    /// Provide the minimum bitrate.
    pub fn with_min_bitrate(&mut self, bitrate: u32) -> &mut Self {
        self.min_bitrate = Some(bitrate);
        self
    }

    /// Specify if the packet's data integrity was guaranteed.
    pub fn with_packet_data_integrity(&mut self, integrity: bool) -> &mut Self {
        self.packet_data_integrity = integrity;
        self
    }

    /// Provide codec extra data.
    pub fn with_extra_data(&mut self, data: Box<[u8]>) -> &mut Self {
        self.extra_data = Some(data);
        self
    }
}

impl Default for CodecParameters {
    fn default() -> Self {
        CodecParameters::new()
    }
}

/// `DecoderOptions` is a common set of options that all decoders use.
#[derive(Copy, Clone, Debug, Default)]
pub struct DecoderOptions {
    /// The decoder should verify the decoded audio, if supported.
    pub verify: bool,
}

/// `FinalizeResult` contains optional information that can only be found, calculated, or
/// determined after decoding is complete.
#[derive(Copy, Clone, Debug, Default)]
pub struct FinalizeResult {
    /// If verification is enabled and supported by the decoder, provides the verification result
    /// if available.
    pub verify_ok: Option<bool>,
}

/// A `Decoder` implements a codec's decode algorithm. It consumes `Packet`s and produces buffers
/// of decoded audio.
pub trait Decoder: Send + Sync {
    /// Attempts to instantiate the `Decoder` with the provided `CodecParameters`.
    fn try_new(params: &CodecParameters, options: &DecoderOptions) -> Result<Self>
    where
        Self: Sized;

    /// Reset the `Decoder`.
    ///
    /// A decoder must be reset when the next packet is discontinuous with respect to the last
    /// decoded packet. Most notably, this occurs after a seek.
    fn reset(&mut self);

    /// Gets a reference to an updated set of `CodecParameters` based on the parameters the
    /// `Decoder` was instantiated with.
    fn codec_params(&self) -> &CodecParameters;

    /// Decodes a `Packet` of audio data and returns a reference to the decoded audio buffer.
    ///
    /// If a `DecodeError` or `IoError` is returned, the packet is undecodeable and should be
    /// discarded. Decoding may be continued with the next packet.
    fn decode(&mut self, packet: &Packet) -> Result<&AudioBuffer>;

    /// Optionally, obtain post-decode information such as the verification status.
    fn finalize(&mut self) -> FinalizeResult;

    /// Allows read access to the internal audio buffer.
    fn last_decoded(&self) -> &AudioBuffer;
}
