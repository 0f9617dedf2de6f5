// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::common::SideData;

use cantata_core::codecs::CodecParameters;
use cantata_core::errors::Result;

mod other;
mod vorbis;

/// Detect a `Mapper` for a logical stream given its identification packet.
///
/// Codecs that are recognized but not supported are assigned a mapper that only carries their
/// identity so that a meaningful diagnostic can be raised downstream. A wholly unrecognized
/// stream is assigned the null mapper and ignored.
pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    let mapper = vorbis::detect(buf)?.or(other::detect(buf)?).or_else(make_null_mapper);

    Ok(mapper)
}

/// Result of mapping a packet.
pub enum MapResult {
    /// The packet was a setup packet and was consumed.
    Setup,
    /// The packet contains stream data.
    StreamData { dur: u64 },
    /// The packet contains side data.
    SideData { data: SideData },
    /// The packet could not be identified.
    Unknown,
}

/// A `PacketParser` computes the duration of packets in a codec bitstream out-of-band of the
/// full decode process.
///
/// Parsers are stateful: durations must be computed over packets in bitstream order. The duration
/// of the first packet observed by a fresh parser may be unknowable and reported as 0.
pub trait PacketParser: Send + Sync {
    fn parse_next_packet_dur(&mut self, packet: &[u8]) -> u64;
}

/// A `Mapper` implements packet-handling for a specific codec in an OGG stream.
pub trait Mapper: Send + Sync {
    /// Gets the name of the mapper.
    fn name(&self) -> &'static str;

    /// Gets an immutable reference to the codec parameters of the stream.
    fn codec_params(&self) -> &CodecParameters;

    /// Gets a mutable reference to the codec parameters of the stream.
    fn codec_params_mut(&mut self) -> &mut CodecParameters;

    /// Makes a new `PacketParser` for the stream, if supported.
    fn make_parser(&self) -> Option<Box<dyn PacketParser>>;

    /// Returns `true` if the stream has consumed all of its header packets and is ready to
    /// produce stream data.
    fn is_ready(&self) -> bool {
        true
    }

    /// Maps a packet of the stream.
    fn map_packet(&mut self, packet: &[u8]) -> Result<MapResult>;

    /// Resets the mapper after a discontinuity.
    fn reset(&mut self) {}
}

fn make_null_mapper() -> Option<Box<dyn Mapper>> {
    Some(Box::new(NullMapper { params: CodecParameters::new() }))
}

/// A mapper for streams encapsulating an unrecognized codec. All packets map to `Unknown`.
struct NullMapper {
    params: CodecParameters,
}

impl Mapper for NullMapper {
    fn name(&self) -> &'static str {
        "null"
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    fn codec_params_mut(&mut self) -> &mut CodecParameters {
        &mut self.params
    }

    fn make_parser(&self) -> Option<Box<dyn PacketParser>> {
        None
    }

    fn map_packet(&mut self, _: &[u8]) -> Result<MapResult> {
        Ok(MapResult::Unknown)
    }
}
