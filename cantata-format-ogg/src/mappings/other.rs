// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity-only mappers for sibling Xiph codecs.
//!
//! These mappers do not decode anything. They exist so that a stream encapsulating a recognized
//! but unsupported codec carries its identity on its track, allowing a caller looking for a
//! Vorbis bitstream to report exactly what it found instead.

use super::{MapResult, Mapper, PacketParser};

use cantata_core::codecs::CodecParameters;
use cantata_core::codecs::{
    CODEC_TYPE_FLAC, CODEC_TYPE_OGG_SKELETON, CODEC_TYPE_OPUS, CODEC_TYPE_SPEEX,
    CODEC_TYPE_THEORA,
};
use cantata_core::errors::Result;

/// The signature of an OGG encapsulated Opus identification packet.
const OGG_OPUS_SIGNATURE: &[u8] = b"OpusHead";

/// The signature of an OGG encapsulated FLAC identification packet, excluding the leading 0x7f
/// packet type.
const OGG_FLAC_SIGNATURE: &[u8] = b"FLAC";

/// The signature of an OGG encapsulated Speex identification packet.
const OGG_SPEEX_SIGNATURE: &[u8] = b"Speex   ";

/// The signature of an OGG encapsulated Theora identification packet, excluding the leading 0x80
/// packet type.
const OGG_THEORA_SIGNATURE: &[u8] = b"theora";

/// The signature of an OGG Skeleton fishead packet.
const OGG_SKELETON_SIGNATURE: &[u8] = b"fishead\0";

pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    let identity = if buf.starts_with(OGG_OPUS_SIGNATURE) {
        Some((CODEC_TYPE_OPUS, "opus"))
    }
    else if buf.first() == Some(&0x7f) && buf[1..].starts_with(OGG_FLAC_SIGNATURE) {
        Some((CODEC_TYPE_FLAC, "flac"))
    }
    else if buf.starts_with(OGG_SPEEX_SIGNATURE) {
        Some((CODEC_TYPE_SPEEX, "speex"))
    }
    else if buf.first() == Some(&0x80) && buf[1..].starts_with(OGG_THEORA_SIGNATURE) {
        Some((CODEC_TYPE_THEORA, "theora"))
    }
    else if buf.starts_with(OGG_SKELETON_SIGNATURE) {
        Some((CODEC_TYPE_OGG_SKELETON, "skeleton"))
    }
    else {
        None
    };

    let mapper = identity.map(|(codec, name)| {
        let mut codec_params = CodecParameters::new();
        codec_params.for_codec(codec);

        Box::new(IdentityMapper { codec_params, name }) as Box<dyn Mapper>
    });

    Ok(mapper)
}

struct IdentityMapper {
    codec_params: CodecParameters,
    name: &'static str,
}

impl Mapper for IdentityMapper {
    fn name(&self) -> &'static str {
        self.name
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.codec_params
    }

    fn codec_params_mut(&mut self) -> &mut CodecParameters {
        &mut self.codec_params
    }

    fn make_parser(&self) -> Option<Box<dyn PacketParser>> {
        None
    }

    fn map_packet(&mut self, _: &[u8]) -> Result<MapResult> {
        Ok(MapResult::Unknown)
    }
}
