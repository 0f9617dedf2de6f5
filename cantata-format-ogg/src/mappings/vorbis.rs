// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{MapResult, Mapper, PacketParser};
use crate::common::SideData;

use cantata_core::codecs::{CodecParameters, CODEC_TYPE_VORBIS};
use cantata_core::errors::{decode_error, Result};
use cantata_core::io::{BitReaderRtl, BufReader, ReadBitsRtl, ReadBytes};
use cantata_core::meta::MetadataBuilder;
use cantata_core::units::TimeBase;

use cantata_metadata::vorbis as vorbis_meta;
use cantata_utils_xiph::vorbis::*;

use log::warn;

/// The exact size of a Vorbis identification header packet.
const VORBIS_IDENT_PACKET_SIZE: usize = 30;

/// As defined in section 9.2.1 of the Vorbis I specification.
#[inline(always)]
fn ilog(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// As defined in section 9.2.3 of the Vorbis I specification.
#[inline(always)]
fn lookup1_values(entries: u32, dimensions: u16) -> u32 {
    (entries as f32).powf(1.0f32 / f32::from(dimensions)).floor() as u32
}

pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    // The identification header packet is exactly 30 bytes long.
    if buf.len() < VORBIS_IDENT_PACKET_SIZE {
        return Ok(None);
    }

    let mut reader = BufReader::new(buf);

    // The packet type must be the identification header.
    if reader.read_u8()? != VORBIS_PACKET_TYPE_IDENTIFICATION {
        return Ok(None);
    }

    // Next, the header packet signature must be correct.
    let mut sig = [0; 6];
    reader.read_buf_exact(&mut sig)?;

    if sig != *VORBIS_HEADER_PACKET_SIGNATURE {
        return Ok(None);
    }

    // Next, the Vorbis version must be 0.
    if reader.read_u32()? != VORBIS_VERSION {
        return Ok(None);
    }

    // The number of channels and sample rate must be non-zero.
    let n_channels = reader.read_u8()?;

    if n_channels == 0 {
        return Ok(None);
    }

    let sample_rate = reader.read_u32()?;

    if sample_rate == 0 {
        return Ok(None);
    }

    // The bitrate range. A bitrate of 0 indicates the field is unset.
    let bitrate_max = reader.read_u32()?;
    let bitrate_nom = reader.read_u32()?;
    let bitrate_min = reader.read_u32()?;

    // Blocksize_0 and blocksize_1 are packed into a single byte as power-of-2 exponents.
    let block_sizes = reader.read_u8()?;

    let bs0_exp = (block_sizes & 0x0f) >> 0;
    let bs1_exp = (block_sizes & 0xf0) >> 4;

    if bs0_exp < VORBIS_BLOCKSIZE_MIN || bs0_exp > VORBIS_BLOCKSIZE_MAX {
        return Ok(None);
    }

    if bs1_exp < VORBIS_BLOCKSIZE_MIN || bs1_exp > VORBIS_BLOCKSIZE_MAX || bs1_exp < bs0_exp {
        return Ok(None);
    }

    // The framing flag must be set.
    if reader.read_u8()? & 0x1 != 0x1 {
        return Ok(None);
    }

    // Populate the codec parameters with the information read from the identification header.
    let mut codec_params = CodecParameters::new();

    codec_params
        .for_codec(CODEC_TYPE_VORBIS)
        .with_sample_rate(sample_rate)
        .with_time_base(TimeBase::new(1, sample_rate));

    if let Some(channels) = vorbis_channels_to_channels(n_channels) {
        codec_params.with_channels(channels);
    }

    // The bitrate fields are signed. Negative or zero values mean the field is unset.
    if bitrate_max > 0 && bitrate_max <= i32::MAX as u32 {
        codec_params.with_max_bitrate(bitrate_max);
    }

    if bitrate_nom > 0 && bitrate_nom <= i32::MAX as u32 {
        codec_params.with_nominal_bitrate(bitrate_nom);
    }

    if bitrate_min > 0 && bitrate_min <= i32::MAX as u32 {
        codec_params.with_min_bitrate(bitrate_min);
    }

    // The identification header packet is retained as the start of the codec extra data. The
    // setup header packet will be appended to it when it arrives.
    let extra_data = buf[..VORBIS_IDENT_PACKET_SIZE].to_vec();

    let mapper = Box::new(VorbisMapper {
        codec_params,
        n_channels,
        bs0_exp,
        bs1_exp,
        extra_data,
        modes_block_flags: None,
    });

    Ok(Some(mapper))
}

struct VorbisMapper {
    codec_params: CodecParameters,
    n_channels: u8,
    bs0_exp: u8,
    bs1_exp: u8,
    /// The identification header packet, and, once read, the setup header packet.
    extra_data: Vec<u8>,
    /// Per-mode block flags recovered from the setup header. `Some` once setup is read.
    modes_block_flags: Option<Vec<bool>>,
}

impl Mapper for VorbisMapper {
    fn name(&self) -> &'static str {
        "vorbis"
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.codec_params
    }

    fn codec_params_mut(&mut self) -> &mut CodecParameters {
        &mut self.codec_params
    }

    fn make_parser(&self) -> Option<Box<dyn PacketParser>> {
        let modes_block_flags = self.modes_block_flags.as_ref()?;

        Some(Box::new(VorbisPacketParser {
            bs0_exp: self.bs0_exp,
            bs1_exp: self.bs1_exp,
            num_modes: modes_block_flags.len() as u32,
            modes_block_flags: modes_block_flags.clone(),
            prev_bs_exp: None,
        }))
    }

    fn is_ready(&self) -> bool {
        self.modes_block_flags.is_some()
    }

    fn map_packet(&mut self, packet: &[u8]) -> Result<MapResult> {
        // A packet that could lead with an audio packet type should not reach the mapper after
        // setup is complete.
        if packet.is_empty() || packet[0] & 1 == 0 {
            return Ok(MapResult::Unknown);
        }

        // All header packets carry the common signature after the packet type.
        if packet.len() < 7 || &packet[1..7] != VORBIS_HEADER_PACKET_SIGNATURE {
            warn!("ogg (vorbis): invalid header packet signature");
            return Ok(MapResult::Unknown);
        }

        match packet[0] {
            VORBIS_PACKET_TYPE_COMMENT => {
                let mut builder = MetadataBuilder::new();

                vorbis_meta::read_comment_no_framing(
                    &mut BufReader::new(&packet[7..]),
                    &mut builder,
                )?;

                Ok(MapResult::SideData { data: SideData::Metadata(builder.metadata()) })
            }
            VORBIS_PACKET_TYPE_SETUP => {
                // Recover the block flag of each mode from the setup header. The flags are
                // required to compute packet durations without decoding the audio.
                let modes_block_flags = read_setup_block_flags(packet, self.n_channels)?;

                // Append the setup packet to the extra data following the identification packet.
                self.extra_data.extend_from_slice(packet);

                self.codec_params.with_extra_data(self.extra_data.clone().into_boxed_slice());
                self.modes_block_flags = Some(modes_block_flags);

                Ok(MapResult::Setup)
            }
            _ => {
                warn!("ogg (vorbis): unexpected header packet type {}", packet[0]);
                Ok(MapResult::Unknown)
            }
        }
    }
}

struct VorbisPacketParser {
    bs0_exp: u8,
    bs1_exp: u8,
    num_modes: u32,
    modes_block_flags: Vec<bool>,
    prev_bs_exp: Option<u8>,
}

impl PacketParser for VorbisPacketParser {
    fn parse_next_packet_dur(&mut self, packet: &[u8]) -> u64 {
        let mut bs = BitReaderRtl::new(packet);

        // The packet must be an audio packet: the leading bit is 0.
        match bs.read_bool() {
            Ok(false) => (),
            _ => return 0,
        }

        // Read the mode number and look up the block flag of the mode.
        let mode_num = match bs.read_bits_leq32(ilog(self.num_modes - 1)) {
            Ok(mode_num) => mode_num as usize,
            _ => return 0,
        };

        let block_flag = match self.modes_block_flags.get(mode_num) {
            Some(&block_flag) => block_flag,
            _ => return 0,
        };

        let cur_bs_exp = if block_flag { self.bs1_exp } else { self.bs0_exp };

        // A packet yields the lapped region of the previous and current blocks. The duration of
        // the first packet cannot be known without its predecessor.
        let dur = match self.prev_bs_exp {
            Some(prev_bs_exp) => ((1u64 << prev_bs_exp) + (1u64 << cur_bs_exp)) >> 2,
            None => 0,
        };

        self.prev_bs_exp = Some(cur_bs_exp);

        dur
    }
}

/// Scans a setup header packet and extracts the block flag of each mode.
///
/// The scan parses the complete structure of the setup header so that the bit cursor traverses
/// the variably-sized codebook, floor, residue, and mapping sections correctly, but builds none
/// of them.
fn read_setup_block_flags(packet: &[u8], n_channels: u8) -> Result<Vec<bool>> {
    // The remainder of the setup header packet, after the packet type and signature, is read
    // bitwise.
    let mut bs = BitReaderRtl::new(&packet[7..]);

    skip_codebooks(&mut bs)?;
    skip_time_domain_transforms(&mut bs)?;
    skip_floors(&mut bs)?;
    skip_residues(&mut bs)?;
    skip_mappings(&mut bs, n_channels)?;

    let modes_block_flags = read_modes_block_flags(&mut bs)?;

    // The framing flag must be set.
    if !bs.read_bool()? {
        return decode_error("ogg (vorbis): setup header framing flag unset");
    }

    Ok(modes_block_flags)
}

fn skip_codebooks(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(8)? + 1;

    for _ in 0..count {
        // Verify the codebook synchronization word.
        if bs.read_bits_leq32(24)? != 0x564342 {
            return decode_error("ogg (vorbis): invalid codebook sync");
        }

        let dimensions = bs.read_bits_leq32(16)? as u16;
        let entries = bs.read_bits_leq32(24)?;

        if bs.read_bool()? {
            // Length-ordered codeword list.
            let mut cur_entry = 0;

            let _ = bs.read_bits_leq32(5)?;

            loop {
                let num_bits =
                    if entries > cur_entry { ilog(entries - cur_entry) } else { 0 };

                cur_entry += bs.read_bits_leq32(num_bits)?;

                if cur_entry > entries {
                    return decode_error("ogg (vorbis): invalid codebook");
                }

                if cur_entry == entries {
                    break;
                }
            }
        }
        else if bs.read_bool()? {
            // Sparsely packed codeword list.
            for _ in 0..entries {
                if bs.read_bool()? {
                    bs.ignore_bits(5)?;
                }
            }
        }
        else {
            // Densely packed codeword list.
            for _ in 0..entries {
                bs.ignore_bits(5)?;
            }
        }

        // Skip the vector quantization lookup table.
        let lookup_type = bs.read_bits_leq32(4)?;

        match lookup_type {
            0 => (),
            1 | 2 => {
                // Minimum value, delta value, value bits, and the sequence flag.
                bs.ignore_bits(32 + 32)?;
                let value_bits = bs.read_bits_leq32(4)? + 1;
                let _ = bs.read_bool()?;

                let lookup_values = match lookup_type {
                    1 => u64::from(lookup1_values(entries, dimensions)),
                    2 => u64::from(entries) * u64::from(dimensions),
                    _ => unreachable!(),
                };

                for _ in 0..lookup_values {
                    bs.ignore_bits(value_bits)?;
                }
            }
            _ => return decode_error("ogg (vorbis): invalid codeword lookup type"),
        }
    }

    Ok(())
}

fn skip_time_domain_transforms(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        // All these values are placeholders and must be 0.
        if bs.read_bits_leq32(16)? != 0 {
            return decode_error("ogg (vorbis): invalid time domain transform");
        }
    }

    Ok(())
}

fn skip_floors(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        match bs.read_bits_leq32(16)? {
            0 => {
                // Floor type 0: order, rate, bark map size, amplitude bits and offset.
                bs.ignore_bits(8 + 16 + 16 + 6 + 8)?;

                let num_books = bs.read_bits_leq32(4)? + 1;
                bs.ignore_bits(8 * num_books)?;
            }
            1 => {
                let partitions = bs.read_bits_leq32(5)? as usize;

                let mut partition_classes = Vec::with_capacity(partitions);

                for _ in 0..partitions {
                    partition_classes.push(bs.read_bits_leq32(4)? as u8);
                }

                let num_classes =
                    partition_classes.iter().max().map(|&max| max + 1).unwrap_or(0);

                let mut class_dims = vec![0u32; usize::from(num_classes)];

                for dim in class_dims.iter_mut() {
                    *dim = bs.read_bits_leq32(3)? + 1;

                    let subclass_bits = bs.read_bits_leq32(2)?;

                    if subclass_bits != 0 {
                        // Main codebook.
                        bs.ignore_bits(8)?;
                    }

                    // Sub-class codebooks.
                    bs.ignore_bits(8 * (1u32 << subclass_bits))?;
                }

                // Multiplier.
                bs.ignore_bits(2)?;

                let rangebits = bs.read_bits_leq32(4)?;

                for &class in partition_classes.iter() {
                    bs.ignore_bits(rangebits * class_dims[usize::from(class)])?;
                }
            }
            _ => return decode_error("ogg (vorbis): invalid floor type"),
        }
    }

    Ok(())
}

fn skip_residues(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        if bs.read_bits_leq32(16)? > 2 {
            return decode_error("ogg (vorbis): invalid residue type");
        }

        // Begin, end, and partition size.
        bs.ignore_bits(24 + 24 + 24)?;

        let classifications = bs.read_bits_leq32(6)? + 1;

        // Class codebook.
        bs.ignore_bits(8)?;

        let mut cascades = Vec::with_capacity(classifications as usize);

        for _ in 0..classifications {
            let low_bits = bs.read_bits_leq32(3)?;

            let high_bits = if bs.read_bool()? { bs.read_bits_leq32(5)? } else { 0 };

            cascades.push((high_bits << 3) | low_bits);
        }

        for cascade in cascades {
            bs.ignore_bits(8 * cascade.count_ones())?;
        }
    }

    Ok(())
}

fn skip_mappings(bs: &mut BitReaderRtl<'_>, n_channels: u8) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        // Only mapping type 0 exists in Vorbis 1.
        if bs.read_bits_leq32(16)? != 0 {
            return decode_error("ogg (vorbis): invalid mapping type");
        }

        let num_submaps = if bs.read_bool()? { bs.read_bits_leq32(4)? + 1 } else { 1 };

        if bs.read_bool()? {
            // Channel coupling steps.
            let coupling_steps = bs.read_bits_leq32(8)? + 1;
            let coupling_bits = ilog(u32::from(n_channels) - 1);

            bs.ignore_bits(2 * coupling_bits * coupling_steps)?;
        }

        if bs.read_bits_leq32(2)? != 0 {
            return decode_error("ogg (vorbis): reserved mapping bits non-zero");
        }

        if num_submaps > 1 {
            // Channel multiplex numbers.
            bs.ignore_bits(4 * u32::from(n_channels))?;
        }

        // Per-submap: an unused byte, the floor number, and the residue number.
        bs.ignore_bits(24 * num_submaps)?;
    }

    Ok(())
}

fn read_modes_block_flags(bs: &mut BitReaderRtl<'_>) -> Result<Vec<bool>> {
    let count = bs.read_bits_leq32(6)? + 1;

    let mut modes_block_flags = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let block_flag = bs.read_bool()?;

        // Only window type 0 and transform type 0 are allowed in Vorbis 1.
        if bs.read_bits_leq32(16)? != 0 || bs.read_bits_leq32(16)? != 0 {
            return decode_error("ogg (vorbis): invalid window or transform type for mode");
        }

        // The mapping number.
        bs.ignore_bits(8)?;

        modes_block_flags.push(block_flag);
    }

    Ok(modes_block_flags)
}

#[cfg(test)]
mod tests {
    use super::super::{MapResult, Mapper};
    use super::detect;

    /// Builds a well-formed Vorbis identification header packet.
    fn build_ident_packet(
        n_channels: u8,
        sample_rate: u32,
        bitrate_nom: u32,
        bs0_exp: u8,
        bs1_exp: u8,
    ) -> Vec<u8> {
        let mut packet = Vec::with_capacity(30);

        packet.push(1);
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.push(n_channels);
        packet.extend_from_slice(&sample_rate.to_le_bytes());
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.extend_from_slice(&bitrate_nom.to_le_bytes());
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.push((bs1_exp << 4) | bs0_exp);
        packet.push(0x1);

        packet
    }

    #[test]
    fn verify_detect_ident() {
        let packet = build_ident_packet(2, 44_100, 128_000, 8, 11);

        let mapper = detect(&packet).unwrap().expect("expected a mapper");

        assert_eq!(mapper.name(), "vorbis");
        assert!(!mapper.is_ready());

        let params = mapper.codec_params();

        assert_eq!(params.sample_rate, Some(44_100));
        assert_eq!(params.nominal_bitrate, Some(128_000));
        assert_eq!(params.max_bitrate, None);
        assert_eq!(params.channels.map(|ch| ch.count()), Some(2));
    }

    #[test]
    fn verify_detect_rejects_invalid_ident() {
        // Invalid block size exponents.
        assert!(detect(&build_ident_packet(2, 44_100, 0, 11, 8)).unwrap().is_none());
        assert!(detect(&build_ident_packet(2, 44_100, 0, 4, 8)).unwrap().is_none());

        // Zero channels and zero sample rate.
        assert!(detect(&build_ident_packet(0, 44_100, 0, 8, 11)).unwrap().is_none());
        assert!(detect(&build_ident_packet(2, 0, 0, 8, 11)).unwrap().is_none());

        // Bad signature.
        let mut packet = build_ident_packet(2, 44_100, 0, 8, 11);
        packet[1] = b'w';
        assert!(detect(&packet).unwrap().is_none());

        // Truncated.
        assert!(detect(&packet[..20]).unwrap().is_none());
    }

    #[test]
    fn verify_map_packet_rejects_junk_header(){
        let ident = build_ident_packet(1, 48_000, 0, 6, 6);

        let mut mapper = detect(&ident).unwrap().unwrap();

        // A header packet with an invalid signature maps to unknown.
        let junk = [0x03, b'w', b'o', b'r', b'b', b'i', b's', 0x00];

        assert!(matches!(mapper.map_packet(&junk).unwrap(), MapResult::Unknown));
        assert!(!mapper.is_ready());
    }
}
