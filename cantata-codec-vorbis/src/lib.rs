// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A Vorbis I decoder for Cantata.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use cantata_core::audio::{AudioBuffer, SignalSpec};
use cantata_core::codecs::{CodecParameters, CODEC_TYPE_VORBIS};
use cantata_core::codecs::{Decoder, DecoderOptions, FinalizeResult};
use cantata_core::dsp::mdct::Imdct;
use cantata_core::errors::{decode_error, unsupported_error, Result};
use cantata_core::formats::Packet;
use cantata_core::io::{BitReaderRtl, BufReader, FiniteBitStream, ReadBitsRtl, ReadBytes};

use cantata_utils_xiph::vorbis::*;

use log::debug;

mod codebook;
mod common;
mod dsp;
mod floor;
mod residue;
mod window;

use codebook::VorbisCodebook;
use common::*;
use dsp::*;
use floor::*;
use residue::*;
use window::Windows;

/// Vorbis decoder.
pub struct VorbisDecoder {
    /// Codec parameters.
    params: CodecParameters,
    /// Identification header.
    ident: IdentHeader,
    /// Codebooks (max. 256).
    codebooks: Vec<VorbisCodebook>,
    /// Floors (max. 64).
    floors: Vec<Box<dyn Floor>>,
    /// Residues (max. 64).
    residues: Vec<Residue>,
    /// Modes (max. 64).
    modes: Vec<Mode>,
    /// Mappings (max. 64).
    mappings: Vec<Mapping>,
    /// DSP.
    dsp: Dsp,
    /// Output buffer.
    buf: AudioBuffer,
}

/// Undo one channel coupling step (section 4.3.5 of the Vorbis I specification). The encoded
/// pair carries a magnitude and an angle; which of the two reconstructed values is larger, and
/// their signs, follow from the quadrant.
#[inline(always)]
fn inverse_couple(m: f32, a: f32) -> (f32, f32) {
    if m > 0.0 {
        if a > 0.0 {
            (m, m - a)
        }
        else {
            (m + a, m)
        }
    }
    else if a > 0.0 {
        (m, m + a)
    }
    else {
        (m - a, m)
    }
}

impl VorbisDecoder {
    fn decode_inner(&mut self, packet: &Packet) -> Result<()> {
        let mut bs = BitReaderRtl::new(packet.buf());

        // Packet type and mode (section 4.3.1). Audio packets lead with a 0 bit, and name the
        // mode that selects the block size and mapping.
        if bs.read_bool()? {
            return decode_error("vorbis: not an audio packet");
        }

        let mode_bits = ilog(self.modes.len() as u32 - 1);
        let mode_number = bs.read_bits_leq32(mode_bits)? as usize;

        let mode = match self.modes.get(mode_number) {
            Some(mode) => mode,
            None => return decode_error("vorbis: invalid packet mode number"),
        };

        let mapping = &self.mappings[usize::from(mode.mapping)];

        // Long blocks additionally state whether their neighbours are long, which fixes the lap
        // lengths of the window.
        let (bs_exp, imdct, win) = if mode.block_flag {
            let prev_window_flag = bs.read_bool()?;
            let next_window_flag = bs.read_bool()?;

            // Once a block has actually been decoded, the overlap geometry is dictated by its
            // real size, so prefer it over the transmitted flag. Both agree on a conformant
            // stream.
            let prev_long = match &self.dsp.lapping_state {
                Some(lap_state) => lap_state.prev_block_size == (1 << self.ident.bs1_exp),
                None => prev_window_flag,
            };

            let win =
                &self.dsp.windows.long[usize::from(prev_long)][usize::from(next_window_flag)];

            (self.ident.bs1_exp, &mut self.dsp.imdct_long, win)
        }
        else {
            (self.ident.bs0_exp, &mut self.dsp.imdct_short, &self.dsp.windows.short)
        };

        let n = 1 << bs_exp;
        let n2 = n >> 1;

        // Floor curves (section 4.3.2). Every channel decodes the floor of its submap. A floor
        // descriptor is shared between the channels that use it, so the curve must be
        // synthesized into the channel's own buffer before the next channel overwrites the
        // decoded state.
        for (ch, &submap_idx) in mapping.channel_submap.iter().enumerate() {
            let submap = &mapping.submaps[usize::from(submap_idx)];

            let floor = &mut self.floors[usize::from(submap.floor)];

            floor.read_channel(&mut bs, &self.codebooks)?;

            let channel = &mut self.dsp.channels[ch];

            channel.do_not_decode = floor.is_unused();

            if channel.do_not_decode {
                // Unused channels keep a silent floor.
                channel.floor[..n2].fill(0.0);
            }
            else {
                floor.synthesis(bs_exp, &mut channel.floor)?;
            }
        }

        // Non-zero vector propagate (section 4.3.3). A coupled pair is decoded whenever either
        // of its halves is in use.
        for couple in mapping.couplings.iter() {
            let m_ch = usize::from(couple.magnitude_ch);
            let a_ch = usize::from(couple.angle_ch);

            if self.dsp.channels[m_ch].do_not_decode != self.dsp.channels[a_ch].do_not_decode {
                self.dsp.channels[m_ch].do_not_decode = false;
                self.dsp.channels[a_ch].do_not_decode = false;
            }
        }

        // Residues (section 4.3.4), decoded per submap over the set of channels assigned to it.
        for (submap_idx, submap) in mapping.submaps.iter().enumerate() {
            let mut residue_channels: BitSet256 = Default::default();

            for (ch, &ch_submap_idx) in mapping.channel_submap.iter().enumerate() {
                if submap_idx == usize::from(ch_submap_idx) {
                    residue_channels.set(ch)
                }
            }

            self.residues[usize::from(submap.residue)].read_residue(
                &mut bs,
                bs_exp,
                &self.codebooks,
                &residue_channels,
                &mut self.dsp.channels,
            )?;
        }

        // Inverse coupling (section 4.3.5), applied to the coupling steps in reverse order of
        // declaration... which, for the square-polar coupling of mapping type 0, reduces to
        // applying each step to its channel pair.
        for couple in mapping.couplings.iter() {
            let m_ch = usize::from(couple.magnitude_ch);
            let a_ch = usize::from(couple.angle_ch);

            debug_assert!(m_ch != a_ch);

            // Split the channel list around the higher index to borrow both channels at once.
            let (head, tail) = self.dsp.channels.split_at_mut(m_ch.max(a_ch));

            let (magnitude, angle) = if m_ch < a_ch {
                (&mut head[m_ch], &mut tail[0])
            }
            else {
                (&mut tail[0], &mut head[a_ch])
            };

            for (m, a) in magnitude.residue[..n2].iter_mut().zip(&mut angle.residue[..n2]) {
                let (m_out, a_out) = inverse_couple(*m, *a);

                *m = m_out;
                *a = a_out;
            }
        }

        // Dot product (section 4.3.6): the spectrum of each channel is its residue shaped by
        // its floor curve. The product is accumulated into the floor buffer, which doubles as
        // the spectrum input of the IMDCT.
        for channel in self.dsp.channels.iter_mut() {
            if channel.do_not_decode {
                continue;
            }

            for (f, r) in channel.floor[..n2].iter_mut().zip(&channel.residue[..n2]) {
                *f *= *r;
            }
        }

        // Synthesis (sections 4.3.7 and 4.3.8): IMDCT, windowing, and overlap-add with the
        // previous block. The very first block emits nothing since it has no predecessor to lap
        // with.
        self.buf.clear();

        if let Some(lap_state) = &self.dsp.lapping_state {
            let render_len = (lap_state.prev_block_size + n) / 4;
            self.buf.render_reserved(Some(render_len));
        }

        for (ch, channel) in self.dsp.channels.iter_mut().enumerate() {
            channel.synth(
                n,
                &self.dsp.lapping_state,
                win,
                imdct,
                self.buf.chan_mut(map_vorbis_channel(self.ident.n_channels, ch)),
            );
        }

        // Honor any edge trims requested by the container (gapless edges, final granule).
        self.buf.trim(packet.trim_start() as usize, packet.trim_end() as usize);

        self.dsp.lapping_state =
            Some(LappingState { prev_block_size: n, prev_win_right: win.right });

        Ok(())
    }
}

impl Decoder for VorbisDecoder {
    fn try_new(params: &CodecParameters, _: &DecoderOptions) -> Result<Self> {
        if params.codec != CODEC_TYPE_VORBIS {
            return unsupported_error("vorbis: invalid codec type");
        }

        // The identification and setup header packets arrive concatenated in the extra data.
        let extra_data = match params.extra_data.as_ref() {
            Some(extra_data) => extra_data,
            None => return unsupported_error("vorbis: missing extra data"),
        };

        let mut reader = BufReader::new(extra_data);

        let ident = read_ident_header(&mut reader)?;
        let setup = read_setup(&mut reader, &ident)?;

        let channels = match vorbis_channels_to_channels(ident.n_channels) {
            Some(channels) => channels,
            None => return unsupported_error("vorbis: unsupported channel count"),
        };

        // All DSP state is sized off the header's two block sizes and never reallocates.
        let windows = Windows::new(1 << ident.bs0_exp, 1 << ident.bs1_exp);

        let imdct_short = Imdct::new((1 << ident.bs0_exp) >> 1);
        let imdct_long = Imdct::new((1 << ident.bs1_exp) >> 1);

        let dsp_channels =
            (0..ident.n_channels).map(|_| DspChannel::new(ident.bs1_exp)).collect();

        let dsp =
            Dsp { windows, channels: dsp_channels, imdct_short, imdct_long, lapping_state: None };

        // A packet emits at most half a long block of frames.
        let max_frames = 1u64 << (ident.bs1_exp - 1);

        let buf = AudioBuffer::new(max_frames, SignalSpec::new(ident.sample_rate, channels));

        Ok(VorbisDecoder {
            params: params.clone(),
            ident,
            codebooks: setup.codebooks,
            floors: setup.floors,
            residues: setup.residues,
            modes: setup.modes,
            mappings: setup.mappings,
            dsp,
            buf,
        })
    }

    fn reset(&mut self) {
        self.dsp.reset();
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    fn decode(&mut self, packet: &Packet) -> Result<&AudioBuffer> {
        if let Err(e) = self.decode_inner(packet) {
            self.buf.clear();
            Err(e)
        }
        else {
            Ok(&self.buf)
        }
    }

    fn finalize(&mut self) -> FinalizeResult {
        Default::default()
    }

    fn last_decoded(&self) -> &AudioBuffer {
        &self.buf
    }
}

#[derive(Debug)]
pub struct IdentHeader {
    pub n_channels: u8,
    pub sample_rate: u32,
    pub bs0_exp: u8,
    pub bs1_exp: u8,
}

fn read_ident_header<B: ReadBytes>(reader: &mut B) -> Result<IdentHeader> {
    // The packet must announce itself as an identification header.
    if reader.read_u8()? != VORBIS_PACKET_TYPE_IDENTIFICATION {
        return decode_error("vorbis: invalid packet type for identification header");
    }

    let mut sig = [0; 6];
    reader.read_buf_exact(&mut sig)?;

    if sig != *VORBIS_HEADER_PACKET_SIGNATURE {
        return decode_error("vorbis: invalid header signature");
    }

    // Only Vorbis I (version 0) exists.
    if reader.read_u32()? != VORBIS_VERSION {
        return unsupported_error("vorbis: only vorbis 1 is supported");
    }

    let n_channels = reader.read_u8()?;

    if n_channels == 0 {
        return decode_error("vorbis: number of channels cannot be 0");
    }

    // The bitstream allows up-to 255 channels, but only the 8 channel orders named by the
    // channel map are supported here.
    if n_channels > 8 {
        return unsupported_error("vorbis: only a maximum of 8 channels are supported");
    }

    let sample_rate = reader.read_u32()?;

    if sample_rate == 0 {
        return decode_error("vorbis: sample rate cannot be 0");
    }

    // The three bitrate hints are of no consequence to decoding.
    reader.ignore_bytes(3 * 4)?;

    // The two block size exponents share a byte, blocksize_0 in the low nibble. Each must lie
    // within [64, 8192], and blocksize_0 may not exceed blocksize_1.
    let block_sizes = reader.read_u8()?;

    let bs0_exp = block_sizes & 0x0f;
    let bs1_exp = block_sizes >> 4;

    for &bs_exp in &[bs0_exp, bs1_exp] {
        if bs_exp < VORBIS_BLOCKSIZE_MIN || bs_exp > VORBIS_BLOCKSIZE_MAX {
            return decode_error("vorbis: block size out-of-bounds");
        }
    }

    if bs0_exp > bs1_exp {
        return decode_error("vorbis: blocksize_0 exceeds blocksize_1");
    }

    // The header closes with a set framing bit.
    if reader.read_u8()? & 0x1 != 0x1 {
        return decode_error("vorbis: ident header framing flag unset");
    }

    Ok(IdentHeader { n_channels, sample_rate, bs0_exp, bs1_exp })
}

struct Setup {
    codebooks: Vec<VorbisCodebook>,
    floors: Vec<Box<dyn Floor>>,
    residues: Vec<Residue>,
    mappings: Vec<Mapping>,
    modes: Vec<Mode>,
}

fn read_setup(reader: &mut BufReader<'_>, ident: &IdentHeader) -> Result<Setup> {
    // The packet must announce itself as a setup header.
    if reader.read_u8()? != VORBIS_PACKET_TYPE_SETUP {
        return decode_error("vorbis: invalid packet type for setup header");
    }

    let mut sig = [0; 6];
    reader.read_buf_exact(&mut sig)?;

    if sig != *VORBIS_HEADER_PACKET_SIGNATURE {
        return decode_error("vorbis: invalid setup header signature");
    }

    // Everything after the signature is bit-packed.
    let mut bs = BitReaderRtl::new(reader.read_buf_bytes_available_ref());

    // Codebooks, 8-bit count.
    let n_codebooks = bs.read_bits_leq32(8)? as usize + 1;

    let codebooks = (0..n_codebooks)
        .map(|_| VorbisCodebook::read(&mut bs))
        .collect::<Result<Vec<_>>>()?;

    let max_codebook = codebooks.len() as u8;

    // The time-domain transform section is vestigial: a 6-bit count of 16-bit placeholders,
    // all of which must be 0.
    for _ in 0..bs.read_bits_leq32(6)? + 1 {
        if bs.read_bits_leq32(16)? != 0 {
            return decode_error("vorbis: invalid time domain transform");
        }
    }

    // Floors, 6-bit count, each prefixed by a 16-bit type.
    let n_floors = bs.read_bits_leq32(6)? as usize + 1;

    let floors = (0..n_floors)
        .map(|_| match bs.read_bits_leq32(16)? {
            0 => Floor0::try_read(&mut bs, ident.bs0_exp, ident.bs1_exp, max_codebook),
            1 => Floor1::try_read(&mut bs, max_codebook),
            _ => decode_error("vorbis: invalid floor type"),
        })
        .collect::<Result<Vec<_>>>()?;

    // Residues, 6-bit count, each prefixed by a 16-bit format.
    let n_residues = bs.read_bits_leq32(6)? as usize + 1;

    let residues = (0..n_residues)
        .map(|_| match bs.read_bits_leq32(16)? as u16 {
            format @ 0..=2 => Residue::try_read(&mut bs, format, max_codebook),
            _ => decode_error("vorbis: invalid residue type"),
        })
        .collect::<Result<Vec<_>>>()?;

    // Mappings, 6-bit count. Only mapping type 0 exists in Vorbis I.
    let n_mappings = bs.read_bits_leq32(6)? as usize + 1;

    let mappings = (0..n_mappings)
        .map(|_| match bs.read_bits_leq32(16)? {
            0 => read_mapping_type0(
                &mut bs,
                ident.n_channels,
                floors.len() as u8,
                residues.len() as u8,
            ),
            _ => decode_error("vorbis: invalid mapping type"),
        })
        .collect::<Result<Vec<_>>>()?;

    // Modes, 6-bit count.
    let n_modes = bs.read_bits_leq32(6)? as usize + 1;

    let modes = (0..n_modes)
        .map(|_| read_mode(&mut bs, mappings.len() as u8))
        .collect::<Result<Vec<_>>>()?;

    // The header closes with a set framing bit.
    if !bs.read_bool()? {
        return decode_error("vorbis: setup header framing flag unset");
    }

    if bs.bits_left() > 0 {
        debug!("vorbis: leftover bits in setup head extra data");
    }

    Ok(Setup { codebooks, floors, residues, mappings, modes })
}

#[derive(Debug)]
struct CouplingStep {
    magnitude_ch: u8,
    angle_ch: u8,
}

#[derive(Debug)]
struct SubMap {
    floor: u8,
    residue: u8,
}

#[derive(Debug)]
struct Mapping {
    couplings: Vec<CouplingStep>,
    /// The submap index assigned to each channel.
    channel_submap: Vec<u8>,
    submaps: Vec<SubMap>,
}

fn read_mapping_type0(
    bs: &mut BitReaderRtl<'_>,
    n_channels: u8,
    max_floor: u8,
    max_residue: u8,
) -> Result<Mapping> {
    let num_submaps = if bs.read_bool()? { bs.read_bits_leq32(4)? as u8 + 1 } else { 1 };

    // Channel coupling steps, if any. A step names a magnitude and an angle channel, which must
    // be distinct valid channels.
    let mut couplings = Vec::new();

    if bs.read_bool()? {
        let coupling_steps = bs.read_bits_leq32(8)? as usize + 1;
        let coupling_bits = ilog(u32::from(n_channels) - 1);

        couplings.reserve_exact(coupling_steps);

        for _ in 0..coupling_steps {
            let magnitude_ch = bs.read_bits_leq32(coupling_bits)? as u8;
            let angle_ch = bs.read_bits_leq32(coupling_bits)? as u8;

            if magnitude_ch == angle_ch || magnitude_ch >= n_channels || angle_ch >= n_channels
            {
                return decode_error("vorbis: invalid channel coupling");
            }

            couplings.push(CouplingStep { magnitude_ch, angle_ch });
        }
    }

    if bs.read_bits_leq32(2)? != 0 {
        return decode_error("vorbis: reserved mapping bits non-zero");
    }

    // With more than one submap, each channel states which submap it belongs to. Otherwise all
    // channels share submap 0.
    let mut channel_submap = vec![0u8; usize::from(n_channels)];

    if num_submaps > 1 {
        for submap_idx in channel_submap.iter_mut() {
            *submap_idx = bs.read_bits_leq32(4)? as u8;

            if *submap_idx >= num_submaps {
                return decode_error("vorbis: invalid channel multiplex");
            }
        }
    }

    // Each submap names the floor and residue it decodes with, after an unused legacy byte.
    let mut submaps = Vec::with_capacity(usize::from(num_submaps));

    for _ in 0..num_submaps {
        let _ = bs.read_bits_leq32(8)?;

        let floor = bs.read_bits_leq32(8)? as u8;

        if floor >= max_floor {
            return decode_error("vorbis: invalid floor for mapping");
        }

        let residue = bs.read_bits_leq32(8)? as u8;

        if residue >= max_residue {
            return decode_error("vorbis: invalid residue for mapping");
        }

        submaps.push(SubMap { floor, residue });
    }

    Ok(Mapping { couplings, channel_submap, submaps })
}

#[derive(Debug)]
struct Mode {
    block_flag: bool,
    mapping: u8,
}

fn read_mode(bs: &mut BitReaderRtl<'_>, max_mapping: u8) -> Result<Mode> {
    let block_flag = bs.read_bool()?;

    // Window type and transform type are 16-bit fields reserved at 0 in Vorbis I (section
    // 4.2.4).
    if bs.read_bits_leq32(16)? != 0 {
        return decode_error("vorbis: invalid window type for mode");
    }

    if bs.read_bits_leq32(16)? != 0 {
        return decode_error("vorbis: invalid transform type for mode");
    }

    let mapping = bs.read_bits_leq32(8)? as u8;

    if mapping >= max_mapping {
        return decode_error("vorbis: invalid mode mapping");
    }

    Ok(Mode { block_flag, mapping })
}
