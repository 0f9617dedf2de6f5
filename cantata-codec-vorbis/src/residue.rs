// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cantata_core::errors::{decode_error, Error, Result};
use cantata_core::io::{BitReaderRtl, ReadBitsRtl};

use super::codebook::VorbisCodebook;
use super::common::BitSet256;
use super::dsp::DspChannel;

#[derive(Debug, Default)]
struct ResidueClass {
    /// Bitmap of the passes in which this classification encodes vectors.
    cascade: u8,
    /// The codebook used in each encoded pass.
    books: [u8; 8],
}

impl ResidueClass {
    #[inline(always)]
    fn uses_pass(&self, pass: usize) -> bool {
        debug_assert!(pass < 8);
        self.cascade & (1 << pass) != 0
    }
}

#[derive(Debug)]
struct ResidueSetup {
    /// The residue format (0, 1, or 2).
    format: u16,
    /// First offset of the encoded range of the residue vector.
    begin: u32,
    /// One past the last offset of the encoded range.
    end: u32,
    /// Size of one partition of the encoded range.
    partition_size: u32,
    /// Number of classifications a partition can take (up-to 64).
    classifications: u8,
    /// The codebook that encodes partition classifications.
    classbook: u8,
    /// Per-classification cascade and codebooks.
    classes: Vec<ResidueClass>,
    /// The highest pass any classification encodes in.
    max_pass: usize,
}

pub struct Residue {
    setup: ResidueSetup,
    /// Scratch: one classification per partition (per channel for formats 0 and 1).
    part_classes: Vec<u8>,
    /// Scratch: the single interleaved vector decoded by format 2.
    interleave_buf: Vec<f32>,
}

impl Residue {
    pub fn try_read(bs: &mut BitReaderRtl<'_>, format: u16, max_codebook: u8) -> Result<Self> {
        let setup = Self::read_setup(bs, format, max_codebook)?;

        Ok(Residue {
            setup,
            part_classes: Default::default(),
            interleave_buf: Default::default(),
        })
    }

    fn read_setup(
        bs: &mut BitReaderRtl<'_>,
        format: u16,
        max_codebook: u8,
    ) -> Result<ResidueSetup> {
        let begin = bs.read_bits_leq32(24)?;
        let end = bs.read_bits_leq32(24)?;
        let partition_size = bs.read_bits_leq32(24)? + 1;
        let num_classes = bs.read_bits_leq32(6)? as u8 + 1;
        let classbook = bs.read_bits_leq32(8)? as u8;

        if end < begin {
            return decode_error("vorbis: invalid residue begin and end");
        }

        if classbook >= max_codebook {
            return decode_error("vorbis: invalid residue classification codebook");
        }

        // The cascade bitmaps of every classification precede all of the codebook numbers.
        let mut classes = Vec::with_capacity(usize::from(num_classes));

        for _ in 0..num_classes {
            let low = bs.read_bits_leq32(3)? as u8;
            let high = if bs.read_bool()? { bs.read_bits_leq32(5)? as u8 } else { 0 };

            classes.push(ResidueClass { cascade: (high << 3) | low, books: [0; 8] });
        }

        // A codebook number follows for each set bit of each cascade, in classification order.
        let mut max_pass = 0;

        for class in classes.iter_mut() {
            for pass in 0..class.books.len() {
                if !class.uses_pass(pass) {
                    continue;
                }

                let book = bs.read_bits_leq32(8)? as u8;

                // Book 0 is reserved for classifications and may not encode vectors.
                if book == 0 || book >= max_codebook {
                    return decode_error("vorbis: invalid codebook for residue");
                }

                class.books[pass] = book;
                max_pass = max_pass.max(pass);
            }
        }

        Ok(ResidueSetup {
            format,
            begin,
            end,
            partition_size,
            classifications: num_classes,
            classbook,
            classes,
            max_pass,
        })
    }

    pub fn read_residue(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        bs_exp: u8,
        codebooks: &[VorbisCodebook],
        residue_channels: &BitSet256,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        let result = self.decode_packet(bs, bs_exp, codebooks, residue_channels, channels);

        // Running out of bits mid-residue is the encoder's way of ending a packet early. The
        // vectors decoded so far stand, and the remainder stays zero.
        if let Err(e) = result {
            match e {
                Error::IoError(ref io_err) if io_err.kind() == io::ErrorKind::Other => (),
                _ => return Err(e),
            }
        }

        // Format 2 decoded everything into one interleaved vector which must now be fanned back
        // out to the channels. Channels marked do-not-decode carry an all-zero floor, so writing
        // them is harmless.
        if self.setup.format == 2 {
            self.deinterleave(residue_channels, channels);
        }

        Ok(())
    }

    fn deinterleave(&self, residue_channels: &BitSet256, channels: &mut [DspChannel]) {
        let stride = residue_channels.count();

        if stride == 2 {
            // The common stereo arrangement.
            let (ch0, ch1) = {
                let mut iter = residue_channels.iter();
                let first = iter.next().unwrap();
                let second = iter.next().unwrap();

                let (head, tail) = channels.split_at_mut(second);
                (&mut head[first], &mut tail[0])
            };

            for (i, frame) in self.interleave_buf.chunks_exact(2).enumerate() {
                ch0.residue[i] = frame[0];
                ch1.residue[i] = frame[1];
            }
        }
        else {
            for (lane, ch) in residue_channels.iter().enumerate() {
                let residue = &mut channels[ch].residue;

                for (i, frame) in self.interleave_buf.chunks_exact(stride).enumerate() {
                    residue[i] = frame[lane];
                }
            }
        }
    }

    fn decode_packet(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        bs_exp: u8,
        codebooks: &[VorbisCodebook],
        residue_channels: &BitSet256,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        let classbook = &codebooks[usize::from(self.setup.classbook)];
        let classifications = u32::from(self.setup.classifications);

        let is_fmt2 = self.setup.format == 2;

        // The residue vector spans half a block per channel. Format 2 fuses the vectors of all
        // participating channels into one long interleaved vector.
        let n2 = (1usize << bs_exp) >> 1;
        let full_len = if is_fmt2 { n2 * residue_channels.count() } else { n2 };

        // The encoded range, clamped to the vector length.
        let begin = (self.setup.begin as usize).min(full_len);
        let end = (self.setup.end as usize).min(full_len);

        let part_size = self.setup.partition_size as usize;
        let n_partitions = (end - begin) / part_size;

        // A single classword covers this many partitions.
        let group_size = usize::from(classbook.dimensions());

        // Formats 0 and 1 classify each channel independently, format 2 classifies once.
        let n_lanes = if is_fmt2 { 1 } else { residue_channels.count() };

        if self.part_classes.len() < n_partitions * n_lanes {
            self.part_classes.resize(n_partitions * n_lanes, 0);
        }

        if is_fmt2 {
            if self.interleave_buf.len() < full_len {
                self.interleave_buf.resize(full_len, 0.0);
            }
            self.interleave_buf[..full_len].fill(0.0);
        }

        // Zero the participating channel vectors, and bail out if every channel of this submap
        // was flagged do-not-decode.
        let mut any_decode = false;

        for ch in residue_channels.iter() {
            if !is_fmt2 {
                channels[ch].residue[..full_len].fill(0.0);
            }

            any_decode |= !channels[ch].do_not_decode;
        }

        if !any_decode {
            return Ok(());
        }

        for pass in 0..=self.setup.max_pass {
            let mut partition = 0;

            while partition < n_partitions {
                // Classifications for the whole group are encoded once, on the first pass.
                if pass == 0 {
                    if is_fmt2 {
                        let word = classbook.read_scalar(bs)?;

                        decode_classes(
                            word,
                            group_size,
                            classifications,
                            &mut self.part_classes[partition..n_partitions],
                        );
                    }
                    else {
                        for (lane, ch) in residue_channels.iter().enumerate() {
                            if channels[ch].do_not_decode {
                                continue;
                            }

                            let word = classbook.read_scalar(bs)?;

                            decode_classes(
                                word,
                                group_size,
                                classifications,
                                &mut self.part_classes
                                    [lane * n_partitions + partition..(lane + 1) * n_partitions],
                            );
                        }
                    }
                }

                // Decode the vectors of every partition in the group.
                let group_end = n_partitions.min(partition + group_size);

                while partition < group_end {
                    for (lane, ch) in residue_channels.iter().enumerate() {
                        let class_idx = if is_fmt2 {
                            self.part_classes[partition]
                        }
                        else {
                            if channels[ch].do_not_decode {
                                continue;
                            }

                            self.part_classes[lane * n_partitions + partition]
                        };

                        let class = &self.setup.classes[usize::from(class_idx)];

                        if class.uses_pass(pass) {
                            let book = &codebooks[usize::from(class.books[pass])];

                            let start = begin + partition * part_size;

                            let out = if is_fmt2 {
                                &mut self.interleave_buf[start..start + part_size]
                            }
                            else {
                                &mut channels[ch].residue[start..start + part_size]
                            };

                            if self.setup.format == 0 {
                                read_partition_interleaved(bs, book, out)?;
                            }
                            else {
                                read_partition_sequential(bs, book, out)?;
                            }
                        }

                        // Format 2 runs a single lane.
                        if is_fmt2 {
                            break;
                        }
                    }

                    partition += 1;
                }
            }
        }

        Ok(())
    }
}

/// Expand a classword into the classifications of the partitions it covers.
fn decode_classes(mut word: u32, group_size: usize, classifications: u32, out: &mut [u8]) {
    let count = out.len().min(group_size);

    // The classword packs one classification per partition of the group, most-significant digit
    // first in base `classifications`. Digits covering partitions past the end of the
    // assignment region are dropped.
    for _ in count..group_size {
        word /= classifications;
    }

    for idx in (0..count).rev() {
        out[idx] = (word % classifications) as u8;
        word /= classifications;
    }
}

/// Decode the vectors of one partition in format 0 layout: scalar `j` of vector `i` lands at
/// offset `i + j * step`.
fn read_partition_interleaved(
    bs: &mut BitReaderRtl<'_>,
    codebook: &VorbisCodebook,
    out: &mut [f32],
) -> Result<()> {
    let step = out.len() / usize::from(codebook.dimensions());

    for i in 0..step {
        let vq = codebook.read_vq(bs)?;

        for (j, &v) in vq.iter().enumerate() {
            out[i + j * step] += v;
        }
    }

    Ok(())
}

/// Decode the vectors of one partition in format 1 (and 2) layout: vectors are laid end-to-end.
fn read_partition_sequential(
    bs: &mut BitReaderRtl<'_>,
    codebook: &VorbisCodebook,
    out: &mut [f32],
) -> Result<()> {
    let dims = usize::from(codebook.dimensions());

    for out in out.chunks_exact_mut(dims) {
        let vq = codebook.read_vq(bs)?;

        for (o, &v) in out.iter_mut().zip(vq) {
            *o += v;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::decode_classes;

    #[test]
    fn verify_decode_classes() {
        // A classword covering 4 partitions with 10 classifications. The scalar 1234 expands,
        // most-significant digit first, to [1, 2, 3, 4].
        let mut out = [0u8; 4];

        decode_classes(1234, 4, 10, &mut out);

        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn verify_decode_classes_excess() {
        // When fewer partitions remain than the classword covers, the trailing class
        // assignments are dropped and the remaining partitions take the leading assignments.
        let mut out = [0u8; 2];

        decode_classes(1234, 4, 10, &mut out);

        assert_eq!(out, [1, 2]);
    }
}
