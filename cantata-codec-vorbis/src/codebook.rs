// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::errors::{decode_error, Result};
use cantata_core::io::{
    vlc::{BitOrder, Codebook, CodebookBuilder},
    ReadBitsRtl,
};

use super::common::ilog;

/// Decode a packed Vorbis float (section 9.2.2 of the Vorbis I specification): a sign bit, a
/// 10-bit biased exponent, and a 21-bit integer mantissa.
#[inline(always)]
fn float32_unpack(x: u32) -> f32 {
    let mantissa = (x & 0x1f_ffff) as f32;
    let exponent = ((x >> 21) & 0x3ff) as i32;

    let magnitude = mantissa * 2.0f32.powi(exponent - 788);

    if x & 0x8000_0000 == 0 {
        magnitude
    }
    else {
        -magnitude
    }
}

/// Compute the largest integer whose `dimensions`-th power does not exceed `entries` (section
/// 9.2.3 of the Vorbis I specification).
fn lookup1_values(entries: u32, dimensions: u16) -> u32 {
    if entries == 0 || dimensions == 0 {
        return 0;
    }

    let dims = u32::from(dimensions);

    // Start from the floating-point estimate of the dims-th root of entries, then nudge it
    // until it is exact. The estimate is off by at most one in either direction.
    let mut root = (entries as f32).powf(1.0 / dims as f32).floor() as u32;

    while root > 0 && root.checked_pow(dims).map_or(true, |pow| pow > entries) {
        root -= 1;
    }

    while (root + 1).checked_pow(dims).map_or(false, |pow| pow <= entries) {
        root += 1;
    }

    root
}

/// Expand the packed multiplicand list of a lookup type 1 or 2 codebook into the full table of
/// vector-quantization values (section 3.2.1 of the Vorbis I specification).
fn unpack_vq_table(
    multiplicands: &[u16],
    min_value: f32,
    delta_value: f32,
    sequence_p: bool,
    lookup_type: u32,
    lookup_values: u32,
    entries: u32,
    dimensions: u16,
) -> Vec<f32> {
    let dims = usize::from(dimensions);

    let mut table = vec![0.0; entries as usize * dims];

    for (entry, vector) in table.chunks_exact_mut(dims).enumerate() {
        // With the sequence flag set, each scalar accumulates onto the previous one.
        let mut last = 0.0;

        let mut divisor = 1;

        for (dim, value) in vector.iter_mut().enumerate() {
            let offset = match lookup_type {
                // Type 1 indexes the multiplicand list by the digits of the entry number,
                // expressed in base lookup_values, least-significant digit first.
                1 => ((entry as u32 / divisor) % lookup_values) as usize,
                // Type 2 stores one full vector of multiplicands per entry.
                _ => entry * dims + dim,
            };

            *value = f32::from(multiplicands[offset]) * delta_value + min_value + last;

            if sequence_p {
                last = *value;
            }

            divisor = divisor.saturating_mul(lookup_values);
        }
    }

    table
}

/// Assign a canonical Huffman codeword to every used entry of the given codeword length list.
///
/// Unused entries (length 0) are assigned a placeholder of 0. An over-subscribed code is
/// rejected. An under-subscribed code is also rejected, except for the single-entry codebook
/// which the Vorbis I specification (errata 20150226) requires to be accepted.
fn assign_codewords(code_lens: &[u8]) -> Result<Vec<u32>> {
    // Canonical assignment walks the implicit code tree left-to-right: `next_word[d]` is the
    // codeword that the next entry of length `d` would receive, i.e. the left-most node at
    // depth `d` that is neither claimed nor covered by a shorter claimed word. Claiming a word
    // consumes that node, which has two knock-on effects that must be propagated through the
    // column: the ancestors gain a completed subtree (an increment that may carry upwards), and
    // the descendants that dangled below the claimed node must be relocated onto the next
    // branch.
    let mut codewords = Vec::with_capacity(code_lens.len());

    let mut next_word = [0u32; 33];

    let mut used = 0usize;

    for &len in code_lens {
        debug_assert!(len <= 32);

        if len == 0 {
            codewords.push(0);
            continue;
        }

        used += 1;

        let depth = usize::from(len);
        let word = next_word[depth];

        // Once every node at this depth is spoken for, the next word overflows depth bits.
        if len < 32 && (word >> len) > 0 {
            return decode_error("vorbis: codebook overspecified");
        }

        // Propagate the claim upwards. A trailing 1 bit means this node completed a right
        // subtree, so the next free node at this depth hangs off the next free ancestor.
        // Otherwise the sibling to the right is free, at this and every shallower depth.
        let mut d = depth;

        loop {
            if next_word[d] & 1 == 1 {
                next_word[d] = next_word[d - 1] << 1;
                break;
            }

            next_word[d] += 1;

            if d == 0 {
                break;
            }

            d -= 1;
        }

        // Relocate the descendants: any deeper next-word that extends the claimed word must be
        // moved below the new next word of this depth instead.
        let branch = next_word[depth];

        for d in depth + 1..=32 {
            let shift = (d - depth) as u32;

            if next_word[d] == word << shift {
                next_word[d] = branch << shift;
            }
            else {
                break;
            }
        }

        codewords.push(word);
    }

    // When the code is complete, the next word at every depth has overflowed its bit width.
    let is_underspecified =
        (1..=32usize).any(|d| next_word[d] & (u32::MAX >> (32 - d)) != 0);

    if is_underspecified && used != 1 {
        return decode_error("vorbis: codebook underspecified");
    }

    Ok(codewords)
}

/// Read the codeword length list of a codebook that is not length-ordered. Sparse lists flag
/// each entry as used or unused, dense lists carry a length for every entry.
fn read_code_lens_unordered<B: ReadBitsRtl>(bs: &mut B, entries: u32) -> Result<Vec<u8>> {
    let is_sparse = bs.read_bool()?;

    let mut code_lens = Vec::with_capacity(entries as usize);

    for _ in 0..entries {
        let code_len = if !is_sparse || bs.read_bool()? {
            bs.read_bits_leq32(5)? as u8 + 1
        }
        else {
            // Unused entries of a sparse codebook have no codeword.
            0
        };

        code_lens.push(code_len);
    }

    Ok(code_lens)
}

/// Read the codeword length list of a length-ordered codebook: runs of entries per length,
/// starting from an initial length and incrementing.
fn read_code_lens_ordered<B: ReadBitsRtl>(bs: &mut B, entries: u32) -> Result<Vec<u8>> {
    let mut code_lens = Vec::with_capacity(entries as usize);

    let mut cur_len = bs.read_bits_leq32(5)? as u8 + 1;

    while (code_lens.len() as u32) < entries {
        // Runs of zero length are legal, but the codeword length may never exceed 32 bits.
        if cur_len > 32 {
            return decode_error("vorbis: invalid codebook");
        }

        let remaining = entries - code_lens.len() as u32;

        let run = bs.read_bits_leq32(ilog(remaining))?;

        if run > remaining {
            return decode_error("vorbis: invalid codebook");
        }

        code_lens.extend(std::iter::repeat(cur_len).take(run as usize));

        cur_len += 1;
    }

    Ok(code_lens)
}

/// Read and expand the vector-quantization lookup table of a codebook, if it carries one.
fn read_vq_table<B: ReadBitsRtl>(
    bs: &mut B,
    entries: u32,
    dimensions: u16,
) -> Result<Option<Vec<f32>>> {
    let lookup_type = bs.read_bits_leq32(4)?;

    match lookup_type {
        0 => Ok(None),
        1 | 2 => {
            let min_value = float32_unpack(bs.read_bits_leq32(32)?);
            let delta_value = float32_unpack(bs.read_bits_leq32(32)?);
            let value_bits = bs.read_bits_leq32(4)? + 1;
            let sequence_p = bs.read_bool()?;

            // Type 1 shares lookup1_values(..) multiplicands between entries, type 2 stores a
            // full set per entry.
            let lookup_values = match lookup_type {
                1 => lookup1_values(entries, dimensions),
                _ => entries * u32::from(dimensions),
            };

            let mut multiplicands = Vec::with_capacity(lookup_values as usize);

            for _ in 0..lookup_values {
                multiplicands.push(bs.read_bits_leq32(value_bits)? as u16);
            }

            Ok(Some(unpack_vq_table(
                &multiplicands,
                min_value,
                delta_value,
                sequence_p,
                lookup_type,
                lookup_values,
                entries,
                dimensions,
            )))
        }
        _ => decode_error("vorbis: invalid codeword lookup type"),
    }
}

pub struct VorbisCodebook {
    codebook: Codebook,
    dimensions: u16,
    vq_table: Option<Vec<f32>>,
}

impl VorbisCodebook {
    pub fn read<B: ReadBitsRtl>(bs: &mut B) -> Result<Self> {
        // A codebook opens with the 24-bit synchronization word "BCV".
        if bs.read_bits_leq32(24)? != 0x564342 {
            return decode_error("vorbis: invalid codebook sync");
        }

        let dimensions = bs.read_bits_leq32(16)? as u16;
        let entries = bs.read_bits_leq32(24)?;

        let is_length_ordered = bs.read_bool()?;

        let code_lens = if is_length_ordered {
            read_code_lens_ordered(bs, entries)?
        }
        else {
            read_code_lens_unordered(bs, entries)?
        };

        let vq_table = read_vq_table(bs, entries, dimensions)?;

        // Derive the canonical codeword for each entry. An entry's decoded value is simply its
        // index.
        let code_words = assign_codewords(&code_lens)?;

        let values: Vec<u32> = (0..entries).collect();

        // Vorbis packs codewords most-significant bit first into a stream that is consumed
        // least-significant bit first, so the decode table is built with reversed bits.
        let codebook =
            CodebookBuilder::new(BitOrder::Reverse).make(&code_words, &code_lens, &values)?;

        Ok(VorbisCodebook { codebook, dimensions, vq_table })
    }

    /// Decode one codeword and return its entry index.
    #[inline(always)]
    pub fn read_scalar<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<u32> {
        Ok(bs.read_codebook(&self.codebook)?.0)
    }

    /// Decode one codeword and return the VQ vector of the decoded entry.
    #[inline(always)]
    pub fn read_vq<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<&[f32]> {
        let entry = bs.read_codebook(&self.codebook)?.0;

        match &self.vq_table {
            Some(vq_table) => {
                let dims = usize::from(self.dimensions);
                let start = dims * entry as usize;

                Ok(&vq_table[start..start + dims])
            }
            None => decode_error("vorbis: not a vq codebook"),
        }
    }

    #[inline(always)]
    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::{assign_codewords, lookup1_values, unpack_vq_table};

    fn naive_lookup1_values(entries: u32, dimensions: u16) -> u32 {
        let mut root = 0u32;

        while (root + 1).checked_pow(u32::from(dimensions)).map_or(false, |pow| pow <= entries) {
            root += 1;
        }

        root
    }

    #[test]
    fn verify_lookup1_values() {
        for &(entries, dims) in
            &[(1, 1), (49, 2), (361, 2), (256, 4), (625, 4), (16_777_215, 8)]
        {
            assert_eq!(lookup1_values(entries, dims), naive_lookup1_values(entries, dims));
        }
    }

    #[test]
    fn verify_assign_codewords() {
        // A complete code over lengths [1, 3, 3, 3]: 0, 100, 101, 110... is under-specified,
        // whereas [1, 2, 3, 3] is complete: 0, 10, 110, 111.
        assert_eq!(assign_codewords(&[1, 2, 3, 3]).unwrap(), &[0b0, 0b10, 0b110, 0b111]);

        // Sparse entries take no code space and are assigned a placeholder.
        assert_eq!(
            assign_codewords(&[2, 0, 2, 2, 2]).unwrap(),
            &[0b00, 0, 0b01, 0b10, 0b11]
        );
    }

    #[test]
    fn verify_assign_codewords_rejects_incomplete() {
        // Three codewords of length 1 overfill the code space.
        assert!(assign_codewords(&[1, 1, 1]).is_err());

        // An unfilled code space is also invalid.
        assert!(assign_codewords(&[1, 3, 3, 3]).is_err());

        // Except for the single-entry codebook, which is legal by the errata.
        assert_eq!(assign_codewords(&[1]).unwrap(), &[0]);
    }

    #[test]
    fn verify_unpack_vq_table_type1_digits() {
        // 9 entries of 2 dimensions sharing 3 multiplicands: entry i uses multiplicands
        // [i % 3, (i / 3) % 3].
        let multiplicands: [u16; 3] = [0, 1, 2];

        let table = unpack_vq_table(&multiplicands, 1.0, 0.5, false, 1, 3, 9, 2);

        for entry in 0..9 {
            assert_eq!(table[2 * entry], 1.0 + 0.5 * ((entry % 3) as f32));
            assert_eq!(table[2 * entry + 1], 1.0 + 0.5 * (((entry / 3) % 3) as f32));
        }
    }

    #[test]
    fn verify_unpack_vq_table_sequence() {
        // With the sequence flag, each dimension accumulates onto the previous one.
        let multiplicands: [u16; 4] = [1, 2, 3, 4];

        let table = unpack_vq_table(&multiplicands, 0.0, 1.0, true, 2, 4, 2, 2);

        assert_eq!(&table, &[1.0, 3.0, 3.0, 7.0]);
    }
}
