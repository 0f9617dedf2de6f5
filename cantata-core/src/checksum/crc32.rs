// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use lazy_static::lazy_static;

use crate::io::Monitor;

lazy_static! {
    /// Lookup table for the CRC-32 with generator polynomial 0x04c11db7 (the polynomial used by
    /// the Ogg container), processing one byte per step in most-significant-bit-first order.
    static ref CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];

        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;

            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04c1_1db7
                }
                else {
                    crc << 1
                };
            }

            *entry = crc;
        }

        table
    };
}

/// `Crc32` implements the big-endian (non-reflected) CRC-32 with the generator polynomial
/// 0x04c1db7, no final inversion, as specified for Ogg page checksums.
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    /// Instantiates a new CRC-32 generator with an initial state.
    pub fn new(seed: u32) -> Self {
        Crc32 { crc: seed }
    }

    /// Gets the current CRC-32 value.
    pub fn crc(&self) -> u32 {
        self.crc
    }
}

impl Monitor for Crc32 {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        self.crc = (self.crc << 8) ^ CRC32_TABLE[(((self.crc >> 24) as u8) ^ byte) as usize];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Crc32;
    use crate::io::Monitor;

    /// Bit-at-a-time reference implementation of the Ogg CRC.
    fn crc32_reference(data: &[u8]) -> u32 {
        let mut crc = 0u32;

        for &byte in data {
            crc ^= u32::from(byte) << 24;

            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04c1_1db7 } else { crc << 1 };
            }
        }

        crc
    }

    #[test]
    fn verify_crc32_against_reference() {
        // Pseudo-random test data from a fixed-seed LCG.
        let mut lcg: u32 = 0x2c7e_49a5;

        let mut data = vec![0u8; 4096];

        for byte in data.iter_mut() {
            lcg = lcg.wrapping_mul(1664525).wrapping_add(1013904223);
            *byte = (lcg >> 24) as u8;
        }

        let mut crc32 = Crc32::new(0);
        crc32.process_buf_bytes(&data);

        assert_eq!(crc32.crc(), crc32_reference(&data));
    }

    #[test]
    fn verify_crc32_bit_flip() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut clean = Crc32::new(0);
        clean.process_buf_bytes(data);

        // Flipping any single bit must change the checksum.
        let mut corrupt = data.to_vec();
        corrupt[17] ^= 0x10;

        let mut dirty = Crc32::new(0);
        dirty.process_buf_bytes(&corrupt);

        assert_ne!(clean.crc(), dirty.crc());
    }
}
