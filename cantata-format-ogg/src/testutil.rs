// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for constructing well-formed OGG pages in unit tests.

use cantata_core::checksum::Crc32;
use cantata_core::io::Monitor;

/// Builds a single OGG page containing the provided packets.
///
/// If `last_continues` is `true` then the final packet is emitted as an unterminated sequence of
/// 255-byte segments, and must therefore be a multiple of 255 bytes long. Flag bit 0 marks the
/// page as a continuation, bit 1 as beginning-of-stream, and bit 2 as end-of-stream.
pub fn build_page(
    serial: u32,
    sequence: u32,
    absgp: u64,
    flags: u8,
    packets: &[&[u8]],
    last_continues: bool,
) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut body = Vec::new();

    for (i, packet) in packets.iter().enumerate() {
        let is_last = i == packets.len() - 1;

        if is_last && last_continues {
            assert!(packet.len() % 255 == 0, "a continued packet fragment must be 255-aligned");

            segments.extend(std::iter::repeat(255u8).take(packet.len() / 255));
        }
        else {
            // Each packet is laced as a run of 255-byte segments with a terminating segment of
            // less-than 255 bytes.
            segments.extend(std::iter::repeat(255u8).take(packet.len() / 255));
            segments.push((packet.len() % 255) as u8);
        }

        body.extend_from_slice(packet);
    }

    assert!(segments.len() <= 255, "too many segments for a single page");

    let mut page = Vec::with_capacity(27 + segments.len() + body.len());

    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&absgp.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    // Checksum placeholder.
    page.extend_from_slice(&[0u8; 4]);
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(&body);

    // Compute the page checksum over the entire page with the checksum field zeroed, then patch
    // it in.
    let mut crc = Crc32::new(0);
    crc.process_buf_bytes(&page);

    page[22..26].copy_from_slice(&crc.crc().to_le_bytes());

    page
}
