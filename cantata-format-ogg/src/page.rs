// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::checksum::Crc32;
use cantata_core::errors::{decode_error, unsupported_error, Error, Result};
use cantata_core::io::{BufReader, Monitor, MonitorStream, ReadBytes, SeekBuffered};

use log::warn;

pub const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";

pub const OGG_PAGE_HEADER_SIZE: usize = 27;
pub const OGG_PAGE_MAX_SIZE: usize = OGG_PAGE_HEADER_SIZE + 255 + 255 * 255;

/// The maximum number of bytes that will be scanned for a page capture pattern before the stream
/// is deemed unrecoverable.
const OGG_PAGE_SCAN_LIMIT: u64 = 64 * 1024;

/// The error message raised when the scan limit is exhausted. The stream is unrecoverable when
/// this error is raised.
const OGG_SCAN_LIMIT_ERROR: &str = "ogg: capture pattern not found within scan limit";

/// The granule position stored in a page that completes no packet.
pub const OGG_NO_GRANULE: u64 = u64::MAX;

#[derive(Copy, Clone, Default)]
pub struct PageHeader {
    pub version: u8,
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
    pub is_continuation: bool,
    pub is_first_page: bool,
    pub is_last_page: bool,
}

/// Parses a `PageHeader` from the provided reader.
pub fn read_page_header<B: ReadBytes>(reader: &mut B) -> Result<PageHeader> {
    // A page opens with the "OggS" capture pattern.
    let marker = reader.read_quad_bytes()?;

    if marker != OGG_PAGE_MARKER {
        return unsupported_error("ogg: missing ogg stream marker");
    }

    // Version 0 is the only OGG stream structure revision ever defined.
    let version = reader.read_byte()?;

    if version != 0 {
        return unsupported_error("ogg: invalid ogg version");
    }

    // The flag byte defines only its three lowest bits, the rest must be clear.
    let flags = reader.read_byte()?;

    if flags & 0xf8 != 0 {
        return decode_error("ogg: invalid flag bits set");
    }

    let absgp = reader.read_u64()?;
    let serial = reader.read_u32()?;
    let sequence = reader.read_u32()?;
    let crc = reader.read_u32()?;
    let n_segments = reader.read_byte()?;

    Ok(PageHeader {
        version,
        absgp,
        serial,
        sequence,
        crc,
        n_segments,
        is_continuation: (flags & 0x01) != 0,
        is_first_page: (flags & 0x02) != 0,
        is_last_page: (flags & 0x04) != 0,
    })
}

/// A fully read and checksum-verified OGG page.
pub struct Page<'a> {
    /// The page header.
    pub header: PageHeader,
    /// If `true`, synchronization was lost and re-established immediately before this page was
    /// read.
    pub is_resync: bool,
    packet_lens: &'a [usize],
    partial_len: usize,
    page_buf: &'a [u8],
}

impl<'a> Page<'a> {
    /// Returns an iterator over all complete packets within the page.
    ///
    /// If this page is marked as a continuation page, then the first packet is the remaining
    /// portion of a packet started on a previous page.
    pub fn packets(&self) -> PagePackets<'a> {
        PagePackets { lens: self.packet_lens.iter(), data: self.page_buf }
    }

    /// Gets the number of complete packets within the page.
    pub fn num_packets(&self) -> usize {
        self.packet_lens.len()
    }

    /// Gets the first complete packet in the page, if any.
    pub fn first_packet(&self) -> Option<&'a [u8]> {
        self.packet_lens.first().map(|&len| &self.page_buf[..len])
    }

    /// Gets the trailing portion of a packet that continues onto the next page, if any.
    pub fn partial_packet(&self) -> Option<&'a [u8]> {
        if self.partial_len > 0 {
            let start = self.page_buf.len() - self.partial_len;
            Some(&self.page_buf[start..])
        }
        else {
            None
        }
    }
}

/// An iterator over the complete packets within a page.
pub struct PagePackets<'a> {
    lens: std::slice::Iter<'a, usize>,
    data: &'a [u8],
}

impl<'a> Iterator for PagePackets<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self.lens.next() {
            Some(&len) => {
                let (packet, rem) = self.data.split_at(len);
                self.data = rem;
                Some(packet)
            }
            None => None,
        }
    }
}

/// A reader of OGG pages.
///
/// The page reader holds the most recently read page. The page's payload is buffered and validated
/// against the page checksum before being made accessible, therefore a `Page` obtained from this
/// reader is always consistent.
pub struct PageReader {
    header: PageHeader,
    packet_lens: Vec<usize>,
    partial_len: usize,
    page_buf: Vec<u8>,
    is_resync: bool,
    pending_resync: bool,
    waste_bits: u64,
}

impl PageReader {
    pub fn try_new<B>(reader: &mut B) -> Result<Self>
    where
        B: ReadBytes + SeekBuffered,
    {
        let mut pages = PageReader {
            header: Default::default(),
            packet_lens: Default::default(),
            partial_len: 0,
            page_buf: Default::default(),
            is_resync: false,
            pending_resync: false,
            waste_bits: 0,
        };

        pages.next_page(reader)?;

        Ok(pages)
    }

    /// Gets the header of the current page.
    pub fn header(&self) -> PageHeader {
        self.header
    }

    /// Gets the current page.
    pub fn page(&self) -> Page<'_> {
        Page {
            header: self.header,
            is_resync: self.is_resync,
            packet_lens: &self.packet_lens,
            partial_len: self.partial_len,
            page_buf: &self.page_buf,
        }
    }

    /// Gets the first complete packet of the current page, if any.
    pub fn first_packet(&self) -> Option<&[u8]> {
        self.page().first_packet()
    }

    /// Gets the number of bits wasted searching for page capture patterns. Each byte skipped
    /// during synchronization accounts for 8 wasted bits.
    pub fn waste_bits(&self) -> u64 {
        self.waste_bits
    }

    /// Attempts to read the next page. If the page is corrupted or invalid, an error is returned,
    /// and the reader is positioned one byte past the capture pattern of the rejected candidate
    /// so that the scan may resume.
    pub fn try_next_page<B>(&mut self, reader: &mut B) -> Result<()>
    where
        B: ReadBytes + SeekBuffered,
    {
        // Synchronize to the next capture pattern. Bytes skipped over are wasted.
        let skipped = sync_page(reader)?;

        if skipped > 0 {
            self.waste_bits += 8 * skipped;
            self.pending_resync = true;
        }

        // The position of the capture pattern of this page candidate.
        let marker_pos = reader.pos() - 4;

        match self.read_page_after_marker(reader) {
            Ok(()) => {
                // A successful read consumes any pending resynchronization and marks the page.
                self.is_resync = std::mem::replace(&mut self.pending_resync, false);
                Ok(())
            }
            Err(e) => {
                // The candidate was rejected. Position the reader one byte past the rejected
                // capture pattern, and account for the slipped byte, so that scanning resumes
                // from there. An I/O error is unrecoverable, so do not bother in that case.
                if !matches!(e, Error::IoError(_)) {
                    reader.seek_buffered(marker_pos + 1);
                    self.waste_bits += 8;
                    self.pending_resync = true;
                }
                Err(e)
            }
        }
    }

    /// Reads the next page, skipping past corrupt or otherwise invalid data until a valid page is
    /// found, or the underlying reader errors.
    pub fn next_page<B>(&mut self, reader: &mut B) -> Result<()>
    where
        B: ReadBytes + SeekBuffered,
    {
        loop {
            match self.try_next_page(reader) {
                Ok(()) => return Ok(()),
                Err(Error::IoError(e)) => return Err(Error::IoError(e)),
                // An exhausted scan means the stream is unrecoverably corrupt.
                Err(Error::DecodeError(msg)) if msg == OGG_SCAN_LIMIT_ERROR => {
                    return Err(Error::DecodeError(msg))
                }
                Err(_) => (),
            }
        }
    }

    /// Reads the next page with a matching serial, skipping past corrupt or otherwise invalid
    /// data, and pages of other logical streams, until one is found or the underlying reader
    /// errors.
    ///
    /// Continuation pages are not accepted since a packet cannot be synchronized to mid-way.
    pub fn next_page_for_serial<B>(&mut self, reader: &mut B, serial: u32) -> Result<()>
    where
        B: ReadBytes + SeekBuffered,
    {
        loop {
            self.next_page(reader)?;

            let header = self.header();

            if header.serial == serial && !header.is_continuation {
                return Ok(());
            }
        }
    }

    /// Reads the body of a page given the reader is positioned immediately after the capture
    /// pattern.
    fn read_page_after_marker<B: ReadBytes>(&mut self, reader: &mut B) -> Result<()> {
        // Read the part of the page header after the capture pattern into a buffer.
        let mut header_buf = [0u8; OGG_PAGE_HEADER_SIZE];
        header_buf[..4].copy_from_slice(&OGG_PAGE_MARKER);

        reader.read_buf_exact(&mut header_buf[4..])?;

        // Parse the page header. If the header is invalid then the reader likely synchronized to
        // a codec bitstream that contained the capture pattern, and not an actual page.
        let header = read_page_header(&mut BufReader::new(&header_buf))?;

        // The page checksum is computed with the checksum field of the header zeroed.
        header_buf[22..26].copy_from_slice(&[0u8; 4]);

        let mut crc32 = Crc32::new(0);

        crc32.process_buf_bytes(&header_buf);

        // The remainder of the page is checksummed as it is read.
        let mut crc32_reader = MonitorStream::new(reader, crc32);

        // Read the segment table, and calculate the length of each packet within the page, and
        // the total page body length.
        self.packet_lens.clear();

        let mut packet_len = 0;
        let mut body_len = 0;

        for _ in 0..header.n_segments {
            let segment_len = usize::from(crc32_reader.read_byte()?);

            packet_len += segment_len;
            body_len += segment_len;

            // A segment with a length < 255 closes the current packet. A final segment of
            // exactly 255 means the last packet continues onto the next page.
            if segment_len < 255 {
                self.packet_lens.push(packet_len);
                packet_len = 0;
            }
        }

        self.partial_len = packet_len;

        // Read the page body.
        self.page_buf.resize(body_len, 0);

        crc32_reader.read_buf_exact(&mut self.page_buf)?;

        // The page is rejected if the computed checksum does not match the stored checksum.
        let calculated_crc = crc32_reader.monitor().crc();

        if calculated_crc != header.crc {
            warn!(
                "ogg: page with serial={:#x}, sequence={} failed checksum",
                header.serial, header.sequence
            );

            self.packet_lens.clear();
            self.partial_len = 0;
            self.page_buf.clear();

            return decode_error("ogg: page checksum mismatch");
        }

        self.header = header;

        Ok(())
    }
}

/// Scans the provided reader for the next OGG page capture pattern. Returns the number of bytes
/// skipped before the capture pattern was found.
///
/// If the capture pattern is not found within the scan limit the stream is considered
/// unrecoverable and a decode error is returned.
fn sync_page<B: ReadBytes>(reader: &mut B) -> Result<u64> {
    let mut skipped = 0u64;

    let mut marker = u32::from_be_bytes(reader.read_quad_bytes()?);

    while marker.to_be_bytes() != OGG_PAGE_MARKER {
        if skipped >= OGG_PAGE_SCAN_LIMIT {
            return Err(Error::DecodeError(OGG_SCAN_LIMIT_ERROR));
        }

        marker <<= 8;
        marker |= u32::from(reader.read_u8()?);

        skipped += 1;
    }

    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use cantata_core::io::{MediaSourceStream, SeekBuffered};

    use super::super::testutil::build_page;
    use super::{PageReader, OGG_PAGE_MAX_SIZE};

    fn make_stream(data: Vec<u8>) -> MediaSourceStream {
        let mut mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        mss.ensure_seekback_buffer(OGG_PAGE_MAX_SIZE);
        mss
    }

    #[test]
    fn verify_page_round_trip() {
        // Three packets of varying lengths, including one that requires multiple segments.
        let p0 = vec![0x11u8; 64];
        let p1 = vec![0x22u8; 510];
        let p2 = vec![0x33u8; 1];

        let page = build_page(0xcafe, 0, 192, 0x02, &[&p0, &p1, &p2], false);

        let mut reader = make_stream(page);
        let pages = PageReader::try_new(&mut reader).unwrap();

        let header = pages.header();

        assert_eq!(header.serial, 0xcafe);
        assert_eq!(header.sequence, 0);
        assert_eq!(header.absgp, 192);
        assert!(header.is_first_page);
        assert!(!header.is_continuation);
        assert!(!header.is_last_page);

        let page = pages.page();

        assert_eq!(page.num_packets(), 3);
        assert!(page.partial_packet().is_none());

        let packets: Vec<&[u8]> = page.packets().collect();

        assert_eq!(packets[0], &p0[..]);
        assert_eq!(packets[1], &p1[..]);
        assert_eq!(packets[2], &p2[..]);
    }

    #[test]
    fn verify_page_continued_packet() {
        // A packet spanning two pages: the first page carries an exact multiple of 255 bytes.
        let packet = vec![0x55u8; 600];

        let mut data = build_page(0x1, 0, super::OGG_NO_GRANULE, 0, &[&packet[..510]], true);
        data.extend(build_page(0x1, 1, 600, 0x01, &[&packet[510..]], false));

        let mut reader = make_stream(data);
        let mut pages = PageReader::try_new(&mut reader).unwrap();

        {
            let page = pages.page();
            assert_eq!(page.num_packets(), 0);
            assert_eq!(page.partial_packet().unwrap(), &packet[..510]);
        }

        pages.try_next_page(&mut reader).unwrap();

        let page = pages.page();
        assert!(page.header.is_continuation);
        assert_eq!(page.num_packets(), 1);
        assert_eq!(page.first_packet().unwrap(), &packet[510..]);
    }

    #[test]
    fn verify_page_resync() {
        let p0 = vec![0xaau8; 100];
        let p1 = vec![0xbbu8; 100];

        let mut data = build_page(0x7, 0, 64, 0x02, &[&p0], false);

        // Inject garbage between the two pages.
        data.extend(std::iter::repeat(0x5a).take(1117));
        data.extend(build_page(0x7, 1, 128, 0, &[&p1], false));

        let mut reader = make_stream(data);
        let mut pages = PageReader::try_new(&mut reader).unwrap();

        assert!(!pages.page().is_resync);
        assert_eq!(pages.waste_bits(), 0);

        pages.next_page(&mut reader).unwrap();

        let page = pages.page();

        assert!(page.is_resync);
        assert_eq!(page.header.sequence, 1);
        assert_eq!(page.first_packet().unwrap(), &p1[..]);
        assert_eq!(pages.waste_bits(), 8 * 1117);
    }

    #[test]
    fn verify_page_rejects_corrupt() {
        let p0 = vec![0x01u8; 100];
        let p1 = vec![0x02u8; 100];

        let mut data = build_page(0x7, 0, 64, 0x02, &[&p0], false);
        let page1_start = data.len();
        data.extend(build_page(0x7, 1, 128, 0, &[&p1], false));

        // Flip a single bit within the second page's body.
        data[page1_start + 40] ^= 0x04;

        let mut reader = make_stream(data);
        let mut pages = PageReader::try_new(&mut reader).unwrap();

        // The second page must fail its checksum, after which the reader hits end-of-stream.
        assert!(pages.next_page(&mut reader).is_err());
    }
}
