// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use cantata_core::codecs::CodecParameters;
use cantata_core::errors::Result;
use cantata_core::formats::Packet;

use log::{debug, warn};

use super::common::SideData;
use super::mappings::{MapResult, Mapper, PacketParser};
use super::page::{Page, OGG_NO_GRANULE};

/// A `LogicalStream` assembles packets from the pages of a single logical bitstream within the
/// physical stream.
///
/// Packets may span page boundaries. The logical stream holds the partially assembled packet
/// until the page that completes it is read. Completed packets are assigned timestamps and
/// durations derived from the granule position of the completing page, and queued for
/// consumption.
pub struct LogicalStream {
    /// The codec mapper.
    mapper: Box<dyn Mapper>,
    /// The packet duration parser. Present once the mapper is ready.
    parser: Option<Box<dyn PacketParser>>,
    /// Buffer for a partially assembled packet spanning one or more pages.
    part_buf: Vec<u8>,
    /// Completed packets awaiting consumption.
    packets: VecDeque<Packet>,
    /// The timestamp at the end of the most recently queued packet.
    base_ts: u64,
    /// The expected sequence number of the next page.
    next_seq: Option<u32>,
    /// The granule position of the most recent page carrying one.
    last_absgp: Option<u64>,
    /// The timestamp of the first audio frame of the stream.
    start_ts: u64,
}

impl LogicalStream {
    /// The maximum size of a single assembled packet.
    const MAX_PACKET_LEN: usize = 8 * 1024 * 1024;

    pub fn new(mapper: Box<dyn Mapper>) -> Self {
        LogicalStream {
            mapper,
            parser: None,
            part_buf: Default::default(),
            packets: Default::default(),
            base_ts: 0,
            next_seq: None,
            last_absgp: None,
            start_ts: 0,
        }
    }

    /// Gets an immutable reference to the codec parameters of the stream.
    pub fn codec_params(&self) -> &CodecParameters {
        self.mapper.codec_params()
    }

    /// Returns `true` if the stream has consumed all its header packets and can produce
    /// decodable packets.
    pub fn is_ready(&self) -> bool {
        self.mapper.is_ready()
    }

    /// Returns `true` if there are any queued packets.
    pub fn has_packets(&self) -> bool {
        !self.packets.is_empty()
    }

    /// Maybe consumes and returns the next queued packet.
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Discards queued packets up-to `pre_roll` packets before the first packet containing the
    /// required timestamp.
    ///
    /// If a queued packet contains the required timestamp, returns its timestamp and whether all
    /// pre-roll packets ahead of it were retained. Otherwise, all packets except the last
    /// `pre_roll` are discarded, and `None` is returned.
    pub fn position_packets(&mut self, required_ts: u64, pre_roll: usize) -> Option<(u64, bool)> {
        match self.packets.iter().position(|packet| packet.ts + packet.dur >= required_ts) {
            Some(idx) => {
                let actual_ts = self.packets[idx].ts;

                self.packets.drain(..idx.saturating_sub(pre_roll));

                Some((actual_ts, idx >= pre_roll))
            }
            None => {
                // No queued packet reaches the required timestamp. Keep the trailing packets as
                // potential pre-roll for a future match.
                let keep_from = self.packets.len().saturating_sub(pre_roll);

                self.packets.drain(..keep_from);

                None
            }
        }
    }

    /// Clears all queued packets and the packet assembly state. The stream will re-anchor its
    /// timestamps at the next page carrying a granule position.
    pub fn reset(&mut self) {
        self.part_buf.clear();
        self.packets.clear();
        self.base_ts = 0;
        self.next_seq = None;
        self.last_absgp = None;

        self.mapper.reset();

        // Packet duration parsing is stateful. Begin with a fresh parser.
        if self.mapper.is_ready() {
            self.parser = self.mapper.make_parser();
        }
    }

    /// Reads the packets of a page, assembling packets that span pages, and queues all packets
    /// completed by this page. Returns any side data produced by header packets.
    pub fn read_page(&mut self, page: &Page<'_>) -> Result<Vec<SideData>> {
        let header = page.header;

        let mut side_data = Vec::new();

        // A resynchronized page, or a page sequence discontinuity, invalidates any partially
        // assembled packet since its remaining fragments are lost.
        let is_seq_ok = match self.next_seq {
            Some(next_seq) => header.sequence == next_seq,
            None => true,
        };

        let is_discontinuity = page.is_resync || !is_seq_ok;

        if is_discontinuity && !self.part_buf.is_empty() {
            warn!(
                "ogg: serial={:#x} dropped partial packet of {} bytes after discontinuity",
                header.serial,
                self.part_buf.len()
            );
            self.part_buf.clear();
        }

        // Granule positions must be non-decreasing within a logical stream.
        if let (Some(last_absgp), true) = (self.last_absgp, header.absgp != OGG_NO_GRANULE) {
            if header.absgp < last_absgp {
                warn!("ogg: serial={:#x} page granule position regressed", header.serial);
            }
        }

        self.next_seq = Some(header.sequence.wrapping_add(1));

        // Gather the packets completed by this page.
        let mut complete: Vec<Box<[u8]>> = Vec::with_capacity(page.num_packets());

        for (i, fragment) in page.packets().enumerate() {
            if i == 0 && header.is_continuation {
                if self.part_buf.is_empty() {
                    // The first fragment completes a packet started on a page that was never
                    // seen. It cannot be assembled, so it must be discarded.
                    debug!("ogg: serial={:#x} discarded unassemblable fragment", header.serial);
                    continue;
                }

                // The first fragment completes the partially assembled packet.
                self.part_buf.extend_from_slice(fragment);
                complete.push(self.part_buf.drain(..).collect());
            }
            else if i == 0 && !self.part_buf.is_empty() {
                // A continuation page was expected to complete the partial packet, but this page
                // does not continue it. The partial packet must be dropped.
                warn!("ogg: serial={:#x} expected a continuation page", header.serial);
                self.part_buf.clear();

                complete.push(Box::from(fragment));
            }
            else {
                complete.push(Box::from(fragment));
            }
        }

        // Buffer the trailing fragment of a packet that continues onto the next page. If this
        // page continues a packet that could not be assembled, and did not complete any packet,
        // then the trailing fragment belongs to that same unassemblable packet.
        if let Some(partial) = page.partial_packet() {
            let is_orphan =
                header.is_continuation && page.num_packets() == 0 && self.part_buf.is_empty();

            if !is_orphan {
                if self.part_buf.len() + partial.len() > LogicalStream::MAX_PACKET_LEN {
                    self.part_buf.clear();
                    return cantata_core::errors::limit_error("ogg: packet buffer limit reached");
                }

                self.part_buf.extend_from_slice(partial);
            }
        }

        // Dispatch the completed packets.
        let mut audio = Vec::new();

        for data in complete {
            if !self.mapper.is_ready() {
                match self.mapper.map_packet(&data)? {
                    MapResult::Setup => {
                        self.parser = self.mapper.make_parser();
                    }
                    MapResult::SideData { data } => side_data.push(data),
                    MapResult::StreamData { .. } => {
                        warn!("ogg: serial={:#x} stream data before setup", header.serial)
                    }
                    MapResult::Unknown => (),
                }
            }
            else {
                audio.push(data);
            }
        }

        if !audio.is_empty() {
            self.queue_audio_packets(page, audio);
        }

        if header.absgp != OGG_NO_GRANULE {
            self.last_absgp = Some(header.absgp);
        }

        Ok(side_data)
    }

    /// Queue completed audio packets with timestamps and durations.
    fn queue_audio_packets(&mut self, page: &Page<'_>, audio: Vec<Box<[u8]>>) {
        let header = page.header;

        // Compute the duration of each packet. Durations must be computed in bitstream order.
        let durs: Vec<u64> = match &mut self.parser {
            Some(parser) => {
                audio.iter().map(|data| parser.parse_next_packet_dur(data)).collect()
            }
            None => vec![0; audio.len()],
        };

        let total_dur: u64 = durs.iter().sum();

        if header.is_last_page && header.absgp != OGG_NO_GRANULE {
            // The final granule position of the stream is authoritative: if decoding the queued
            // packets would produce samples past it, the excess must be trimmed from the end.
            let mut ts = self.base_ts;
            let excess = (self.base_ts + total_dur).saturating_sub(header.absgp);

            if excess > 0 {
                debug!(
                    "ogg: serial={:#x} final page trims {} frames",
                    header.serial, excess
                );
            }

            let mut trims = vec![0u64; audio.len()];

            // Distribute the excess over the trailing packets.
            let mut rem = excess;

            for (trim, dur) in trims.iter_mut().zip(&durs).rev() {
                *trim = rem.min(*dur);
                rem -= *trim;
            }

            for ((data, dur), trim) in audio.into_iter().zip(durs).zip(trims) {
                self.packets.push_back(Packet::new_trimmed_from_boxed_slice(
                    header.serial,
                    ts,
                    dur - trim,
                    0,
                    trim as u32,
                    data,
                ));
                ts += dur - trim;
            }

            self.base_ts = header.absgp.max(ts);
        }
        else {
            // The granule position of a page is the timestamp at the end of the last packet it
            // completes. Anchor the queued packets such that they end there. When the page
            // carries no granule position, extend from the running timestamp.
            let page_end_ts = if header.absgp != OGG_NO_GRANULE {
                header.absgp
            }
            else {
                self.base_ts + total_dur
            };

            let mut ts = page_end_ts.saturating_sub(total_dur);

            if ts < self.base_ts && self.base_ts > 0 {
                debug!(
                    "ogg: serial={:#x} page granule implies overlapping packets",
                    header.serial
                );
            }

            for (data, dur) in audio.into_iter().zip(durs) {
                self.packets.push_back(Packet::new_from_boxed_slice(
                    header.serial,
                    ts,
                    dur,
                    data,
                ));
                ts += dur;
            }

            self.base_ts = page_end_ts;
        }
    }

    /// Examines a page of this stream, without changing any state, and returns the timestamps of
    /// the first and last frames that the packets completed by the page would produce.
    pub fn inspect_page(&self, page: &Page<'_>) -> (u64, u64) {
        let end_ts = if page.header.absgp != OGG_NO_GRANULE { page.header.absgp } else { 0 };

        // Compute the total duration of all packets completed within the page using a fresh
        // parser. The duration of the first packet is generally unknowable to a fresh parser, so
        // the starting timestamp errs towards the end of the page. This is acceptable for a
        // coarse search that will be refined by a linear scan.
        let total_dur = match self.mapper.make_parser() {
            Some(mut parser) => {
                page.packets().map(|data| parser.parse_next_packet_dur(data)).sum()
            }
            None => 0,
        };

        (end_ts.saturating_sub(total_dur), end_ts)
    }

    /// Examines the first page of the stream's audio data and records the timestamp of the first
    /// frame.
    pub fn inspect_start_page(&mut self, page: &Page<'_>) {
        let (start_ts, _) = self.inspect_page(page);

        self.start_ts = start_ts;
        self.mapper.codec_params_mut().with_start_ts(start_ts);

        if start_ts > 0 {
            debug!("ogg: serial={:#x} starts at ts={}", page.header.serial, start_ts);
        }
    }

    /// Examines a candidate final page of the stream and updates the total frame count.
    pub fn inspect_end_page(&mut self, page: &Page<'_>) {
        if page.header.absgp != OGG_NO_GRANULE {
            let n_frames = page.header.absgp.saturating_sub(self.start_ts);

            self.mapper.codec_params_mut().with_n_frames(n_frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use cantata_core::codecs::CodecParameters;
    use cantata_core::errors::Result;
    use cantata_core::io::{MediaSourceStream, SeekBuffered};

    use super::super::mappings::{MapResult, Mapper, PacketParser};
    use super::super::page::{PageReader, OGG_PAGE_MAX_SIZE};
    use super::super::testutil::build_page;
    use super::LogicalStream;

    /// A mapper for a fake codec where every packet's duration equals its length in bytes.
    struct ByteLenMapper {
        params: CodecParameters,
    }

    struct ByteLenParser;

    impl PacketParser for ByteLenParser {
        fn parse_next_packet_dur(&mut self, packet: &[u8]) -> u64 {
            packet.len() as u64
        }
    }

    impl Mapper for ByteLenMapper {
        fn name(&self) -> &'static str {
            "bytelen"
        }

        fn codec_params(&self) -> &CodecParameters {
            &self.params
        }

        fn codec_params_mut(&mut self) -> &mut CodecParameters {
            &mut self.params
        }

        fn make_parser(&self) -> Option<Box<dyn PacketParser>> {
            Some(Box::new(ByteLenParser))
        }

        fn map_packet(&mut self, packet: &[u8]) -> Result<MapResult> {
            Ok(MapResult::StreamData { dur: packet.len() as u64 })
        }
    }

    fn make_logical_stream() -> LogicalStream {
        let mut stream =
            LogicalStream::new(Box::new(ByteLenMapper { params: CodecParameters::new() }));
        stream.reset();
        stream
    }

    fn feed(stream: &mut LogicalStream, data: Vec<u8>) {
        let mut reader = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        reader.ensure_seekback_buffer(OGG_PAGE_MAX_SIZE);

        let mut pages = PageReader::try_new(&mut reader).unwrap();

        loop {
            stream.read_page(&pages.page()).unwrap();

            if pages.try_next_page(&mut reader).is_err() {
                break;
            }
        }
    }

    #[test]
    fn verify_packet_assembly_across_pages() {
        let pkt_a = vec![0xa1u8; 100];
        let pkt_b = vec![0xb2u8; 600];
        let pkt_c = vec![0xc3u8; 50];

        // Packet B spans both pages.
        let mut data = build_page(0x10, 0, 100, 0, &[&pkt_a, &pkt_b[..510]], true);
        data.extend(build_page(0x10, 1, 750, 0x01, &[&pkt_b[510..], &pkt_c], false));

        let mut stream = make_logical_stream();

        feed(&mut stream, data);

        let a = stream.next_packet().unwrap();
        assert_eq!(a.buf(), &pkt_a[..]);
        assert_eq!((a.ts, a.dur), (0, 100));

        let b = stream.next_packet().unwrap();
        assert_eq!(b.buf(), &pkt_b[..]);
        assert_eq!((b.ts, b.dur), (100, 600));

        let c = stream.next_packet().unwrap();
        assert_eq!(c.buf(), &pkt_c[..]);
        assert_eq!((c.ts, c.dur), (700, 50));

        assert!(stream.next_packet().is_none());
    }

    #[test]
    fn verify_dropped_partial_on_missing_continuation() {
        let pkt_a = vec![0xa1u8; 80];
        let pkt_b = vec![0xb2u8; 70];

        // The first page ends with a continued packet, but the second page does not carry the
        // continuation flag. The partial packet must be dropped.
        let mut data =
            build_page(0x11, 0, 80, 0, &[&pkt_a, &[0x77u8; 255][..]], true);
        data.extend(build_page(0x11, 1, 150, 0, &[&pkt_b], false));

        let mut stream = make_logical_stream();

        feed(&mut stream, data);

        let a = stream.next_packet().unwrap();
        assert_eq!(a.buf(), &pkt_a[..]);

        let b = stream.next_packet().unwrap();
        assert_eq!(b.buf(), &pkt_b[..]);

        assert!(stream.next_packet().is_none());
    }

    #[test]
    fn verify_final_granule_truncation() {
        let pkt_a = vec![0xa1u8; 100];
        let pkt_b = vec![0xb2u8; 100];

        // The final granule position pins the stream end 50 frames short of what the packets
        // decode to. The excess must be trimmed from the final packet.
        let data = build_page(0x12, 0, 150, 0x04, &[&pkt_a, &pkt_b], false);

        let mut stream = make_logical_stream();

        feed(&mut stream, data);

        let a = stream.next_packet().unwrap();
        assert_eq!((a.ts, a.dur, a.trim_end), (0, 100, 0));

        let b = stream.next_packet().unwrap();
        assert_eq!((b.ts, b.dur, b.trim_end), (100, 50, 50));
    }

    #[test]
    fn verify_position_packets_pre_roll() {
        let pkt_a = vec![0xa1u8; 100];
        let pkt_b = vec![0xb2u8; 100];
        let pkt_c = vec![0xc3u8; 100];

        let data = build_page(0x13, 0, 300, 0, &[&pkt_a, &pkt_b, &pkt_c], false);

        let mut stream = make_logical_stream();

        feed(&mut stream, data);

        // Timestamp 250 falls within packet C. With a pre-roll of one packet, packet B must be
        // retained at the head of the queue.
        let (actual_ts, has_pre_roll) = stream.position_packets(250, 1).unwrap();

        assert_eq!(actual_ts, 200);
        assert!(has_pre_roll);

        assert_eq!(stream.next_packet().unwrap().ts, 100);
        assert_eq!(stream.next_packet().unwrap().ts, 200);
        assert!(stream.next_packet().is_none());

        // A packet yet to be buffered cannot be positioned.
        assert!(stream.position_packets(400, 1).is_none());
    }

    #[test]
    fn verify_resync_recovery() {
        let pkt_a = vec![0xa1u8; 100];
        let pkt_b = vec![0xb2u8; 100];
        let pkt_c = vec![0xc3u8; 100];

        let mut data = build_page(0x14, 0, 100, 0, &[&pkt_a], false);

        // Inject garbage, and drop a whole page (sequence 1), before the next valid page.
        data.extend(std::iter::repeat(0x42).take(977));
        data.extend(build_page(0x14, 2, 300, 0, &[&pkt_b, &pkt_c], false));

        let mut stream = make_logical_stream();

        feed(&mut stream, data);

        // All packets on pages after the gap are still recovered.
        assert_eq!(stream.next_packet().unwrap().buf(), &pkt_a[..]);
        assert_eq!(stream.next_packet().unwrap().buf(), &pkt_b[..]);
        assert_eq!(stream.next_packet().unwrap().buf(), &pkt_c[..]);
    }
}
