// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};

use cantata_core::errors::{reset_error, seek_error, unsupported_error};
use cantata_core::errors::{Result, SeekErrorKind};
use cantata_core::formats::prelude::*;
use cantata_core::io::{MediaSource, MediaSourceStream, ReadBytes, SeekBuffered};
use cantata_core::meta::{Metadata, MetadataLog};

use log::{debug, info, warn};

use super::common::SideData;
use super::logical::LogicalStream;
use super::mappings;
use super::page::*;
use super::physical;

/// OGG demultiplexer.
///
/// `OggReader` implements a demuxer for Xiph's OGG container format.
pub struct OggReader {
    reader: MediaSourceStream,
    tracks: Vec<Track>,
    metadata: MetadataLog,
    /// The page reader.
    pages: PageReader,
    /// `LogicalStream` for each serial.
    streams: BTreeMap<u32, LogicalStream>,
    /// The position of the first byte of the current physical stream.
    phys_byte_range_start: u64,
    /// The position of the first byte of the next physical stream, if available.
    phys_byte_range_end: Option<u64>,
}

impl OggReader {
    /// Gets the number of bits wasted searching for page capture patterns since the reader was
    /// instantiated.
    pub fn waste_bits(&self) -> u64 {
        self.pages.waste_bits()
    }

    fn read_page(&mut self) -> Result<()> {
        // Read pages, skipping corrupt data, until a page is successfully read, an IO error
        // occurs, or the synchronization scan limit is exhausted.
        self.pages.next_page(&mut self.reader)?;

        let page = self.pages.page();

        // A beginning-of-stream page after the headers were read means a chained physical
        // stream starts here. Rebuild around it and ask the caller to reset.
        if page.header.is_first_page {
            self.start_new_physical_stream()?;
            return reset_error();
        }

        match self.streams.get_mut(&page.header.serial) {
            Some(stream) => {
                for data in stream.read_page(&page)? {
                    match data {
                        SideData::Metadata(rev) => self.metadata.push(rev),
                    }
                }
            }
            // A page of a stream that was absent at bootstrap carries nothing usable. Drop it.
            None => (),
        }

        Ok(())
    }

    fn next_logical_packet(&mut self) -> Result<Packet> {
        // Packets queue up in the stream that the most recently read page belongs to, so after
        // draining that stream's queue it suffices to keep reading pages.
        loop {
            let serial = self.pages.header().serial;

            if let Some(stream) = self.streams.get_mut(&serial) {
                if let Some(packet) = stream.next_packet() {
                    return Ok(packet);
                }
            }

            self.read_page()?;
        }
    }

    fn do_seek(&mut self, serial: u32, required_ts: u64) -> Result<SeekedTo> {
        // The decoder requires the packet preceding the target packet to prime its overlap
        // state. Therefore, position the packet queue one packet (the pre-roll) ahead of the
        // packet containing the required timestamp.
        const PRE_ROLL: usize = 1;

        // Use the bisection method to coarsely seek to the nearest page that ends before the
        // required timestamp.
        self.seek_coarse(serial, required_ts)?;

        let mut retried = false;

        // Consume packets until the packet containing the desired timestamp, and its pre-roll,
        // are positioned at the head of the queue.
        let actual_ts = loop {
            let positioned = match self.streams.get_mut(&serial) {
                Some(stream) => stream.position_packets(required_ts, PRE_ROLL),
                None => return seek_error(SeekErrorKind::InvalidTrack),
            };

            match positioned {
                Some((actual_ts, true)) => break actual_ts,
                Some((actual_ts, false)) => {
                    // The packet containing the required timestamp is buffered, but not its
                    // pre-roll. If possible, restart the search slightly earlier so that the
                    // preceding packet is buffered as well.
                    if !retried && actual_ts > 0 {
                        debug!("seek: retrying for pre-roll of packet_ts={}", actual_ts);

                        retried = true;
                        self.seek_coarse(serial, actual_ts - 1)?;
                        continue;
                    }

                    break actual_ts;
                }
                None => self.read_page()?,
            }
        };

        debug!(
            "seeked track={:#x} to packet_ts={} (delta={})",
            serial,
            actual_ts,
            actual_ts as i64 - required_ts as i64
        );

        Ok(SeekedTo { track_id: serial, actual_ts, required_ts })
    }

    /// Coarsely seek, using a bisection of the physical stream's byte range, to the page
    /// containing the required timestamp, and load that page. All logical streams are reset.
    fn seek_coarse(&mut self, serial: u32, required_ts: u64) -> Result<()> {
        // Bisection method byte ranges. When these two values converge, the bisection has
        // found the position of the correct page.
        let mut start_byte_pos = self.phys_byte_range_start;
        let mut end_byte_pos = self.phys_byte_range_end.unwrap();

        // Bisect the stream while the byte range is large. For smaller ranges, a linear scan
        // is faster than having the bisection converge.
        while end_byte_pos - start_byte_pos > 2 * OGG_PAGE_MAX_SIZE as u64 {
            // Find the middle of the upper and lower byte search range.
            let mid_byte_pos = (start_byte_pos + end_byte_pos) / 2;

            // Seek to the middle of the byte range.
            self.reader.seek(SeekFrom::Start(mid_byte_pos))?;

            // Read the next page belonging to the logical stream being seeked.
            match self.pages.next_page_for_serial(&mut self.reader, serial) {
                Ok(_) => (),
                _ => {
                    // No more pages for the stream from the mid-point onwards.
                    debug!(
                        "seek: bisect step: byte_range=[{}, {}, {}]",
                        start_byte_pos, mid_byte_pos, end_byte_pos,
                    );

                    end_byte_pos = mid_byte_pos;
                    continue;
                }
            }

            // Probe the page to get the start and end timestamp.
            let stream = self.streams.get_mut(&serial).unwrap();

            let (start_ts, end_ts) = stream.inspect_page(&self.pages.page());

            debug!(
                "seek: bisect step: page={{ start_ts={}, end_ts={} }} byte_range=[{}, {}, {}]",
                start_ts, end_ts, start_byte_pos, mid_byte_pos, end_byte_pos,
            );

            if required_ts < start_ts {
                // The required timestamp is less-than the timestamp of the first sample in
                // the page. Update the upper bound and bisect again.
                end_byte_pos = mid_byte_pos;
            }
            else if required_ts > end_ts {
                // The required timestamp is greater-than the timestamp of the final sample
                // in the page. Update the lower bound and bisect again.
                start_byte_pos = mid_byte_pos;
            }
            else {
                // The sample with the required timestamp is contained in the page. The
                // bisection has converged on the correct page so stop the bisection.
                start_byte_pos = mid_byte_pos;
                end_byte_pos = mid_byte_pos;
                break;
            }
        }

        // If the bisection did not converge, then the linear search must continue from the
        // lower-bound (start) position of what would've been the next iteration of bisection.
        if start_byte_pos != end_byte_pos {
            self.reader.seek(SeekFrom::Start(start_byte_pos))?;

            match self.pages.next_page_for_serial(&mut self.reader, serial) {
                Ok(_) => (),
                _ => return seek_error(SeekErrorKind::OutOfRange),
            }
        }

        // Reset all logical bitstreams since the physical stream will be reading from a new
        // location now.
        for (&s, stream) in self.streams.iter_mut() {
            stream.reset();

            // Read in the current page since it contains our timestamp.
            if s == serial {
                stream.read_page(&self.pages.page())?;
            }
        }

        Ok(())
    }

    fn start_new_physical_stream(&mut self) -> Result<()> {
        // This function is entered with the page reader holding a beginning-of-stream page.
        assert!(self.pages.header().is_first_page);

        info!("starting new physical stream");

        // An OGG physical stream opens with three runs of pages: one beginning-of-stream page
        // per logical stream, each carrying only that stream's identification packet, then the
        // remaining header packets of every stream, then the data pages.
        //
        // Walk the beginning-of-stream pages first, selecting a mapper for each stream based on
        // its identification packet.
        let mut streams = BTreeMap::<u32, LogicalStream>::new();

        let mut data_start_pos = self.reader.pos();

        while self.pages.header().is_first_page {
            let serial = self.pages.header().serial;

            data_start_pos = self.reader.pos();

            if let Some(ident) = self.pages.first_packet() {
                if let Some(mapper) = mappings::detect(ident)? {
                    info!("serial={:#x} is a {} bitstream", serial, mapper.name());

                    streams.insert(serial, LogicalStream::new(mapper));
                }
            }

            self.pages.try_next_page(&mut self.reader)?;
        }

        // Now feed pages to the logical streams until one of them yields a data packet, which
        // marks the end of the header run. Header packets surface tags and other side data
        // along the way.
        loop {
            let page = self.pages.page();

            if let Some(stream) = streams.get_mut(&page.header.serial) {
                for data in stream.read_page(&page)? {
                    match data {
                        SideData::Metadata(rev) => self.metadata.push(rev),
                    }
                }

                if stream.has_packets() {
                    break;
                }
            }

            // The page held only headers, so the data region cannot start before the next page.
            data_start_pos = self.reader.pos();

            self.pages.try_next_page(&mut self.reader)?;
        }

        // With the headers consumed, determine the starting timestamp of each stream, and, when
        // the source allows it, the stream durations and the byte extent of the physical
        // stream.
        physical::probe_stream_start(&mut self.reader, &mut self.pages, &mut streams);

        let mut data_end_pos = None;

        if self.reader.is_seekable() {
            if let Some(total_len) = self.reader.byte_len() {
                data_end_pos = physical::probe_stream_end(
                    &mut self.reader,
                    &mut self.pages,
                    &mut streams,
                    data_start_pos,
                    total_len,
                )?;
            }
        }

        // Finally, publish one track per logical stream and swap in the new stream set.
        self.tracks.clear();

        for (&serial, stream) in streams.iter() {
            if !stream.is_ready() {
                warn!("serial={:#x} headers incomplete", serial);
            }

            self.tracks.push(Track::new(serial, stream.codec_params().clone()));
        }

        self.streams = streams;
        self.phys_byte_range_start = data_start_pos;
        self.phys_byte_range_end = data_end_pos;

        Ok(())
    }
}

impl FormatReader for OggReader {
    fn try_new(mut source: MediaSourceStream, _options: &FormatOptions) -> Result<Self> {
        // Resynchronization and probing rewind by up-to one page, so the stream must be able to
        // seek back over the largest possible page.
        source.ensure_seekback_buffer(OGG_PAGE_MAX_SIZE);

        let pages = PageReader::try_new(&mut source)?;

        if !pages.header().is_first_page {
            return unsupported_error("ogg: page is not marked as first");
        }

        let mut ogg = OggReader {
            reader: source,
            tracks: Default::default(),
            metadata: Default::default(),
            streams: Default::default(),
            pages,
            phys_byte_range_start: 0,
            phys_byte_range_end: None,
        };

        ogg.start_new_physical_stream()?;

        Ok(ogg)
    }

    fn next_packet(&mut self) -> Result<Packet> {
        self.next_logical_packet()
    }

    fn metadata(&mut self) -> Metadata<'_> {
        self.metadata.metadata()
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn seek(&mut self, _mode: SeekMode, to: SeekTo) -> Result<SeekedTo> {
        // Seeking needs random access, and a known byte extent for the physical stream.
        if !self.reader.is_seekable() || self.phys_byte_range_end.is_none() {
            return seek_error(SeekErrorKind::Unseekable);
        }

        // Resolve the request to a logical stream and a frame timestamp within it.
        let (serial, required_ts) = match to {
            SeekTo::TimeStamp { ts, track_id } => (track_id, ts),
            SeekTo::Time { time, track_id } => {
                // Without an explicit track, the default track is seeked.
                let serial =
                    match track_id.or_else(|| self.default_track().map(|track| track.id)) {
                        Some(serial) => serial,
                        None => return seek_error(SeekErrorKind::Unseekable),
                    };

                // The time converts to a frame timestamp through the track's sample rate.
                let params = match self.streams.get(&serial) {
                    Some(stream) => stream.codec_params(),
                    None => return seek_error(SeekErrorKind::InvalidTrack),
                };

                let ts = match params.sample_rate {
                    Some(sample_rate) => TimeBase::new(1, sample_rate).calc_timestamp(time),
                    None => return seek_error(SeekErrorKind::Unseekable),
                };

                (serial, ts)
            }
        };

        // The timestamp must fall within the bounds of the stream being seeked.
        let params = match self.streams.get(&serial) {
            Some(stream) => stream.codec_params(),
            None => return seek_error(SeekErrorKind::InvalidTrack),
        };

        if required_ts < params.start_ts {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        if let Some(n_frames) = params.n_frames {
            if required_ts > params.start_ts + n_frames {
                return seek_error(SeekErrorKind::OutOfRange);
            }
        }

        debug!("seeking track={:#x} to frame_ts={}", serial, required_ts);

        self.do_seek(serial, required_ts)
    }

    fn into_inner(self: Box<Self>) -> MediaSourceStream {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use cantata_core::codecs::CODEC_TYPE_OPUS;
    use cantata_core::errors::Error;
    use cantata_core::formats::{FormatOptions, FormatReader};
    use cantata_core::io::MediaSourceStream;

    use super::super::testutil::build_page;
    use super::OggReader;

    #[test]
    fn verify_open_identifies_stream() {
        // A minimal physical stream encapsulating a recognized, but unsupported, codec: an
        // identification page, one data page, and a final data page.
        let ident = b"OpusHead\x01\x02\x38\x01\x80\xbb\x00\x00\x00\x00\x00".to_vec();

        let mut data = build_page(0x900d, 0, 0, 0x02, &[&ident], false);
        data.extend(build_page(0x900d, 1, 960, 0, &[&[0xaau8; 40][..]], false));
        data.extend(build_page(0x900d, 2, 1920, 0x04, &[&[0xbbu8; 40][..]], false));

        let stream = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut reader = OggReader::try_new(stream, &FormatOptions::default()).unwrap();

        let tracks = reader.tracks();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 0x900d);
        assert_eq!(tracks[0].codec_params.codec, CODEC_TYPE_OPUS);

        // Both data packets must be demultiplexed, after which the stream ends.
        let packet = reader.next_packet().unwrap();
        assert_eq!(packet.track_id(), 0x900d);
        assert_eq!(packet.buf(), &[0xaau8; 40][..]);

        let packet = reader.next_packet().unwrap();
        assert_eq!(packet.buf(), &[0xbbu8; 40][..]);

        assert!(matches!(reader.next_packet(), Err(Error::IoError(_))));
    }

    #[test]
    fn verify_open_rejects_non_ogg() {
        let data = vec![0x55u8; 4096];

        let stream = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        assert!(OggReader::try_new(stream, &FormatOptions::default()).is_err());
    }
}
