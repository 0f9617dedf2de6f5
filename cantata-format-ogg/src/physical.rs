// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery of the timing bounds and byte extent of a physical stream.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Seek, SeekFrom};

use cantata_core::errors::Result;
use cantata_core::io::{MediaSourceStream, ReadBytes, ScopedStream, SeekBuffered};

use super::logical::LogicalStream;
use super::page::*;

use log::debug;

/// Determine the starting timestamp of every logical stream by examining the first data page of
/// each.
///
/// On entry the page reader must hold the first data page of the physical stream. The look-ahead
/// is bounded by the seekback allowance, and the reader is returned to its entry position
/// afterwards.
pub fn probe_stream_start(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    streams: &mut BTreeMap<u32, LogicalStream>,
) {
    let original_pos = reader.pos();

    // Cap the look-ahead so the rewind below stays within buffered data.
    let mut scoped_reader = ScopedStream::new(reader, OGG_PAGE_MAX_SIZE as u64);

    let mut probed = BTreeSet::<u32>::new();

    loop {
        let page = pages.page();
        let serial = page.header.serial;

        match streams.get_mut(&serial) {
            Some(stream) => {
                // Only the first page seen for a stream is its starting page.
                if probed.insert(serial) {
                    stream.inspect_start_page(&page);
                }
            }
            // A page belonging to no known stream means a new physical stream began.
            None => break,
        }

        // Stop once every stream was seen, or when the look-ahead is exhausted.
        if probed.len() == streams.len() || pages.try_next_page(&mut scoped_reader).is_err() {
            break;
        }
    }

    scoped_reader.into_inner().seek_buffered(original_pos);
}

/// Determine the total frame count of every logical stream, and the byte position at which the
/// physical stream ends, by examining its final pages.
///
/// The reader is returned to its entry position afterwards.
pub fn probe_stream_end(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    streams: &mut BTreeMap<u32, LogicalStream>,
    byte_range_start: u64,
    byte_range_end: u64,
) -> Result<Option<u64>> {
    let original_pos = reader.pos();

    // A window of one maximum-sized page per logical stream is guaranteed to contain the final
    // page of each if the physical stream runs to `byte_range_end`. Scanning just that window
    // covers the common, unchained, case in one pass.
    let window = (streams.len() * OGG_PAGE_MAX_SIZE) as u64;

    let scan_from = if byte_range_end - byte_range_start > window {
        byte_range_end - window
    }
    else {
        byte_range_start
    };

    reader.seek(SeekFrom::Start(scan_from))?;

    pages.next_page(reader)?;

    let mut end = scan_physical_end(reader, pages, streams, byte_range_end);

    if end.is_none() {
        // None of this stream's pages appear near `byte_range_end`, so another physical stream
        // must be chained after it. Bisect the byte range for the boundary, then scan forward
        // from just below it.
        debug!("physical stream is chained, bisecting for its end");

        let mut lo = byte_range_start;
        let mut hi = byte_range_end;

        while hi - lo >= window {
            let mid = lo + (hi - lo) / 2;

            reader.seek(SeekFrom::Start(mid))?;

            if pages.next_page(reader).is_err() {
                break;
            }

            if streams.contains_key(&pages.header().serial) {
                lo = mid;
            }
            else {
                hi = mid;
            }
        }

        reader.seek(SeekFrom::Start(lo))?;

        pages.next_page(reader)?;

        end = scan_physical_end(reader, pages, streams, hi);
    }

    reader.seek(SeekFrom::Start(original_pos))?;

    Ok(end)
}

/// Walk pages forward from the page currently held by the page reader, feeding each to its
/// stream's end-page inspection. Returns the position just past the last page belonging to the
/// probed physical stream, if any were seen.
fn scan_physical_end(
    reader: &mut MediaSourceStream,
    pages: &mut PageReader,
    streams: &mut BTreeMap<u32, LogicalStream>,
    limit: u64,
) -> Option<u64> {
    let mut end = None;

    loop {
        let page = pages.page();

        // The physical stream ends where the pages of its logical streams do.
        let stream = match streams.get_mut(&page.header.serial) {
            Some(stream) => stream,
            None => break,
        };

        stream.inspect_end_page(&page);

        end = Some(reader.pos());

        if reader.pos() >= limit || pages.try_next_page(reader).is_err() {
            break;
        }
    }

    end
}
