// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::io::{Read, Seek};

use super::SeekBuffered;
use super::{MediaSource, ReadBytes};

#[inline(always)]
fn end_of_stream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
}

/// `MediaSourceStreamOptions` specifies the buffering behaviour of a `MediaSourceStream`.
pub struct MediaSourceStreamOptions {
    /// The total size of the ring buffer. Must be a power of 2 and larger than 32kB.
    pub buffer_len: usize,
}

impl Default for MediaSourceStreamOptions {
    fn default() -> Self {
        MediaSourceStreamOptions { buffer_len: 64 * 1024 }
    }
}

/// `MediaSourceStream` is the buffered reader connecting a [`MediaSource`] to the rest of
/// Cantata.
///
/// All data is staged through a power-of-two ring buffer serving two purposes. First, it
/// amortizes the cost of small reads against the type-erased source: the stream reads ahead in
/// blocks that start at 1kB and double up-to 32kB as consumption proves to be sequential.
/// Second, bytes that were already consumed are retained until the ring wraps around onto them,
/// which allows bounded backwards seeking without touching the source. This is what makes
/// resynchronization and packet re-reading possible over pipes and other unseekable sources.
///
/// An explicit `seek()` on the source discards the buffered history.
pub struct MediaSourceStream {
    /// The source reader.
    inner: Box<dyn MediaSource>,
    /// The staging ring buffer and its power-of-two index mask.
    ring: Box<[u8]>,
    ring_mask: usize,
    /// Ring index of the next byte to be consumed.
    read_pos: usize,
    /// Ring index one past the last byte fetched from the source.
    write_pos: usize,
    /// The size of the next read-ahead block.
    block_len: usize,
    /// Number of bytes pulled from the source since instantiation or the last seek.
    fetched: u64,
    /// Absolute stream position corresponding to `write_pos`.
    abs_pos: u64,
}

impl MediaSourceStream {
    const MIN_BLOCK_LEN: usize = 1024;
    const MAX_BLOCK_LEN: usize = 32 * 1024;

    pub fn new(source: Box<dyn MediaSource>, options: MediaSourceStreamOptions) -> Self {
        // The ring must be a power-of-two for the index mask to work, and must exceed the
        // largest read-ahead block or a fetch could overwrite unread data.
        assert!(options.buffer_len.is_power_of_two());
        assert!(options.buffer_len > Self::MAX_BLOCK_LEN);

        MediaSourceStream {
            inner: source,
            ring: vec![0; options.buffer_len].into_boxed_slice(),
            ring_mask: options.buffer_len - 1,
            read_pos: 0,
            write_pos: 0,
            block_len: Self::MIN_BLOCK_LEN,
            fetched: 0,
            abs_pos: 0,
        }
    }

    /// Returns `true` if every fetched byte has been consumed.
    #[inline(always)]
    fn is_exhausted(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Pull the next read-ahead block from the source if the unread region is empty. Reads stop
    /// at the physical end of the ring, the following fetch continues at the front.
    fn fetch(&mut self) -> io::Result<()> {
        if !self.is_exhausted() {
            return Ok(());
        }

        let limit = self.block_len.min(self.ring.len() - self.write_pos);

        let count = loop {
            match self.inner.read(&mut self.ring[self.write_pos..self.write_pos + limit]) {
                Ok(count) => break count,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        };

        self.write_pos = (self.write_pos + count) & self.ring_mask;
        self.abs_pos += count as u64;
        self.fetched += count as u64;

        // Sequential consumption earns a larger read-ahead block.
        self.block_len = (self.block_len << 1).min(Self::MAX_BLOCK_LEN);

        Ok(())
    }

    /// Like `fetch`, but an empty unread region after fetching is an end-of-stream error.
    fn fetch_or_eof(&mut self) -> io::Result<()> {
        self.fetch()?;

        if self.is_exhausted() {
            return end_of_stream_error();
        }

        Ok(())
    }

    /// Advance the read position by `count` consumed bytes.
    #[inline(always)]
    fn consume(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count) & self.ring_mask;
    }

    /// The longest contiguous run of unread bytes starting at the read position.
    #[inline(always)]
    fn contiguous_unread(&self) -> &[u8] {
        if self.write_pos >= self.read_pos {
            &self.ring[self.read_pos..self.write_pos]
        }
        else {
            &self.ring[self.read_pos..]
        }
    }

    /// Read a fixed number of bytes into an array, refilling the ring as needed.
    #[inline(always)]
    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut bytes = [0u8; N];

        let unread = self.contiguous_unread();

        if unread.len() >= N {
            bytes.copy_from_slice(&unread[..N]);
            self.consume(N);
        }
        else {
            // The run is interrupted by a refill or the ring edge. Fall back to single bytes.
            for byte in bytes.iter_mut() {
                *byte = self.read_byte()?;
            }
        }

        Ok(bytes)
    }

    /// Discard all buffered state and restart at the given absolute position.
    fn invalidate(&mut self, pos: u64) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.block_len = Self::MIN_BLOCK_LEN;
        self.fetched = 0;
        self.abs_pos = pos;
    }
}

impl MediaSource for MediaSourceStream {
    #[inline]
    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    #[inline]
    fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }
}

impl io::Read for MediaSourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;

        while written < buf.len() {
            self.fetch()?;

            let unread = self.contiguous_unread();

            if unread.is_empty() {
                break;
            }

            let count = unread.len().min(buf.len() - written);

            buf[written..written + count].copy_from_slice(&unread[..count]);

            self.consume(count);
            written += count;
        }

        Ok(written)
    }
}

impl io::Seek for MediaSourceStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            io::SeekFrom::Current(0) => return Ok(self.pos()),
            io::SeekFrom::Current(delta) => {
                // The source sits ahead of the stream by the unread portion of the ring, so a
                // relative seek must be rebased onto the source's own position.
                let rebased = delta - self.unread_buffer_len() as i64;
                self.inner.seek(io::SeekFrom::Current(rebased))
            }
            _ => self.inner.seek(pos),
        }?;

        self.invalidate(pos);

        Ok(pos)
    }
}

impl ReadBytes for MediaSourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.is_exhausted() {
            self.fetch_or_eof()?;
        }

        let byte = self.ring[self.read_pos];
        self.consume(1);

        Ok(byte)
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        self.read_array()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        self.read_array()
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.read(buf)?;

        // A `ReadBytes` source signals end-of-stream as an error rather than a 0-length read.
        if count == 0 && !buf.is_empty() {
            return end_of_stream_error();
        }

        Ok(count)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        // `read` only returns short when the source is exhausted.
        if self.read(buf)? != buf.len() {
            return end_of_stream_error();
        }

        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        let ring_len = self.ring.len() as u64;

        // For very large skips on a seekable source, seek directly. Stop short by one full ring
        // so that the tail of the skipped region is fetched and remains rewindable like any
        // consumed data.
        while count >= 2 * ring_len && self.is_seekable() {
            let skip = (count - ring_len).min(i64::MAX as u64);
            self.seek(io::SeekFrom::Current(skip as i64))?;
            count -= skip;
        }

        // Consume the remainder through the ring.
        while count > 0 {
            self.fetch_or_eof()?;

            let discard = (self.unread_buffer_len() as u64).min(count);

            self.consume(discard as usize);
            count -= discard;
        }

        Ok(())
    }

    fn pos(&self) -> u64 {
        self.abs_pos - self.unread_buffer_len() as u64
    }
}

impl SeekBuffered for MediaSourceStream {
    fn ensure_seekback_buffer(&mut self, len: usize) {
        // A fetch may overwrite up-to MAX_BLOCK_LEN bytes of history, so guaranteeing `len`
        // bytes of seekback requires that much headroom on top, rounded up to the ring's
        // power-of-two invariant.
        let required = (Self::MAX_BLOCK_LEN + len).next_power_of_two();

        if self.ring.len() >= required {
            return;
        }

        let mut ring = vec![0u8; required].into_boxed_slice();

        // Relocate the unread region to the front of the new ring. Consumed history is not
        // carried over.
        let (seg0, seg1) = if self.write_pos >= self.read_pos {
            (&self.ring[self.read_pos..self.write_pos], &self.ring[..0])
        }
        else {
            (&self.ring[self.read_pos..], &self.ring[..self.write_pos])
        };

        ring[..seg0.len()].copy_from_slice(seg0);
        ring[seg0.len()..seg0.len() + seg1.len()].copy_from_slice(seg1);

        self.read_pos = 0;
        self.write_pos = seg0.len() + seg1.len();
        self.ring_mask = required - 1;
        self.ring = ring;

        // The relocation dropped the seekback history.
        self.fetched = self.write_pos as u64;
    }

    fn unread_buffer_len(&self) -> usize {
        // The ring is never completely full, so equal positions always mean empty.
        self.write_pos.wrapping_sub(self.read_pos) & self.ring_mask
    }

    fn read_buffer_len(&self) -> usize {
        // Everything fetched is rewindable until the ring wraps onto it.
        self.ring.len().min(self.fetched as usize) - self.unread_buffer_len()
    }

    fn seek_buffered(&mut self, pos: u64) -> u64 {
        let current = self.pos();

        let delta = if pos >= current {
            assert!(pos - current <= isize::MAX as u64);
            (pos - current) as isize
        }
        else {
            assert!(current - pos <= isize::MAX as u64);
            -((current - pos) as isize)
        };

        self.seek_buffered_rel(delta)
    }

    fn seek_buffered_rel(&mut self, delta: isize) -> u64 {
        if delta >= 0 {
            let forward = (delta as usize).min(self.unread_buffer_len());
            self.read_pos = (self.read_pos + forward) & self.ring_mask;
        }
        else {
            let backward = delta.unsigned_abs().min(self.read_buffer_len());
            self.read_pos = self.read_pos.wrapping_sub(backward) & self.ring_mask;
        }

        self.pos()
    }
}

#[cfg(test)]
mod tests {
    use super::{MediaSourceStream, ReadBytes, SeekBuffered};
    use std::io::Cursor;

    /// Deterministic xorshift32 test pattern.
    fn test_pattern(len: usize) -> Box<[u8]> {
        let mut state = 0x9e37_79b9u32;

        let mut bytes = Vec::with_capacity(len + 4);

        while bytes.len() < len {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            bytes.extend_from_slice(&state.to_le_bytes());
        }

        bytes.truncate(len);
        bytes.into_boxed_slice()
    }

    fn make_stream(data: Box<[u8]>) -> MediaSourceStream {
        MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default())
    }

    #[test]
    fn verify_reads_across_ring_wrap() {
        // Read far past the ring size with every read primitive and verify against the source
        // pattern. The odd offsets force reads to straddle block and ring boundaries.
        let data = test_pattern(400 * 1024);
        let mut stream = make_stream(data.clone());

        let mut expect = &data[..];

        for byte in &expect[..96 * 1024] {
            assert_eq!(*byte, stream.read_byte().unwrap());
        }

        stream.ignore_bytes(13).unwrap();
        expect = &expect[96 * 1024 + 13..];

        for pair in expect[..2 * 48 * 1024].chunks_exact(2) {
            assert_eq!(pair, &stream.read_double_bytes().unwrap());
        }

        stream.ignore_bytes(7).unwrap();
        expect = &expect[2 * 48 * 1024 + 7..];

        for quad in expect[..4 * 24 * 1024].chunks_exact(4) {
            assert_eq!(quad, &stream.read_quad_bytes().unwrap());
        }

        let mut tail = vec![0u8; 40 * 1024];
        stream.read_buf_exact(&mut tail).unwrap();
        assert_eq!(&tail[..], &expect[4 * 24 * 1024..4 * 24 * 1024 + 40 * 1024]);
    }

    #[test]
    fn verify_buffered_seeking() {
        let data = test_pattern(256 * 1024);
        let mut stream = make_stream(data.clone());

        assert_eq!(stream.unread_buffer_len(), 0);
        assert_eq!(stream.read_buffer_len(), 0);

        stream.ignore_bytes(7717).unwrap();

        assert_eq!(stream.pos(), 7717);
        assert_eq!(stream.read_buffer_len(), 7717);

        let marker = stream.read_byte().unwrap();

        // Rewind within the buffered history, then return, and verify the same byte comes back.
        assert_eq!(stream.seek_buffered_rel(-4000), 3718);
        assert_eq!(stream.pos(), 3718);

        assert_eq!(stream.seek_buffered(7717), 7717);
        assert_eq!(marker, stream.read_byte().unwrap());

        // A rewind past the buffered history is clamped to the oldest retained byte.
        stream.seek_buffered_rel(-1_000_000);
        assert_eq!(stream.pos(), 0);
        assert_eq!(stream.read_byte().unwrap(), data[0]);
    }
}
