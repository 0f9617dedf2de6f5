// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;

use super::{FiniteStream, ReadBytes};

#[inline(always)]
fn out_of_bounds_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "out of bounds"))
}

/// A `ScopedStream` caps how many bytes may be read from the stream it wraps. Reads past the
/// cap fail as if the stream had ended.
pub struct ScopedStream<B: ReadBytes> {
    inner: B,
    start: u64,
    len: u64,
    read: u64,
}

impl<B: ReadBytes> ScopedStream<B> {
    /// Instantiates a new `ScopedStream` allowing up-to `len` bytes to be read from `inner`.
    pub fn new(inner: B, len: u64) -> Self {
        ScopedStream { start: inner.pos(), inner, len, read: 0 }
    }

    /// Skips whatever remains of the scoped region.
    pub fn ignore(&mut self) -> io::Result<()> {
        self.inner.ignore_bytes(self.len - self.read)
    }

    /// Unwraps the `ScopedStream`, returning the wrapped stream.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: ReadBytes> ReadBytes for ScopedStream<B> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.len - self.read < 1 {
            return out_of_bounds_error();
        }

        self.read += 1;
        self.inner.read_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        if self.len - self.read < 2 {
            return out_of_bounds_error();
        }

        self.read += 2;
        self.inner.read_double_bytes()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        if self.len - self.read < 4 {
            return out_of_bounds_error();
        }

        self.read += 4;
        self.inner.read_quad_bytes()
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max_read_len = cmp::min(buf.len() as u64, self.len - self.read) as usize;

        let len = self.inner.read_buf(&mut buf[..max_read_len])?;
        self.read += len as u64;

        Ok(len)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.len - self.read < buf.len() as u64 {
            return out_of_bounds_error();
        }

        self.read += buf.len() as u64;
        self.inner.read_buf_exact(buf)
    }

    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        if self.len - self.read < count {
            return out_of_bounds_error();
        }

        self.read += count;
        self.inner.ignore_bytes(count)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.inner.pos()
    }
}

impl<B: ReadBytes> FiniteStream for ScopedStream<B> {
    #[inline(always)]
    fn byte_len(&self) -> u64 {
        self.len
    }

    #[inline(always)]
    fn bytes_read(&self) -> u64 {
        self.read
    }

    #[inline(always)]
    fn bytes_available(&self) -> u64 {
        self.len - self.read
    }
}

impl<B: ReadBytes + super::SeekBuffered> super::SeekBuffered for ScopedStream<B> {
    fn ensure_seekback_buffer(&mut self, len: usize) {
        self.inner.ensure_seekback_buffer(len)
    }

    fn unread_buffer_len(&self) -> usize {
        self.inner.unread_buffer_len()
    }

    fn read_buffer_len(&self) -> usize {
        self.inner.read_buffer_len()
    }

    fn seek_buffered(&mut self, pos: u64) -> u64 {
        let pos = self.inner.seek_buffered(pos);

        // Update the scoped read count to account for the seek.
        self.read = pos.saturating_sub(self.start);

        pos
    }

    fn seek_buffered_rel(&mut self, delta: isize) -> u64 {
        let pos = self.inner.seek_buffered_rel(delta);

        // Update the scoped read count to account for the seek.
        self.read = pos.saturating_sub(self.start);

        pos
    }
}
