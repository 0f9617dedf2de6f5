// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable bit- and byte-level I/O.
//!
//! Byte-oriented readers implement [`ReadBytes`]. The usual arrangement stacks them: a
//! [`MediaSourceStream`] buffers the raw source, a [`MonitorStream`] or [`ScopedStream`] wraps
//! it to checksum or bound a region, and a [`BufReader`] or [`BitReaderRtl`] consumes slices
//! that were pulled out of the stack.

use std::io;

mod bit;
mod buf_reader;
mod media_source_stream;
mod monitor_stream;
mod scoped_stream;

pub mod vlc;

pub use bit::*;
pub use buf_reader::BufReader;
pub use media_source_stream::{MediaSourceStream, MediaSourceStreamOptions};
pub use monitor_stream::{Monitor, MonitorStream};
pub use scoped_stream::ScopedStream;

/// `MediaSource` is the trait a byte source must implement to feed a [`MediaSourceStream`]: the
/// standard [`io::Read`] and [`io::Seek`] combined with runtime capability queries.
///
/// Every source must provide a `Seek` implementation, but actual support for seeking is
/// optional and advertised through [`MediaSource::is_seekable`].
pub trait MediaSource: io::Read + io::Seek + Send + Sync {
    /// Returns if the source supports random access. May be expensive to query.
    fn is_seekable(&self) -> bool;

    /// Returns the total length of the source in bytes, if known. May be expensive to query.
    fn byte_len(&self) -> Option<u64>;
}

impl MediaSource for std::fs::File {
    fn is_seekable(&self) -> bool {
        // A regular file supports random access, but the file descriptor may also name a pipe
        // or other special file that does not. The distinction comes from the file's metadata
        // (which follows symlinks), so cache the answer if it is needed often.
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    fn byte_len(&self) -> Option<u64> {
        self.metadata().ok().map(|metadata| metadata.len())
    }
}

impl<T: std::convert::AsRef<[u8]> + Send + Sync> MediaSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        // An in-memory cursor can always seek.
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// `ReadOnlySource` adapts any [`io::Read`] into an unseekable [`MediaSource`].
pub struct ReadOnlySource<R: io::Read> {
    inner: R,
}

impl<R: io::Read + Send> ReadOnlySource<R> {
    /// Wraps the provided `Read`er.
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }

    /// Gets a reference to the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps and returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read + Send + Sync> MediaSource for ReadOnlySource<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

impl<R: io::Read> io::Read for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: io::Read> io::Seek for ReadOnlySource<R> {
    fn seek(&mut self, _: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Other, "source does not support seeking"))
    }
}

/// `ReadBytes` is the byte-level read interface: primitives for small fixed-size reads, bulk
/// reads, and little- and big-endian integer decoding on top of them.
///
/// Unlike [`io::Read`], exhausting the source mid-read is always reported as an error.
pub trait ReadBytes {
    /// Reads one byte.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Reads two bytes in stream order.
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]>;

    /// Reads four bytes in stream order.
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]>;

    /// Reads as many bytes as fit in `buf`, returning how many were read.
    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Fills `buf` completely or fails.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Reads one unsigned byte.
    #[inline(always)]
    fn read_u8(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    /// Reads a little-endian 16-bit unsigned integer.
    #[inline(always)]
    fn read_u16(&mut self) -> io::Result<u16> {
        Ok(u16::from_le_bytes(self.read_double_bytes()?))
    }

    /// Reads a big-endian 16-bit unsigned integer.
    #[inline(always)]
    fn read_be_u16(&mut self) -> io::Result<u16> {
        Ok(u16::from_be_bytes(self.read_double_bytes()?))
    }

    /// Reads a little-endian 32-bit unsigned integer.
    #[inline(always)]
    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads a big-endian 32-bit unsigned integer.
    #[inline(always)]
    fn read_be_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_be_bytes(self.read_quad_bytes()?))
    }

    /// Reads a little-endian 64-bit unsigned integer.
    #[inline(always)]
    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads exactly `len` bytes into a freshly allocated boxed slice.
    fn read_boxed_slice_exact(&mut self, len: usize) -> io::Result<Box<[u8]>> {
        let mut buf = vec![0u8; len];
        self.read_buf_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    /// Skips over `count` bytes.
    fn ignore_bytes(&mut self, count: u64) -> io::Result<()>;

    /// Gets the current position of the stream.
    fn pos(&self) -> u64;
}

impl<R: ReadBytes> ReadBytes for &mut R {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        (*self).read_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        (*self).read_double_bytes()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        (*self).read_quad_bytes()
    }

    #[inline(always)]
    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (*self).read_buf(buf)
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (*self).read_buf_exact(buf)
    }

    #[inline(always)]
    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        (*self).ignore_bytes(count)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

/// `SeekBuffered` is implemented by streams that retain a window of consumed data, and allows
/// repositioning within that window without involving the underlying source.
pub trait SeekBuffered {
    /// Guarantees that, once `len` bytes have been read, at least `len` bytes of consumed data
    /// remain available for backwards seeking.
    fn ensure_seekback_buffer(&mut self, len: usize);

    /// The number of buffered bytes not yet consumed, i.e. the forward seeking allowance.
    fn unread_buffer_len(&self) -> usize;

    /// The number of consumed bytes still buffered, i.e. the backwards seeking allowance.
    fn read_buffer_len(&self) -> usize;

    /// Repositions to an absolute stream position within the buffered window, returning the
    /// position actually reached.
    fn seek_buffered(&mut self, pos: u64) -> u64;

    /// Repositions relative to the current position, clamped to the buffered window, returning
    /// the position actually reached.
    fn seek_buffered_rel(&mut self, delta: isize) -> u64;

    /// Repositions backwards by `delta` bytes within the buffered window.
    fn seek_buffered_rev(&mut self, delta: usize) {
        assert!(delta < isize::MAX as usize);
        self.seek_buffered_rel(-(delta as isize));
    }
}

impl<S: SeekBuffered> SeekBuffered for &mut S {
    fn ensure_seekback_buffer(&mut self, len: usize) {
        (*self).ensure_seekback_buffer(len)
    }

    fn unread_buffer_len(&self) -> usize {
        (**self).unread_buffer_len()
    }

    fn read_buffer_len(&self) -> usize {
        (**self).read_buffer_len()
    }

    fn seek_buffered(&mut self, pos: u64) -> u64 {
        (*self).seek_buffered(pos)
    }

    fn seek_buffered_rel(&mut self, delta: isize) -> u64 {
        (*self).seek_buffered_rel(delta)
    }
}

/// `FiniteStream` is implemented by streams with a known, fixed byte length.
pub trait FiniteStream {
    /// The total length of the stream in bytes.
    fn byte_len(&self) -> u64;

    /// The number of bytes consumed so far.
    fn bytes_read(&self) -> u64;

    /// The number of bytes left to consume.
    fn bytes_available(&self) -> u64;
}
