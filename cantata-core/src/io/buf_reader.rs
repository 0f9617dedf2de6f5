// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use super::{FiniteStream, ReadBytes};

#[inline(always)]
fn underrun_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "buffer underrun"))
}

/// A `BufReader` reads bytes from an in-memory byte slice.
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    /// Instantiate a new `BufReader` over the given byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        BufReader { buf, pos: 0 }
    }

    /// Take the next `count` bytes off the front of the unread region, or error if fewer remain.
    #[inline(always)]
    fn take(&mut self, count: usize) -> io::Result<&'a [u8]> {
        let end = match self.pos.checked_add(count) {
            Some(end) if end <= self.buf.len() => end,
            _ => return underrun_error(),
        };

        let slice = &self.buf[self.pos..end];
        self.pos = end;

        Ok(slice)
    }

    /// Consumes and returns the entire unread region of the underlying byte slice.
    ///
    /// The returned slice borrows from the underlying buffer directly, so it remains usable
    /// after the `BufReader` itself is dropped.
    pub fn read_buf_bytes_available_ref(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

impl<'a> ReadBytes for BufReader<'a> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(self.take(2)?);
        Ok(bytes)
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(bytes)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // A short read stops at the end of the underlying slice.
        let count = buf.len().min(self.buf.len() - self.pos);

        buf[..count].copy_from_slice(&self.buf[self.pos..self.pos + count]);
        self.pos += count;

        Ok(count)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        buf.copy_from_slice(self.take(buf.len())?);
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        self.take(count as usize).map(|_| ())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.pos as u64
    }
}

impl<'a> FiniteStream for BufReader<'a> {
    #[inline(always)]
    fn byte_len(&self) -> u64 {
        self.buf.len() as u64
    }

    #[inline(always)]
    fn bytes_read(&self) -> u64 {
        self.pos as u64
    }

    #[inline(always)]
    fn bytes_available(&self) -> u64 {
        (self.buf.len() - self.pos) as u64
    }
}
