// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cantata is a pure Rust OGG Vorbis decoding suite.
//!
//! This crate provides [`OggVorbisReader`], a streaming decoder that pulls interleaved `f32`
//! samples from an OGG encapsulated Vorbis bitstream. The underlying demuxer
//! (`cantata-format-ogg`) and decoder (`cantata-codec-vorbis`) crates may also be used directly
//! for finer control.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//!
//! use cantata::OggVorbisReader;
//!
//! let file = File::open("media/sample.ogg").expect("failed to open media");
//!
//! let mut reader = OggVorbisReader::try_new(Box::new(file)).expect("failed to open stream");
//!
//! let mut samples = vec![0.0f32; 4096 * reader.channels()];
//!
//! loop {
//!     let count = reader.read(&mut samples).expect("decode error");
//!
//!     if count == 0 {
//!         break;
//!     }
//!
//!     // Do something with &samples[..count * reader.channels()].
//! }
//! ```

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use cantata_core as core;

mod reader;

pub use reader::{OggVorbisReader, Tags};

use cantata_core::errors::Result;
use cantata_core::io::MediaSource;

/// Opens the provided `MediaSource` as an OGG Vorbis stream.
///
/// This is a convenience wrapper over [`OggVorbisReader::try_new`].
pub fn open(source: Box<dyn MediaSource>) -> Result<OggVorbisReader> {
    OggVorbisReader::try_new(source)
}
