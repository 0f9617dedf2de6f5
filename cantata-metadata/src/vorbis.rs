// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A Vorbis COMMENT metadata reader for FLAC or OGG formats.

use cantata_core::errors::Result;
use cantata_core::io::ReadBytes;
use cantata_core::meta::{MetadataBuilder, Tag};

use log::warn;

/// Parse a string containing a Vorbis Comment into a `Tag`.
fn parse(tag: &str) -> Tag {
    // Vorbis Comments are stored as <key>=<value> pairs where <key> is a reduced ASCII-only
    // identifier and <value> is a UTF-8 string value.
    match tag.split_once('=') {
        Some((key, value)) => Tag::new(key, value),
        // Empty value field.
        None => Tag::new(tag, ""),
    }
}

/// Read a Vorbis Comment metadata block, with the final framing bit omitted, as is the case for
/// comment blocks embedded in container or codec headers.
pub fn read_comment_no_framing<B: ReadBytes>(
    reader: &mut B,
    metadata: &mut MetadataBuilder,
) -> Result<()> {
    // Read the vendor string length in bytes.
    let vendor_length = reader.read_u32()?;

    // Read the vendor string.
    let vendor_string_bytes = reader.read_boxed_slice_exact(vendor_length as usize)?;
    let vendor_string = String::from_utf8_lossy(&vendor_string_bytes).into_owned();

    metadata.add_vendor(vendor_string);

    // Read the number of comments.
    let n_comments = reader.read_u32()? as usize;

    for _ in 0..n_comments {
        // Read the comment string length in bytes.
        let comment_length = reader.read_u32()?;

        // Read the comment string.
        let comment_bytes = reader.read_boxed_slice_exact(comment_length as usize)?;

        // Parse the comment string into a Tag and insert it into the parsed tag list.
        match std::str::from_utf8(&comment_bytes) {
            Ok(comment) => {
                metadata.add_tag(parse(comment));
            }
            Err(_) => warn!("comment is not valid utf-8"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use cantata_core::io::BufReader;
    use cantata_core::meta::MetadataBuilder;

    use super::read_comment_no_framing;

    fn make_comment_block(vendor: &str, comments: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        buf.extend_from_slice(vendor.as_bytes());
        buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());

        for comment in comments {
            buf.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            buf.extend_from_slice(comment.as_bytes());
        }

        buf
    }

    #[test]
    fn verify_read_comment() {
        let block = make_comment_block(
            "Xiph.Org libVorbis I 20200704 (Reducing Environment)",
            &["TITLE=A Quiet Place", "ARTIST=Nobody", "strange"],
        );

        let mut builder = MetadataBuilder::new();

        read_comment_no_framing(&mut BufReader::new(&block), &mut builder).unwrap();

        let rev = builder.metadata();

        assert_eq!(rev.vendor(), Some("Xiph.Org libVorbis I 20200704 (Reducing Environment)"));

        let tags = rev.tags();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].key, "TITLE");
        assert_eq!(tags[0].value, "A Quiet Place");
        assert_eq!(tags[1].key, "ARTIST");
        assert_eq!(tags[1].value, "Nobody");
        assert_eq!(tags[2].key, "strange");
        assert_eq!(tags[2].value, "");
    }
}
