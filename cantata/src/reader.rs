// Cantata
// Copyright (c) 2023-2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;

use cantata_core::codecs::{
    Decoder, DecoderOptions, CODEC_TYPE_FLAC, CODEC_TYPE_OGG_SKELETON, CODEC_TYPE_OPUS,
    CODEC_TYPE_SPEEX, CODEC_TYPE_THEORA, CODEC_TYPE_VORBIS,
};
use cantata_core::errors::{unsupported_error, Error, Result};
use cantata_core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use cantata_core::io::{MediaSource, MediaSourceStream};
use cantata_core::units::{Time, TimeBase};

use cantata_codec_vorbis::VorbisDecoder;
use cantata_format_ogg::OggReader;

use log::warn;

/// The limit samples are clamped to when sample clipping is enabled. This is the largest `f32`
/// value strictly less than 1.0.
const CLIP_LIMIT: f32 = 0.99999994;

/// The tags read from the stream's comment header.
#[derive(Clone, Debug, Default)]
pub struct Tags {
    vendor: Option<String>,
    comments: Vec<String>,
}

impl Tags {
    /// Gets the vendor string, if present.
    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    /// Gets all user comments as `KEY=value` entries.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }
}

/// A streaming OGG Vorbis decoder.
///
/// `OggVorbisReader` wraps an OGG demuxer and a Vorbis decoder, and pulls interleaved `f32`
/// sample frames from the first Vorbis logical stream of the physical stream.
pub struct OggVorbisReader {
    reader: OggReader,
    decoder: VorbisDecoder,
    track_id: u32,
    n_channels: usize,
    sample_rate: u32,
    start_ts: u64,
    n_frames: Option<u64>,
    max_bitrate: Option<u32>,
    nominal_bitrate: Option<u32>,
    min_bitrate: Option<u32>,
    tags: Tags,
    /// The read cursor within the last decoded buffer.
    buf_pos: usize,
    /// The timestamp of the next frame to be returned.
    pos_ts: u64,
    /// Following a seek, frames with a timestamp before this are quietly dropped.
    skip_to_ts: Option<u64>,
    clip_samples: bool,
    has_clipped: bool,
    is_eos: bool,
}

impl OggVorbisReader {
    /// Attempts to open the provided `MediaSource` as an OGG Vorbis stream.
    ///
    /// The container is probed and the three Vorbis header packets are consumed. If the physical
    /// stream does not encapsulate a Vorbis bitstream, an error naming the codec that was found
    /// is returned.
    pub fn try_new(source: Box<dyn MediaSource>) -> Result<OggVorbisReader> {
        let stream = MediaSourceStream::new(source, Default::default());

        let options = FormatOptions { enable_gapless: true };

        let mut reader = OggReader::try_new(stream, &options)?;

        // Select the first Vorbis track.
        let track = match reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec == CODEC_TYPE_VORBIS)
        {
            Some(track) => track.clone(),
            None => return Err(not_vorbis_error(reader.tracks())),
        };

        let decoder = VorbisDecoder::try_new(&track.codec_params, &DecoderOptions::default())?;

        let params = &track.codec_params;

        let n_channels = match params.channels {
            Some(channels) => channels.count(),
            None => return unsupported_error("vorbis (reader): unknown channel count"),
        };

        let sample_rate = match params.sample_rate {
            Some(sample_rate) => sample_rate,
            None => return unsupported_error("vorbis (reader): unknown sample rate"),
        };

        // The comment header was parsed into metadata side data while reading the stream
        // headers.
        let tags = match reader.metadata().skip_to_latest() {
            Some(rev) => Tags {
                vendor: rev.vendor().map(str::to_string),
                comments: rev.tags().iter().map(|tag| tag.to_string()).collect(),
            },
            None => Default::default(),
        };

        Ok(OggVorbisReader {
            track_id: track.id,
            n_channels,
            sample_rate,
            start_ts: params.start_ts,
            n_frames: params.n_frames,
            max_bitrate: params.max_bitrate,
            nominal_bitrate: params.nominal_bitrate,
            min_bitrate: params.min_bitrate,
            tags,
            buf_pos: 0,
            pos_ts: params.start_ts,
            skip_to_ts: None,
            clip_samples: true,
            has_clipped: false,
            is_eos: false,
            reader,
            decoder,
        })
    }

    /// Gets the number of audio channels.
    pub fn channels(&self) -> usize {
        self.n_channels
    }

    /// Gets the sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the upper bitrate hint in bits per second, if provided by the encoder.
    pub fn upper_bitrate(&self) -> Option<u32> {
        self.max_bitrate
    }

    /// Gets the nominal bitrate hint in bits per second, if provided by the encoder.
    pub fn nominal_bitrate(&self) -> Option<u32> {
        self.nominal_bitrate
    }

    /// Gets the lower bitrate hint in bits per second, if provided by the encoder.
    pub fn lower_bitrate(&self) -> Option<u32> {
        self.min_bitrate
    }

    /// Gets the total number of frames in the stream, if known.
    pub fn total_samples(&self) -> Option<u64> {
        self.n_frames
    }

    /// Gets the position of the next frame that will be returned, in frames since the start of
    /// the stream.
    pub fn sample_position(&self) -> u64 {
        self.pos_ts.saturating_sub(self.start_ts)
    }

    /// Returns `true` if the end of the stream was reached.
    pub fn is_end_of_stream(&self) -> bool {
        self.is_eos
    }

    /// Returns `true` if any returned sample was clipped.
    pub fn has_clipped(&self) -> bool {
        self.has_clipped
    }

    /// Returns `true` if samples are clamped to the representable range on read.
    pub fn clip_samples(&self) -> bool {
        self.clip_samples
    }

    /// Sets whether samples are clamped to the representable range on read.
    pub fn set_clip_samples(&mut self, clip: bool) {
        self.clip_samples = clip;
    }

    /// Gets the tags read from the stream's comment header.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Gets the number of bits the demuxer discarded synchronizing to page boundaries.
    pub fn waste_bits(&self) -> u64 {
        self.reader.waste_bits()
    }

    /// Reads interleaved sample frames into the provided buffer and returns the number of frames
    /// read.
    ///
    /// The buffer length must be a multiple of the channel count. A return value of 0 indicates
    /// the end of the stream.
    pub fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        if out.len() % self.n_channels != 0 {
            return unsupported_error(
                "vorbis (reader): buffer length must be a multiple of the channel count",
            );
        }

        let max_frames = out.len() / self.n_channels;

        let mut frames_written = 0;

        while frames_written < max_frames {
            let buf = self.decoder.last_decoded();

            let avail = buf.frames().saturating_sub(self.buf_pos);

            if avail > 0 {
                let count = min(avail, max_frames - frames_written);

                // Interleave the planar decoded buffer into the caller's buffer.
                for ch in 0..self.n_channels {
                    let plane = &buf.chan(ch)[self.buf_pos..self.buf_pos + count];

                    let out_iter =
                        out[frames_written * self.n_channels + ch..]
                            .iter_mut()
                            .step_by(self.n_channels);

                    for (o, &s) in out_iter.zip(plane) {
                        *o = s;
                    }
                }

                self.buf_pos += count;
                self.pos_ts += count as u64;
                frames_written += count;

                continue;
            }

            // The decoded buffer is exhausted. Decode the next packet.
            if self.is_eos || !self.decode_next_packet()? {
                break;
            }
        }

        // Optionally clamp the samples to just below full-scale.
        if self.clip_samples {
            for sample in out[..frames_written * self.n_channels].iter_mut() {
                if *sample > CLIP_LIMIT {
                    *sample = CLIP_LIMIT;
                    self.has_clipped = true;
                }
                else if *sample < -CLIP_LIMIT {
                    *sample = -CLIP_LIMIT;
                    self.has_clipped = true;
                }
            }
        }

        Ok(frames_written)
    }

    /// Seeks to the provided frame position, in frames since the start of the stream.
    pub fn seek_samples(&mut self, frame: u64) -> Result<()> {
        let required_ts = self.start_ts + frame;

        let seeked = self
            .reader
            .seek(SeekMode::Accurate, SeekTo::TimeStamp { ts: required_ts, track_id: self.track_id })?;

        // The decoder must be reset after a seek. The first packet decoded after the reset, the
        // pre-roll, produces no samples and only primes the decoder's overlap state.
        self.decoder.reset();

        // Invalidate the current decoded buffer.
        self.buf_pos = self.decoder.last_decoded().frames();

        // Quietly drop frames between the seeked-to packet and the requested frame.
        self.skip_to_ts = Some(required_ts);
        self.pos_ts = seeked.actual_ts;
        self.is_eos = false;

        Ok(())
    }

    /// Seeks to the provided time since the start of the stream.
    pub fn seek_time(&mut self, time: Time) -> Result<()> {
        let ts = TimeBase::new(1, self.sample_rate).calc_timestamp(time);

        self.seek_samples(ts)
    }

    /// Demultiplexes and decodes packets until the decoder produces a buffer of samples. Returns
    /// `false` when the end of the stream is reached.
    fn decode_next_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // The physical stream ended.
                    self.is_eos = true;
                    return Ok(false);
                }
                Err(Error::ResetRequired) => {
                    // A chained physical stream began. The parameters of the new stream may be
                    // wholly different, so decoding ends here and the caller may re-open the
                    // stream to continue.
                    self.is_eos = true;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            // Skip packets belonging to other logical streams.
            if packet.track_id() != self.track_id {
                continue;
            }

            let packet_ts = packet.ts();

            match self.decoder.decode(&packet) {
                Ok(buf) => {
                    let frames = buf.frames();

                    self.buf_pos = 0;

                    // Drop leading frames below the seek target.
                    if let Some(skip_to_ts) = self.skip_to_ts {
                        if packet_ts < skip_to_ts {
                            self.buf_pos = min((skip_to_ts - packet_ts) as usize, frames);
                        }

                        if packet_ts + frames as u64 >= skip_to_ts {
                            self.skip_to_ts = None;
                        }
                    }

                    self.pos_ts = packet_ts + self.buf_pos as u64;

                    return Ok(true);
                }
                Err(Error::DecodeError(err)) => {
                    // The packet failed to decode, but the stream is still intact. The previous
                    // block's windowed tail provides the fade-out. Skip the packet and continue.
                    warn!("vorbis (reader): packet dropped: {}", err);
                }
                Err(Error::IoError(err)) => {
                    warn!("vorbis (reader): packet dropped: {}", err);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Builds the error returned when a physical stream does not contain a Vorbis bitstream, naming
/// the sibling codec that was found when recognized.
fn not_vorbis_error(tracks: &[Track]) -> Error {
    // Prefer naming an actual codec over metadata-only streams.
    for track in tracks {
        let msg = match track.codec_params.codec {
            CODEC_TYPE_FLAC => Some("ogg: stream is flac, not vorbis"),
            CODEC_TYPE_OPUS => Some("ogg: stream is opus, not vorbis"),
            CODEC_TYPE_SPEEX => Some("ogg: stream is speex, not vorbis"),
            CODEC_TYPE_THEORA => Some("ogg: stream is theora, not vorbis"),
            _ => None,
        };

        if let Some(msg) = msg {
            return Error::Unsupported(msg);
        }
    }

    if tracks.iter().any(|track| track.codec_params.codec == CODEC_TYPE_OGG_SKELETON) {
        return Error::Unsupported("ogg: stream is skeleton metadata, not vorbis");
    }

    Error::Unsupported("ogg: no vorbis stream")
}

#[cfg(test)]
mod tests {
    use cantata_core::codecs::{CodecParameters, CODEC_TYPE_FLAC, CODEC_TYPE_OGG_SKELETON};
    use cantata_core::errors::Error;
    use cantata_core::formats::Track;

    use super::not_vorbis_error;

    fn make_track(id: u32, codec: cantata_core::codecs::CodecType) -> Track {
        let mut params = CodecParameters::new();
        params.for_codec(codec);
        Track::new(id, params)
    }

    #[test]
    fn verify_not_vorbis_error_names_codec() {
        // A skeleton metadata stream must not shadow the actual codec.
        let tracks =
            [make_track(0, CODEC_TYPE_OGG_SKELETON), make_track(1, CODEC_TYPE_FLAC)];

        match not_vorbis_error(&tracks) {
            Error::Unsupported(msg) => assert_eq!(msg, "ogg: stream is flac, not vorbis"),
            _ => panic!("unexpected error variant"),
        }

        match not_vorbis_error(&[]) {
            Error::Unsupported(msg) => assert_eq!(msg, "ogg: no vorbis stream"),
            _ => panic!("unexpected error variant"),
        }
    }
}
