//! Audio decoding using symphonia
//!
//! Decodes compressed audio (MP3, FLAC, AAC, Vorbis, WAV, ...) to interleaved
//! f32 PCM at the file's native rate and channel layout. Conversion to the
//! engine format is the voice's job, not the decoder's.

use crate::error::{DecodeError, Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

/// Maximum consecutive undecodable packets to skip before giving up.
const MAX_DECODE_RETRIES: u32 = 3;

/// Native stream parameters recorded at open time.
#[derive(Debug, Clone, Copy)]
pub struct DecoderSpec {
    /// Sample rate of the file, in Hz
    pub sample_rate: u32,
    /// Channel count of the file
    pub channels: u16,
    /// Total frames in the file, when the container reports it
    pub total_frames: Option<u64>,
}

/// One pull's worth of decoded audio.
#[derive(Debug)]
pub struct ReadChunk {
    /// Interleaved f32 samples in [-1, 1] at the native rate and layout;
    /// may hold fewer frames than requested
    pub samples: Vec<f32>,
    /// True once no further data will ever be produced
    pub end_of_stream: bool,
}

impl ReadChunk {
    fn end() -> Self {
        Self {
            samples: Vec::new(),
            end_of_stream: true,
        }
    }
}

/// Pull interface over a decoding pipeline.
///
/// Implementations produce frames on demand ([`FileDecoder`]) or drain a
/// ring filled by a worker thread
/// ([`StreamingDecoder`](crate::audio::streaming::StreamingDecoder)). The
/// choice is invisible to the voice that owns the decoder. Decoders are not
/// thread-safe; the owning voice serializes access behind its lock.
pub trait Decoder: Send {
    /// Native stream parameters.
    fn spec(&self) -> DecoderSpec;

    /// Decode up to `frames` frames.
    ///
    /// Only the streaming variant may return fewer frames without signaling
    /// end-of-stream (ring underrun). A decoder that has failed is terminal
    /// and reports end-of-stream from then on.
    fn read(&mut self, frames: usize) -> Result<ReadChunk>;

    /// Best-effort seek to the nearest decodable point.
    fn seek(&mut self, position_s: f64) -> Result<()>;

    /// Estimated frames until end-of-stream, expressed at `output_rate`.
    ///
    /// `None` when the total length is unknown.
    fn remaining_frames(&self, output_rate: u32) -> Option<u64>;
}

/// File-backed synchronous decoder.
///
/// Demuxes and decodes inside `read`, keeping a cursor into the most recent
/// packet's samples so pulls of any size are served exactly.
pub struct FileDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    spec: DecoderSpec,
    /// Samples of the current packet, reused across packets
    buffer: Option<SampleBuffer<f32>>,
    /// Read cursor into `buffer`, in samples
    cursor: usize,
    /// Frames handed out since open or the last seek
    position_frames: u64,
    finished: bool,
    failed: bool,
}

impl std::fmt::Debug for FileDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDecoder")
            .field("track_id", &self.track_id)
            .field("spec", &self.spec)
            .field("cursor", &self.cursor)
            .field("position_frames", &self.position_frames)
            .field("finished", &self.finished)
            .field("failed", &self.failed)
            .finish()
    }
}

impl FileDecoder {
    /// Probe and open an audio file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| -> Error {
            if e.kind() == std::io::ErrorKind::NotFound {
                DecodeError::FileNotFound {
                    path: path.display().to_string(),
                }
                .into()
            } else {
                e.into()
            }
        })?;

        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                debug!("probe failed for {}: {}", path.display(), e);
                DecodeError::UnsupportedFormat {
                    path: path.display().to_string(),
                }
            })?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::Malformed {
            detail: "sample rate not reported".to_string(),
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or(DecodeError::Malformed {
                detail: "channel count not reported".to_string(),
            })?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| {
                debug!("no codec for {}: {}", path.display(), e);
                DecodeError::UnsupportedFormat {
                    path: path.display().to_string(),
                }
            })?;

        let spec = DecoderSpec {
            sample_rate,
            channels,
            total_frames: codec_params.n_frames,
        };

        debug!(
            "opened {}: {} Hz, {} ch, {:?} frames",
            path.display(),
            sample_rate,
            channels,
            spec.total_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            buffer: None,
            cursor: 0,
            position_frames: 0,
            finished: false,
            failed: false,
        })
    }

    /// Samples left in the current packet buffer.
    fn buffered(&self) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, |b| b.len().saturating_sub(self.cursor))
    }

    /// Decode packets until the buffer holds samples or the stream ends.
    fn refill(&mut self) -> Result<()> {
        let mut discarded: u32 = 0;
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    self.failed = true;
                    return Err(DecodeError::DecodeFailed {
                        detail: e.to_string(),
                    }
                    .into());
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let buffer = match self.buffer.as_mut() {
                        Some(buffer) => buffer,
                        None => self
                            .buffer
                            .insert(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())),
                    };
                    buffer.copy_interleaved_ref(decoded);
                    self.cursor = 0;
                    return Ok(());
                }
                // Undecodable packets are skipped up to the retry bound;
                // decoding continues with the next packet.
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("discarding malformed packet: {}", e);
                    discarded += 1;
                    if discarded > MAX_DECODE_RETRIES {
                        self.failed = true;
                        return Err(DecodeError::DecodeFailed {
                            detail: format!("{} consecutive bad packets", discarded),
                        }
                        .into());
                    }
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    self.buffer = None;
                }
                Err(e) => {
                    self.failed = true;
                    return Err(DecodeError::DecodeFailed {
                        detail: e.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

impl Decoder for FileDecoder {
    fn spec(&self) -> DecoderSpec {
        self.spec
    }

    fn read(&mut self, frames: usize) -> Result<ReadChunk> {
        if self.failed || (self.finished && self.buffered() == 0) {
            return Ok(ReadChunk::end());
        }

        let channels = self.spec.channels as usize;
        let wanted = frames * channels;
        let mut samples = Vec::with_capacity(wanted);

        while samples.len() < wanted {
            if self.buffered() == 0 {
                if self.finished {
                    break;
                }
                self.refill()?;
                continue;
            }

            let buffer = self.buffer.as_ref().expect("buffered() checked");
            let take = (wanted - samples.len()).min(buffer.len() - self.cursor);
            samples.extend_from_slice(&buffer.samples()[self.cursor..self.cursor + take]);
            self.cursor += take;
        }

        self.position_frames += (samples.len() / channels) as u64;
        let end_of_stream = self.finished && self.buffered() == 0;
        Ok(ReadChunk {
            samples,
            end_of_stream,
        })
    }

    fn seek(&mut self, position_s: f64) -> Result<()> {
        self.format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time: Time::from(position_s.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| {
                debug!("seek to {position_s}s failed: {e}");
                DecodeError::SeekFailed {
                    position_s,
                }
            })?;

        // Seeking happens in the demuxer; the codec cannot see it, so reset
        // to avoid glitches.
        self.decoder.reset();
        self.buffer = None;
        self.cursor = 0;
        self.finished = false;
        self.position_frames = (position_s.max(0.0) * self.spec.sample_rate as f64) as u64;
        Ok(())
    }

    fn remaining_frames(&self, output_rate: u32) -> Option<u64> {
        let total = self.spec.total_frames?;
        let native = total.saturating_sub(self.position_frames);
        Some(native * output_rate as u64 / self.spec.sample_rate as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Decoding against real files lives in the integration suite, which
    // synthesizes WAV fixtures. Only path-level failures are covered here.

    #[test]
    fn test_open_missing_file() {
        let err = FileDecoder::open(Path::new("/nonexistent/audio.ogg")).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_open_non_audio_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, b"definitely not audio data").unwrap();
        let err = FileDecoder::open(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::UnsupportedFormat { .. })
        ));
    }
}
