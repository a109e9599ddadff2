//! Audio decoding
//!
//! Stems are read back as interleaved f32 PCM in their own channel layout and
//! sample rate; nothing is downmixed or resampled here. symphonia handles every
//! container the engine can write (WAV, FLAC, MP3).

use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

/// Decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open audio file: {0}")]
    Open(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("No audio track")]
    NoTrack,

    #[error("Audio track has no {0}")]
    MissingParameter(&'static str),

    #[error("Corrupt audio data: {0}")]
    Corrupt(String),
}

/// Decoded PCM with its source layout
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len().checked_div(self.channels).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// The first decodable track of a probed file
struct OpenTrack {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

fn open_track(path: &Path) -> Result<OpenTrack, DecodeError> {
    let source = MediaSourceStream::new(Box::new(File::open(path)?), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let reader = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?
        .format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or(DecodeError::MissingParameter("sample rate"))?;
    let channels = params
        .channels
        .ok_or(DecodeError::MissingParameter("channel layout"))?
        .count();
    let track_id = track.id;

    let decoder = symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    Ok(OpenTrack {
        reader,
        decoder,
        track_id,
        sample_rate,
        channels,
    })
}

/// Decode a whole file into memory
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let OpenTrack {
        mut reader,
        mut decoder,
        track_id,
        sample_rate,
        channels,
    } = open_track(path)?;

    let mut samples = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            // End of stream
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let block = decoder
            .decode(&packet)
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        // Capacity is the decoder's per-packet maximum
        let scratch = scratch
            .get_or_insert_with(|| SampleBuffer::new(block.capacity() as u64, *block.spec()));
        scratch.copy_interleaved_ref(block);
        samples.extend_from_slice(scratch.samples());
    }

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "Decoded audio"
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
