//! Audio Test Fixture Generator
//!
//! Utilities for generating test audio files with various characteristics

use std::path::{Path, PathBuf};

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Peak amplitude, 0.0-1.0
    pub amplitude: f32,
    pub frequency: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 0.5,
            sample_rate: 44100,
            channels: 2,
            amplitude: 0.3,
            frequency: 440.0,
        }
    }
}

/// Generate a 16-bit sine WAV file
pub fn generate_test_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_frames = (config.duration_seconds * config.sample_rate as f64) as usize;

    for i in 0..total_frames {
        let t = i as f32 / config.sample_rate as f32;
        let value = config.amplitude * (2.0 * std::f32::consts::PI * config.frequency * t).sin();
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..config.channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Generate a WAV holding one constant sample value
pub fn generate_constant_wav(
    path: &Path,
    value: i16,
    frames: usize,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..frames * channels as usize {
        writer.write_sample(value)?;
    }
    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Read every sample of a 16-bit WAV
pub fn read_wav_samples(path: &Path) -> anyhow::Result<(hound::WavSpec, Vec<i16>)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    Ok((spec, samples))
}
