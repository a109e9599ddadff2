//! Waveform peak precompute
//!
//! Stores per-channel min/max peaks as small JSON files under the project's
//! `waveforms/` directory so clients can draw a stem without decoding it.

use crate::utils::{decode_audio_file, split_extension, DecodedAudio};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Min/max pairs computed per channel
pub const DEFAULT_NUM_PEAKS: usize = 800;

/// Subdirectory of a project holding peak files
pub const WAVEFORM_DIR: &str = "waveforms";

/// Peak data for one stem
///
/// `peaks[channel]` is a flat `[min0, max0, min1, max1, ...]` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformPeaks {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: usize,
    pub peaks: Vec<Vec<f64>>,
}

fn round4(value: f32) -> f64 {
    (value as f64 * 10_000.0).round() / 10_000.0
}

/// Compute peaks from decoded audio
pub fn compute_peaks(audio: &DecodedAudio, num_peaks: usize) -> WaveformPeaks {
    let frames = audio.frames();
    let chunk_size = (frames / num_peaks.max(1)).max(1);

    let peaks = (0..audio.channels)
        .map(|channel| {
            let mut channel_peaks = Vec::with_capacity(2 * frames.div_ceil(chunk_size));
            let mut start = 0;
            while start < frames {
                let end = (start + chunk_size).min(frames);
                let (min, max) = (start..end)
                    .map(|frame| audio.samples[frame * audio.channels + channel])
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                        (lo.min(s), hi.max(s))
                    });
                channel_peaks.push(round4(min));
                channel_peaks.push(round4(max));
                start = end;
            }
            channel_peaks
        })
        .collect();

    WaveformPeaks {
        duration: audio.duration_seconds(),
        sample_rate: audio.sample_rate,
        channels: audio.channels,
        peaks,
    }
}

/// Peak file location for a stem: `waveforms/<stem base>.json`
pub fn waveform_path(project_dir: &Path, stem: &str) -> PathBuf {
    let (base, _) = split_extension(stem);
    project_dir.join(WAVEFORM_DIR).join(format!("{}.json", base))
}

/// Decode `audio_path`, compute peaks and write them to `output_path`
pub fn precompute_waveform(audio_path: &Path, output_path: &Path) -> Result<WaveformPeaks> {
    let audio = decode_audio_file(audio_path)?;
    let peaks = compute_peaks(&audio, DEFAULT_NUM_PEAKS);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec(&peaks)?;
    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    info!(
        stem = %audio_path.display(),
        output = %output_path.display(),
        "Waveform precomputed"
    );
    Ok(peaks)
}

/// Precompute peaks for several stems of one project
///
/// Failures are logged and skipped; returns how many succeeded.
pub async fn precompute_for_stems(project_dir: PathBuf, stems: Vec<String>) -> usize {
    let result = tokio::task::spawn_blocking(move || {
        let mut done = 0;
        for stem in &stems {
            let audio = project_dir.join(stem);
            let output = waveform_path(&project_dir, stem);
            match precompute_waveform(&audio, &output) {
                Ok(_) => done += 1,
                Err(e) => warn!(stem = %stem, "Waveform precompute failed: {:#}", e),
            }
        }
        done
    })
    .await;

    match result {
        Ok(done) => done,
        Err(e) => {
            warn!("Waveform precompute task failed: {}", e);
            0
        }
    }
}

/// Read a stem's peak file, computing it first if missing
pub async fn load_or_compute(project_dir: PathBuf, stem: String) -> Result<WaveformPeaks> {
    tokio::task::spawn_blocking(move || {
        let path = waveform_path(&project_dir, &stem);
        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            return serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt waveform file {}", path.display()));
        }
        precompute_waveform(&project_dir.join(&stem), &path)
    })
    .await
    .context("Waveform task panicked")?
}
