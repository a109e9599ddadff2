//! Mix engine ("unify")
//!
//! Sums selected stems of a project into one derived 16-bit WAV stem named
//! `<base>+<base>...unified.wav`, bases in sorted order.

use crate::services::project_store::{ProjectStore, StoreError};
use crate::services::waveform;
use crate::utils::{decode_audio_file, split_extension, DecodedAudio};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Marker carried by every derived stem's filename
pub const UNIFIED_MARKER: &str = ".unified.";

/// Suffix of derived stem filenames
pub const UNIFIED_SUFFIX: &str = ".unified.wav";

/// Mix errors
#[derive(Debug, Error)]
pub enum MixError {
    #[error("No stems selected")]
    EmptySelection,

    #[error("Cannot unify a unified stem: {0}")]
    UnifiedStemReuse(String),

    #[error("Stem not found: {0}")]
    UnknownStem(String),

    #[error("Sample rate mismatch: {stem} is {found} Hz, expected {expected} Hz")]
    SampleRateMismatch {
        stem: String,
        expected: u32,
        found: u32,
    },

    #[error("Channel mismatch: {stem} has {found} channels, expected {expected}")]
    ChannelMismatch {
        stem: String,
        expected: usize,
        found: usize,
    },

    #[error("Failed to decode {stem}: {message}")]
    Decode { stem: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl MixError {
    /// Precondition failures the caller can fix
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MixError::EmptySelection
                | MixError::UnifiedStemReuse(_)
                | MixError::SampleRateMismatch { .. }
                | MixError::ChannelMismatch { .. }
        )
    }
}

/// Derived stem filename for a selection (order-independent)
pub fn unified_name(stems: &BTreeSet<String>) -> String {
    let bases: Vec<&str> = stems.iter().map(|s| split_extension(s).0).collect();
    format!("{}{}", bases.join("+"), UNIFIED_SUFFIX)
}

/// Sum decoded stems sample-wise, padding shorter ones with silence and
/// hard-clipping the result to [-1.0, 1.0]
///
/// Inputs must share sample rate and channel count.
pub fn mix_buffers(inputs: &[DecodedAudio]) -> Vec<f32> {
    let len = inputs.iter().map(|a| a.samples.len()).max().unwrap_or(0);
    let mut mixed = vec![0.0f32; len];
    for input in inputs {
        for (out, sample) in mixed.iter_mut().zip(&input.samples) {
            *out += sample;
        }
    }
    for sample in &mut mixed {
        *sample = sample.clamp(-1.0, 1.0);
    }
    mixed
}

fn check_formats(decoded: &[(String, DecodedAudio)]) -> Result<(), MixError> {
    let Some((_, first)) = decoded.first() else {
        return Err(MixError::EmptySelection);
    };
    for (stem, audio) in decoded {
        if audio.sample_rate != first.sample_rate {
            return Err(MixError::SampleRateMismatch {
                stem: stem.clone(),
                expected: first.sample_rate,
                found: audio.sample_rate,
            });
        }
        if audio.channels != first.channels {
            return Err(MixError::ChannelMismatch {
                stem: stem.clone(),
                expected: first.channels,
                found: audio.channels,
            });
        }
    }
    Ok(())
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: usize) -> Result<(), MixError> {
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let io_err = |e: hound::Error| MixError::Io(e.to_string());

    let mut writer = hound::WavWriter::create(path, spec).map_err(io_err)?;
    for &sample in samples {
        writer
            .write_sample((sample * i16::MAX as f32).round() as i16)
            .map_err(io_err)?;
    }
    writer.finalize().map_err(io_err)
}

/// Decode, validate, mix and write; blocking
fn render(dir: &Path, stems: &BTreeSet<String>, output: &Path) -> Result<(), MixError> {
    let mut decoded = Vec::with_capacity(stems.len());
    for stem in stems {
        let audio = decode_audio_file(&dir.join(stem)).map_err(|e| MixError::Decode {
            stem: stem.clone(),
            message: e.to_string(),
        })?;
        decoded.push((stem.clone(), audio));
    }
    check_formats(&decoded)?;

    let (sample_rate, channels) = (decoded[0].1.sample_rate, decoded[0].1.channels);
    let buffers: Vec<DecodedAudio> = decoded.into_iter().map(|(_, a)| a).collect();
    let mixed = mix_buffers(&buffers);

    // Never leave a partial stem behind
    let tmp: PathBuf = output.with_extension("wav.tmp");
    if let Err(e) = write_wav(&tmp, &mixed, sample_rate, channels) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, output).map_err(|e| MixError::Io(e.to_string()))
}

/// Combine `selection` stems of a project into a new stem
///
/// Rejects empty selections, derived stems and stems the project does not
/// have before touching any audio. Format mismatches are reported without
/// writing anything. Returns the new stem's filename.
pub async fn unify(
    store: &ProjectStore,
    project_id: &str,
    selection: &[String],
) -> Result<String, MixError> {
    if selection.is_empty() {
        return Err(MixError::EmptySelection);
    }
    if let Some(derived) = selection.iter().find(|s| s.contains(UNIFIED_MARKER)) {
        return Err(MixError::UnifiedStemReuse(derived.clone()));
    }

    let project = store.get(project_id).await?;
    let stems: BTreeSet<String> = selection.iter().cloned().collect();
    if let Some(missing) = stems.iter().find(|s| !project.stems.contains(*s)) {
        return Err(MixError::UnknownStem(missing.clone()));
    }

    let dir = store.project_dir(project_id)?;
    let name = unified_name(&stems);
    let output = dir.join(&name);

    let render_dir = dir.clone();
    let render_output = output.clone();
    tokio::task::spawn_blocking(move || render(&render_dir, &stems, &render_output))
        .await
        .map_err(|e| MixError::Io(format!("Mix task failed: {}", e)))??;

    store.add_stem(project_id, &name).await?;
    if waveform::precompute_for_stems(dir, vec![name.clone()]).await == 0 {
        warn!(project_id = %project_id, stem = %name, "Unified stem has no waveform yet");
    }

    info!(project_id = %project_id, stem = %name, "Stems unified");
    Ok(name)
}
