//! Mix engine tests
//!
//! Unify real WAV stems inside a project and inspect the written file.

mod helpers;

use helpers::{generate_constant_wav, generate_test_wav, read_wav_samples, AudioConfig};
use std::path::PathBuf;
use stemdeck_sep::services::mixer::{unify, MixError};
use stemdeck_sep::services::waveform::waveform_path;
use stemdeck_sep::services::ProjectStore;
use tempfile::TempDir;

struct Fixture {
    _library: TempDir,
    _uploads: TempDir,
    store: ProjectStore,
    id: String,
    dir: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let library = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let store = ProjectStore::open(library.path()).await.unwrap();
        let source = generate_test_wav(&uploads.path().join("song.wav"), &AudioConfig::default())
            .unwrap();
        let project = store.create("Song.wav", &source).await.unwrap();
        let dir = store.project_dir(&project.id).unwrap();
        Self {
            _library: library,
            _uploads: uploads,
            store,
            id: project.id,
            dir,
        }
    }

    async fn stem(&self, name: &str, value: i16, frames: usize, sample_rate: u32, channels: u16) {
        generate_constant_wav(&self.dir.join(name), value, frames, sample_rate, channels).unwrap();
        self.store.add_stem(&self.id, name).await.unwrap();
    }
}

fn selection(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_unify_sums_and_clips() {
    let fx = Fixture::new().await;
    fx.stem("lead.wav", 20000, 100, 44100, 2).await;
    fx.stem("backing.wav", 20000, 100, 44100, 2).await;

    let name = unify(&fx.store, &fx.id, &selection(&["lead.wav", "backing.wav"]))
        .await
        .unwrap();
    assert_eq!(name, "backing+lead.unified.wav");

    let (spec, samples) = read_wav_samples(&fx.dir.join(&name)).unwrap();
    assert_eq!(spec.sample_rate, 44100);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(samples.len(), 200);
    assert!(samples.iter().all(|&s| s == i16::MAX));

    let project = fx.store.get(&fx.id).await.unwrap();
    assert!(project.stems.contains(&name));
    assert!(waveform_path(&fx.dir, &name).exists());
}

#[tokio::test]
async fn test_unify_is_order_independent() {
    let fx = Fixture::new().await;
    fx.stem("a.wav", 1000, 64, 44100, 1).await;
    fx.stem("b.wav", 2000, 64, 44100, 1).await;

    let first = unify(&fx.store, &fx.id, &selection(&["a.wav", "b.wav"]))
        .await
        .unwrap();
    let (_, first_samples) = read_wav_samples(&fx.dir.join(&first)).unwrap();

    let second = unify(&fx.store, &fx.id, &selection(&["b.wav", "a.wav"]))
        .await
        .unwrap();
    let (_, second_samples) = read_wav_samples(&fx.dir.join(&second)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_samples, second_samples);
    assert!(first_samples.iter().all(|&s| (s - 3000).abs() <= 1));
}

#[tokio::test]
async fn test_shorter_stem_is_padded_with_silence() {
    let fx = Fixture::new().await;
    fx.stem("long.wav", 1000, 100, 44100, 1).await;
    fx.stem("short.wav", 1000, 40, 44100, 1).await;

    let name = unify(&fx.store, &fx.id, &selection(&["long.wav", "short.wav"]))
        .await
        .unwrap();
    let (_, samples) = read_wav_samples(&fx.dir.join(&name)).unwrap();
    assert_eq!(samples.len(), 100);
    assert!((samples[0] - 2000).abs() <= 1);
    assert!((samples[99] - 1000).abs() <= 1);
}

#[tokio::test]
async fn test_sample_rate_mismatch_writes_nothing() {
    let fx = Fixture::new().await;
    fx.stem("a.wav", 1000, 64, 44100, 1).await;
    fx.stem("c.wav", 1000, 64, 48000, 1).await;

    let err = unify(&fx.store, &fx.id, &selection(&["a.wav", "c.wav"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MixError::SampleRateMismatch {
            expected: 44100,
            found: 48000,
            ..
        }
    ));
    assert!(!fx.dir.join("a+c.unified.wav").exists());
    assert!(!fx.dir.join("a+c.unified.wav.tmp").exists());
    let project = fx.store.get(&fx.id).await.unwrap();
    assert_eq!(project.stems.len(), 2);
}

#[tokio::test]
async fn test_preconditions_checked_before_decoding() {
    let fx = Fixture::new().await;
    fx.stem("a.wav", 1000, 64, 44100, 1).await;
    fx.stem("b.wav", 1000, 64, 44100, 1).await;
    let unified = unify(&fx.store, &fx.id, &selection(&["a.wav", "b.wav"]))
        .await
        .unwrap();

    assert!(matches!(
        unify(&fx.store, &fx.id, &[]).await,
        Err(MixError::EmptySelection)
    ));
    assert!(matches!(
        unify(&fx.store, &fx.id, &selection(&["a.wav", unified.as_str()])).await,
        Err(MixError::UnifiedStemReuse(_))
    ));
    assert!(matches!(
        unify(&fx.store, &fx.id, &selection(&["a.wav", "nope.wav"])).await,
        Err(MixError::UnknownStem(_))
    ));
    assert!(matches!(
        unify(&fx.store, "19990101000000_zz", &selection(&["a.wav"])).await,
        Err(MixError::Store(_))
    ));
}
