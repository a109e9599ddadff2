//! Utility modules for stemdeck-sep

pub mod audio_decoder;
pub mod sanitize;

pub use audio_decoder::{decode_audio_file, DecodeError, DecodedAudio};
pub use sanitize::{ascii_prefix, sanitize_filename, split_extension};
