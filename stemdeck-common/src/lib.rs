//! # StemDeck Common Library
//!
//! Shared code for the StemDeck services including:
//! - Job event types (JobEvent enum) and the per-job ProgressBus
//! - Server-Sent Events helpers
//! - Bootstrap configuration loading (TOML, environment, compiled defaults)
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
