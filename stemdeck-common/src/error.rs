//! Errors raised while bootstrapping a StemDeck service

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file unreadable, unparsable or unwritable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad log filter, or a subscriber is already installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
