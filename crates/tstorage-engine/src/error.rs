use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Timed out after {0:?} waiting for a free writer")]
    WriteTimeout(Duration),

    #[error("Storage is closed")]
    Closed,

    #[error("Corrupt partition {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
