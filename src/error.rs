use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Upload log error: {0}")]
    UploadLog(#[from] csv::Error),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Uploaded object {key} has digest {actual} but expected {expected}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that must stop the process instead of being retried next cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Store(err) => err.is_fatal(),
            Error::InvalidSettings(_) | Error::Config(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
