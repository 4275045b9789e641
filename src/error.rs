//! Error types for Resonar

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResonarError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HRTF error: {0}")]
    Hrtf(String),
}

pub type Result<T> = std::result::Result<T, ResonarError>;
