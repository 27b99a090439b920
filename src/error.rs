use thiserror::Error;

/// Errors raised while assembling or driving the restoration networks.
#[derive(Error, Debug)]
pub enum Error {
    /// The generator was asked to run a flow it does not know.
    #[error("Unsupported flow specified: {0:?} (expected enc, dec or enc_dec)")]
    UnsupportedFlow(String),

    /// A builder was given options that cannot produce a consistent stack.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    Config(#[from] burn::config::ConfigError),

    #[error("Failed to load or save weights: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
