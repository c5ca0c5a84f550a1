use livecast_core::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid stream key: {0}")]
    InvalidStreamKey(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to launch transcoder for {key}: {source}")]
    ProcessSpawn {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;

impl From<ValidationError> for StreamError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidStreamKey(err.to_string())
    }
}
