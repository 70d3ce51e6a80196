use std::fmt::{Display, Formatter};

use thiserror::Error;

/// A failure reported by the codec collaborator.
///
/// `status` carries the platform status code verbatim so callers can map it
/// back onto vendor error spaces; `detail` is a human-readable description
/// used in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub status: i32,
    pub detail: String,
}

impl CodecError {
    pub fn new(status: i32, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (status {})", self.detail, self.status)
    }
}

impl std::error::Error for CodecError {}

/// Result alias for codec collaborator operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors surfaced by the transcoding engine.
///
/// The first error recorded by a pipeline is latched as its terminal status;
/// the scheduler reports it to the client once and removes the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscodeError {
    /// Malformed configuration or input, e.g. a track format without a MIME
    /// type or a sample larger than the codec's input buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No codec is available for the requested MIME type.
    #[error("no codec available for {0}")]
    Unsupported(String),

    /// A status returned by the codec collaborator.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A failure reported by the sample reader.
    #[error("sample reader error: {0}")]
    Reader(String),

    /// The pipeline was stopped before the encoder reached end of stream.
    #[error("transcoding stopped before completion")]
    Cancelled,
}
