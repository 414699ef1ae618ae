use picmirror_core::{AppError, Rejection};
use std::io;

/// Failure of a single processing run.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("processing cancelled")]
    Cancelled,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<image::ImageError> for ProcessError {
    fn from(err: image::ImageError) -> Self {
        use image::ImageError;
        match err {
            ImageError::Limits(e) => {
                ProcessError::Rejected(Rejection::DecompressionBomb(e.to_string()))
            }
            ImageError::Unsupported(e) => {
                ProcessError::Rejected(Rejection::UnsupportedFormat(e.to_string()))
            }
            ImageError::Decoding(e) => ProcessError::Decode(e.to_string()),
            ImageError::Encoding(e) => ProcessError::Encode(e.to_string()),
            ImageError::IoError(e) => from_decode_io(e),
            other => ProcessError::Encode(other.to_string()),
        }
    }
}

impl From<gif::DecodingError> for ProcessError {
    fn from(err: gif::DecodingError) -> Self {
        match err {
            gif::DecodingError::Io(e) => from_decode_io(e),
            other => ProcessError::Decode(other.to_string()),
        }
    }
}

/// A truncated or corrupt stream surfaces as an io error from the decoders.
fn from_decode_io(err: io::Error) -> ProcessError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            ProcessError::Decode(err.to_string())
        }
        _ => ProcessError::Io(err),
    }
}

/// Decode failures come from untrusted bytes, so they surface as rejections.
impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Rejected(reason) => AppError::InputRejected(reason),
            ProcessError::Decode(msg) => AppError::InputRejected(Rejection::UnsupportedFormat(msg)),
            ProcessError::Cancelled => AppError::Transient("processing cancelled".to_string()),
            ProcessError::Io(e) => AppError::from(e),
            ProcessError::Encode(msg) => AppError::Internal(format!("encode failed: {}", msg)),
        }
    }
}
