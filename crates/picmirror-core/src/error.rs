//! Error types module
//!
//! Every public entry point of the core returns `Result<_, AppError>`. The
//! variants follow the failure taxonomy of the pipeline: untrusted input that
//! fails a safety check, transient I/O, resource-state trouble during cleanup,
//! and internal invariant violations caught at the outermost boundary.
//!
//! Only the orchestrating handler turns an `AppError` into user-facing text,
//! and it must use [`ErrorMetadata::client_message`], which never leaks detail.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes such as a vanished file
    Debug,
    /// Warning level - for rejected input and recoverable failures
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be presented and logged.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INPUT_REJECTED")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request may succeed
    fn is_recoverable(&self) -> bool;

    /// Generic message safe to show an end user
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Concrete reason an untrusted input was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unsafe URL")]
    UnsafeUrl,

    #[error("absolute paths are not accepted")]
    AbsolutePath,

    #[error("path escapes the data directory")]
    PathTraversal,

    #[error("file not found")]
    NotFound,

    #[error("empty file")]
    EmptyFile,

    #[error("payload too large: {size} bytes (max: {limit} bytes)")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("malformed base64 payload")]
    MalformedBase64,

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("animated image processing is disabled")]
    AnimationDisabled,

    #[error("decompression bomb risk: {0}")]
    DecompressionBomb(String),

    #[error("invalid user identifier")]
    InvalidUserId,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Input rejected: {0}")]
    InputRejected(#[from] Rejection),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Resource state: {0}")]
    ResourceState(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// The rejection reason, when this error is an input rejection.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AppError::InputRejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.rejection().is_some()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Transient(format!("IO error: {}", err))
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::InputRejected(_) => "INPUT_REJECTED",
            AppError::Transient(_) => "TRANSIENT_FAILURE",
            AppError::ResourceState(_) => "RESOURCE_STATE",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "INTERNAL_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::ResourceState(_))
    }

    fn client_message(&self) -> String {
        match self {
            AppError::InputRejected(_) => "图像无法处理".to_string(),
            AppError::Transient(_) => "处理超时或网络异常，请稍后再试".to_string(),
            AppError::ResourceState(_)
            | AppError::Internal(_)
            | AppError::InternalWithSource { .. } => "处理失败".to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            AppError::InputRejected(_) | AppError::Transient(_) => LogLevel::Warn,
            AppError::ResourceState(_) => LogLevel::Debug,
            AppError::Internal(_) | AppError::InternalWithSource { .. } => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_metadata_is_not_leaky() {
        let err = AppError::from(Rejection::PayloadTooLarge {
            size: 50,
            limit: 10,
        });
        assert_eq!(err.error_code(), "INPUT_REJECTED");
        assert!(!err.is_recoverable());
        assert!(!err.client_message().contains("50"));
        assert_eq!(err.log_level(), LogLevel::Warn);
        assert_eq!(
            err.rejection(),
            Some(&Rejection::PayloadTooLarge {
                size: 50,
                limit: 10
            })
        );
    }

    #[test]
    fn test_io_error_is_transient() {
        let err = AppError::from(io::Error::new(io::ErrorKind::TimedOut, "disk stalled"));
        assert!(matches!(err, AppError::Transient(_)));
        assert!(err.is_recoverable());
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_anyhow_error_is_internal() {
        let err = AppError::from(anyhow::anyhow!("decoder panicked"));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(err.log_level(), LogLevel::Error);
        assert_eq!(err.client_message(), "处理失败");
    }
}
