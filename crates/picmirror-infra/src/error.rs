//! Error logging
//!
//! The detailed error goes to the log at the level the error asks for; only
//! `client_message()` is ever shown to a chat user.

use picmirror_core::{AppError, ErrorMetadata, LogLevel};

pub fn log_error(error: &AppError) {
    let code = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, code, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, code, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, code, "Error occurred");
        }
    }
}
