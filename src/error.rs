use thiserror::Error;

use crate::console::CaptureError;
use crate::token::TokenError;

/// Errors that end a command.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("New {role} PIN rejected {attempts} times, giving up")]
    AttemptsExhausted {
        role: crate::token::UserRole,
        attempts: u32,
    },
}

/// Result type alias using ToolError
pub type ToolResult<T> = Result<T, ToolError>;
