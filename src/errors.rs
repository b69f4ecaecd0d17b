//! CLI-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no active session{0}")]
    NoActiveSession(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Viewport(#[from] openbrowser_viewport::ViewportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Process exit code: 0 success, 1 user-facing failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
