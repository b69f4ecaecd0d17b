//! Error type for snapshot, render and interaction failures.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PerceptionError {
    /// The CDP snapshot payload was missing a required section.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// An ElementRef the caller addressed is not in the selector map.
    #[error("element {0} not found in current snapshot")]
    ElementNotFound(u32),

    /// All click/type strategies failed for an element.
    #[error("interaction with element {index} failed: {message}")]
    InteractionFailed { index: u32, message: String },

    /// The underlying browser call failed.
    #[error("browser error: {0}")]
    Browser(String),
}

impl PerceptionError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSnapshot(message.into())
    }

    pub fn interaction(index: u32, message: impl Into<String>) -> Self {
        Self::InteractionFailed {
            index,
            message: message.into(),
        }
    }
}

impl From<openbrowser_viewport::ViewportError> for PerceptionError {
    fn from(err: openbrowser_viewport::ViewportError) -> Self {
        Self::Browser(err.to_string())
    }
}
