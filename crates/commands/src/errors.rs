//! Command-layer error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{name}' is not registered")]
    NotRegistered { name: String },

    #[error("invalid parameters for '{name}': {message}")]
    ValidationFailed { name: String, message: String },

    /// The single failure type surfaced by the executor; wraps handler and
    /// validation errors alike.
    #[error("command '{name}' failed: {message}")]
    Failed {
        name: String,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("command '{name}' requires '{capability}' which is not available")]
    MissingCapability {
        name: String,
        capability: &'static str,
    },
}

impl CommandError {
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    pub fn validation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn failed_with(
        name: impl Into<String>,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}
