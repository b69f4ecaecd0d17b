//! Error taxonomy for the browser layer.

use openbrowser_core_types::TabId;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ViewportError {
    #[error("failed to launch browser: {message}")]
    LaunchFailed { message: String },

    #[error("navigation to {url} failed: {message}")]
    NavigationFailed { url: String, message: String },

    #[error("browser target crashed: {message}")]
    Crashed { message: String },

    #[error("cdp i/o failure: {message}")]
    CdpIo { message: String, retriable: bool },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("guard '{name}' failed to attach: {message}")]
    GuardAttach { name: String, message: String },

    #[error("unknown tab {0}")]
    TabNotFound(TabId),

    #[error("{message}")]
    Internal { message: String },
}

impl ViewportError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
        }
    }

    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NavigationFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn crashed(message: impl Into<String>) -> Self {
        Self::Crashed {
            message: message.into(),
        }
    }

    pub fn cdp(message: impl Into<String>) -> Self {
        Self::CdpIo {
            message: message.into(),
            retriable: false,
        }
    }

    pub fn cdp_retriable(message: impl Into<String>) -> Self {
        Self::CdpIo {
            message: message.into(),
            retriable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn guard(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GuardAttach {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CdpIo {
                retriable: true,
                ..
            } | Self::Timeout { .. }
        )
    }
}
