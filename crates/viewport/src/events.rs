//! Domain events published on the Viewport's hub.

use std::path::PathBuf;

use openbrowser_core_types::TabId;
use serde::{Deserialize, Serialize};

/// Events observable by guards and by the agent loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ViewportEvent {
    TabOpened {
        tab: TabId,
        url: String,
        opener: Option<TabId>,
    },
    TabClosed {
        tab: TabId,
    },
    Navigated {
        tab: TabId,
        url: String,
    },
    /// The DOM has been mutation-silent for the configured idle window.
    ContentReady {
        tab: TabId,
    },
    DialogHandled {
        kind: String,
        message: String,
    },
    DownloadStarted {
        id: String,
        suggested_name: String,
    },
    DownloadCompleted {
        id: String,
        saved_path: PathBuf,
        file_size: u64,
    },
    PolicyViolation {
        url: String,
        rule: String,
    },
    Crash {
        tab: Option<TabId>,
        message: String,
    },
}
