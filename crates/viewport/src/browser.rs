//! Capability surface the upper layers program against.
//!
//! `Viewport` is the production implementation; tests in the perception,
//! command and agent crates substitute scripted fakes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_core_types::{PageMetrics, Rect, TabId, TabInfo};
use serde_json::Value;

use crate::errors::ViewportError;

/// Minimal browser capability set required by perception, command handlers
/// and the agent loop.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Navigate the current tab and wait for the document to become ready.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), ViewportError>;

    async fn current_url(&self) -> Result<String, ViewportError>;

    async fn go_back(&self) -> Result<(), ViewportError>;

    /// Evaluate an expression in the current tab, returning it by value.
    async fn evaluate(&self, expression: &str) -> Result<Value, ViewportError>;

    /// Dispatch a trusted click at page coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), ViewportError>;

    /// Insert text into the focused element.
    async fn insert_text(&self, text: &str) -> Result<(), ViewportError>;

    /// Press a key chord such as `Enter` or `Control+a`.
    async fn press_keys(&self, keys: &str) -> Result<(), ViewportError>;

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), ViewportError>;

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, ViewportError>;

    async fn page_metrics(&self) -> Result<PageMetrics, ViewportError>;

    /// Raw `DOMSnapshot.captureSnapshot` payload for the current tab.
    async fn dom_snapshot(&self) -> Result<Value, ViewportError>;

    /// Raw `Accessibility.getFullAXTree` payload for the current tab.
    async fn ax_snapshot(&self) -> Result<Value, ViewportError>;

    /// Content-quad rect of a node, when the node still has layout.
    async fn box_model(&self, backend_node_id: i64) -> Result<Option<Rect>, ViewportError>;

    /// Attach local files to a file input element.
    async fn set_file_input(
        &self,
        backend_node_id: i64,
        files: &[&Path],
    ) -> Result<(), ViewportError>;

    async fn open_tab(&self, url: &str) -> Result<TabId, ViewportError>;

    async fn close_tab(&self, tab: &TabId) -> Result<(), ViewportError>;

    async fn focus_tab(&self, tab: &TabId) -> Result<(), ViewportError>;

    async fn list_tabs(&self) -> Vec<TabInfo>;
}
