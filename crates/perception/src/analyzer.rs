//! Page analyzer: orchestrates extraction and performs index-addressed
//! interaction with fallback strategies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use openbrowser_core_types::InteractedElement;
use openbrowser_viewport::Browser;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::PerceptionError;
use crate::model::{PageTree, RenderedPageState, SelectorEntry, SelectorIndex};
use crate::render::{identity_baseline, TreeRenderer};
use crate::snapshot::SnapshotBuilder;

const SELECTOR_CLICK_TIMEOUT: Duration = Duration::from_secs(5);

struct CachedState {
    tree: Arc<PageTree>,
    selector_map: Arc<SelectorIndex>,
}

/// One analyzer per Viewport. The cache is single-writer: `extract_state`
/// replaces it atomically, readers see the previous or the new snapshot,
/// never a partial one.
pub struct PageAnalyzer {
    browser: Arc<dyn Browser>,
    snapshot: SnapshotBuilder,
    renderer: TreeRenderer,
    cache: RwLock<Option<CachedState>>,
    baseline: Mutex<HashSet<String>>,
    interactions: Mutex<Vec<InteractedElement>>,
}

impl PageAnalyzer {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            snapshot: SnapshotBuilder::default(),
            renderer: TreeRenderer::default(),
            cache: RwLock::new(None),
            baseline: Mutex::new(HashSet::new()),
            interactions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_components(
        browser: Arc<dyn Browser>,
        snapshot: SnapshotBuilder,
        renderer: TreeRenderer,
    ) -> Self {
        Self {
            browser,
            snapshot,
            renderer,
            cache: RwLock::new(None),
            baseline: Mutex::new(HashSet::new()),
            interactions: Mutex::new(Vec::new()),
        }
    }

    pub fn browser(&self) -> &Arc<dyn Browser> {
        &self.browser
    }

    /// Capture, merge and render the current page. Replaces the cache and
    /// advances the new-element baseline.
    pub async fn extract_state(&self) -> Result<RenderedPageState, PerceptionError> {
        let mut tree = self.snapshot.capture(self.browser.as_ref()).await?;
        let metrics = self.browser.page_metrics().await?;

        let previous_baseline = self.baseline.lock().clone();
        let state = self.renderer.render(&mut tree, &metrics, &previous_baseline);
        *self.baseline.lock() = identity_baseline(&tree);

        *self.cache.write() = Some(CachedState {
            tree: Arc::new(tree),
            selector_map: Arc::new(state.selector_map.clone()),
        });

        debug!(
            target: "perception-analyzer",
            interactive = state.interactive_element_count,
            elements = state.element_count,
            "page state extracted"
        );
        Ok(state)
    }

    pub fn cached_tree(&self) -> Option<Arc<PageTree>> {
        self.cache.read().as_ref().map(|c| Arc::clone(&c.tree))
    }

    pub fn cached_selector_map(&self) -> Option<Arc<SelectorIndex>> {
        self.cache
            .read()
            .as_ref()
            .map(|c| Arc::clone(&c.selector_map))
    }

    pub fn clear_cache(&self) {
        *self.cache.write() = None;
        self.baseline.lock().clear();
    }

    /// Pure lookup; `None` when the index is unmapped.
    pub fn element_selector(&self, index: u32) -> Option<SelectorEntry> {
        self.cache
            .read()
            .as_ref()
            .and_then(|c| c.selector_map.get(&index).cloned())
    }

    pub fn interacted_elements(&self) -> Vec<InteractedElement> {
        self.interactions.lock().clone()
    }

    pub fn clear_interacted_elements(&self) {
        self.interactions.lock().clear();
    }

    /// Click an element by its ElementRef, trying backend-node geometry,
    /// in-page geometry, then a direct DOM click.
    pub async fn click_element_by_index(&self, index: u32) -> Result<(), PerceptionError> {
        let entry = self
            .element_selector(index)
            .ok_or(PerceptionError::ElementNotFound(index))?;

        self.click_entry(index, &entry).await?;
        self.record(index, &entry, "click");
        Ok(())
    }

    /// Focus the element (via click) and fill or append text.
    pub async fn input_text_by_index(
        &self,
        index: u32,
        text: &str,
        clear_first: bool,
    ) -> Result<(), PerceptionError> {
        let entry = self
            .element_selector(index)
            .ok_or(PerceptionError::ElementNotFound(index))?;

        self.click_entry(index, &entry).await?;
        if clear_first {
            // Select-all then overtype clears both inputs and
            // contenteditable hosts.
            self.browser
                .press_keys("Control+a")
                .await
                .map_err(PerceptionError::from)?;
        }
        self.browser
            .insert_text(text)
            .await
            .map_err(PerceptionError::from)?;

        self.record(index, &entry, "type");
        Ok(())
    }

    async fn click_entry(&self, index: u32, entry: &SelectorEntry) -> Result<(), PerceptionError> {
        let mut failures: Vec<String> = Vec::new();

        // 1. Backend node geometry via DOM.getBoxModel.
        if let Some(backend_id) = entry.backend_node_id {
            match self.browser.box_model(backend_id).await {
                Ok(Some(rect)) => {
                    let (x, y) = rect.center();
                    match self.browser.click_at(x, y).await {
                        Ok(()) => return Ok(()),
                        Err(err) => failures.push(format!("box-model click: {err}")),
                    }
                }
                Ok(None) => failures.push("box-model click: node has no layout".to_string()),
                Err(err) => failures.push(format!("box-model lookup: {err}")),
            }
        }

        // 2. In-page geometry: find by selector or xpath, click at the
        // rect center.
        match self.locate_center(entry).await {
            Ok(Some((x, y))) => match self.browser.click_at(x, y).await {
                Ok(()) => return Ok(()),
                Err(err) => failures.push(format!("geometry click: {err}")),
            },
            Ok(None) => failures.push("geometry click: element not located".to_string()),
            Err(err) => failures.push(format!("geometry lookup: {err}")),
        }

        // 3. Direct element.click() with a bounded timeout.
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
            locate_script(entry)
        );
        match timeout(SELECTOR_CLICK_TIMEOUT, self.browser.evaluate(&script)).await {
            Ok(Ok(Value::Bool(true))) => return Ok(()),
            Ok(Ok(_)) => failures.push("selector click: element not found".to_string()),
            Ok(Err(err)) => failures.push(format!("selector click: {err}")),
            Err(_) => failures.push("selector click: timed out".to_string()),
        }

        warn!(target: "perception-analyzer", index, ?failures, "all click strategies failed");
        Err(PerceptionError::interaction(index, failures.join("; ")))
    }

    async fn locate_center(
        &self,
        entry: &SelectorEntry,
    ) -> Result<Option<(f64, f64)>, PerceptionError> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.x + r.width / 2, y: r.y + r.height / 2 }}; }})()",
            locate_script(entry)
        );
        let value = self.browser.evaluate(&script).await?;
        let x = value.get("x").and_then(Value::as_f64);
        let y = value.get("y").and_then(Value::as_f64);
        Ok(match (x, y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        })
    }

    fn record(&self, index: u32, entry: &SelectorEntry, action: &str) {
        self.interactions.lock().push(InteractedElement {
            index,
            tag_name: entry.tag_name.clone(),
            text: entry.text.clone(),
            role: entry.role.clone(),
            aria_label: entry.aria_label.clone(),
            action: action.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// JS expression resolving an element from its selector entry, falling
/// back to the xpath when the css selector misses.
fn locate_script(entry: &SelectorEntry) -> String {
    let css = serde_json::to_string(&entry.css_selector).unwrap_or_else(|_| "\"\"".to_string());
    let xpath = serde_json::to_string(entry.xpath.as_deref().unwrap_or_default())
        .unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(document.querySelector({css}) || \
         document.evaluate({xpath}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null)\
         .singleNodeValue)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_script_escapes_selectors() {
        let entry = SelectorEntry {
            css_selector: "button[name=\"q\"]".to_string(),
            xpath: Some("/html[1]/body[1]/button[1]".to_string()),
            backend_node_id: None,
            tag_name: "button".to_string(),
            role: None,
            aria_label: None,
            text: None,
        };
        let script = locate_script(&entry);
        assert!(script.contains("\"button[name=\\\"q\\\"]\""));
        assert!(script.contains("/html[1]/body[1]/button[1]"));
    }
}
