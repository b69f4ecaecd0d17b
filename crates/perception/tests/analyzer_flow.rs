//! Analyzer flow against a scripted browser: extraction invariants and
//! index-addressed interaction.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_core_types::{PageMetrics, Rect, TabId, TabInfo};
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::{Browser, ViewportError};
use serde_json::{json, Value};
use tokio::sync::Mutex;

struct StubBrowser {
    dom: Value,
    ax: Value,
    clicks: Mutex<Vec<(f64, f64)>>,
    typed: Mutex<Vec<String>>,
    keys: Mutex<Vec<String>>,
}

impl StubBrowser {
    fn new() -> Arc<Self> {
        // html > body > (button#go "Go", input[name=q])
        let dom = json!({
            "strings": [
                "HTML", "BODY", "BUTTON", "INPUT", "#text", "Go",
                "id", "go", "name", "q", "type", "text",
                "block", "visible", "1", "visible_overflow"
            ],
            "documents": [{
                "nodes": {
                    "parentIndex": [-1, 0, 1, 2, 3, 2],
                    "nodeType": [9, 1, 1, 1, 3, 1],
                    "nodeName": [0, 0, 1, 2, 4, 3],
                    "nodeValue": [-1, -1, -1, -1, 5, -1],
                    "backendNodeId": [1, 2, 3, 4, 5, 6],
                    "attributes": [[], [], [], [6, 7], [], [8, 9, 10, 11]]
                },
                "layout": {
                    "nodeIndex": [1, 2, 3, 5],
                    "bounds": [
                        [0.0, 0.0, 1280.0, 900.0],
                        [0.0, 0.0, 1280.0, 900.0],
                        [10.0, 10.0, 100.0, 40.0],
                        [10.0, 100.0, 300.0, 30.0]
                    ],
                    "styles": [[12,13,14,15],[12,13,14,15],[12,13,14,15],[12,13,14,15]],
                    "paintOrders": [1, 2, 3, 4]
                }
            }]
        });
        let ax = json!({
            "nodes": [
                { "backendDOMNodeId": 4, "role": { "value": "button" }, "name": { "value": "Go" } },
                { "backendDOMNodeId": 6, "role": { "value": "textbox" } }
            ]
        });
        Arc::new(Self {
            dom,
            ax,
            clicks: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            keys: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Browser for StubBrowser {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ViewportError> {
        Ok("https://example.com/".to_string())
    }

    async fn go_back(&self) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value, ViewportError> {
        Ok(Value::Null)
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), ViewportError> {
        self.clicks.lock().await.push((x, y));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), ViewportError> {
        self.typed.lock().await.push(text.to_string());
        Ok(())
    }

    async fn press_keys(&self, keys: &str) -> Result<(), ViewportError> {
        self.keys.lock().await.push(keys.to_string());
        Ok(())
    }

    async fn scroll_by(&self, _dx: f64, _dy: f64) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, ViewportError> {
        Ok(Vec::new())
    }

    async fn page_metrics(&self) -> Result<PageMetrics, ViewportError> {
        Ok(PageMetrics {
            scroll_x: 0.0,
            scroll_y: 0.0,
            viewport_width: 1280.0,
            viewport_height: 900.0,
            document_width: 1280.0,
            document_height: 900.0,
        })
    }

    async fn dom_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(self.dom.clone())
    }

    async fn ax_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(self.ax.clone())
    }

    async fn box_model(&self, backend_node_id: i64) -> Result<Option<Rect>, ViewportError> {
        Ok(match backend_node_id {
            4 => Some(Rect::new(10.0, 10.0, 100.0, 40.0)),
            6 => Some(Rect::new(10.0, 100.0, 300.0, 30.0)),
            _ => None,
        })
    }

    async fn set_file_input(
        &self,
        _backend_node_id: i64,
        _files: &[&Path],
    ) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn open_tab(&self, _url: &str) -> Result<TabId, ViewportError> {
        Ok(TabId::new())
    }

    async fn close_tab(&self, _tab: &TabId) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn focus_tab(&self, _tab: &TabId) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn list_tabs(&self) -> Vec<TabInfo> {
        Vec::new()
    }
}

#[tokio::test]
async fn selector_map_is_dense_and_matches_tree() {
    let browser = StubBrowser::new();
    let analyzer = PageAnalyzer::new(browser);
    let state = analyzer.extract_state().await.expect("extract");

    assert_eq!(state.interactive_element_count, 2);
    let keys: Vec<u32> = state.selector_map.keys().copied().collect();
    assert_eq!(keys, vec![0, 1]);

    for (index, entry) in &state.selector_map {
        assert!(
            state.tree.contains(&format!("[{index}]<{}", entry.tag_name)),
            "tree must serialize [{index}] as <{}>",
            entry.tag_name
        );
    }
}

#[tokio::test]
async fn click_by_index_uses_backend_geometry() {
    let browser = StubBrowser::new();
    let analyzer = PageAnalyzer::new(Arc::clone(&browser) as Arc<dyn Browser>);
    analyzer.extract_state().await.expect("extract");

    analyzer.click_element_by_index(0).await.expect("click");

    let clicks = browser.clicks.lock().await.clone();
    assert_eq!(clicks, vec![(60.0, 30.0)]);
}

#[tokio::test]
async fn type_by_index_focuses_clears_and_inserts() {
    let browser = StubBrowser::new();
    let analyzer = PageAnalyzer::new(Arc::clone(&browser) as Arc<dyn Browser>);
    analyzer.extract_state().await.expect("extract");

    analyzer
        .input_text_by_index(1, "rust agents", true)
        .await
        .expect("type");

    assert_eq!(browser.typed.lock().await.clone(), vec!["rust agents"]);
    assert_eq!(browser.keys.lock().await.clone(), vec!["Control+a"]);
    // Focus click landed on the input's center.
    assert_eq!(browser.clicks.lock().await.clone(), vec![(160.0, 115.0)]);
}

#[tokio::test]
async fn unknown_index_is_element_not_found() {
    let browser = StubBrowser::new();
    let analyzer = PageAnalyzer::new(browser);
    analyzer.extract_state().await.expect("extract");

    let err = analyzer.click_element_by_index(99).await.expect_err("miss");
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn interaction_log_is_append_only_and_ordered() {
    let browser = StubBrowser::new();
    let analyzer = PageAnalyzer::new(browser);
    analyzer.extract_state().await.expect("extract");

    analyzer.click_element_by_index(0).await.expect("click");
    analyzer
        .input_text_by_index(1, "x", false)
        .await
        .expect("type");

    let log = analyzer.interacted_elements();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].action, "click");
    assert_eq!(log[1].action, "type");
    assert!(log[0].timestamp <= log[1].timestamp);
}
