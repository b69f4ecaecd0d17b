//! End-to-end loop scenarios against a scripted model and browser.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_agent::{
    Agent, AgentSettings, FinishReason, InvokeRequest, InvokeResponse, LanguageModel, ModelError,
    RunStatus,
};
use openbrowser_commands::default_catalog;
use openbrowser_core_types::{PageMetrics, Rect, TabId, TabInfo, TokenUsage};
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::{Browser, ViewportError};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Browser serving one page with a single OK button, tracking navigation.
struct MockBrowser {
    url: Mutex<String>,
    clicks: Mutex<Vec<(f64, f64)>>,
}

impl MockBrowser {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new("about:blank".to_string()),
            clicks: Mutex::new(Vec::new()),
        })
    }

    fn dom() -> Value {
        json!({
            "strings": ["HTML", "BODY", "BUTTON", "#text", "OK",
                        "block", "visible", "1", "visible_overflow"],
            "documents": [{
                "nodes": {
                    "parentIndex": [-1, 0, 1, 2, 3],
                    "nodeType": [9, 1, 1, 1, 3],
                    "nodeName": [0, 0, 1, 2, 3],
                    "nodeValue": [-1, -1, -1, -1, 4],
                    "backendNodeId": [1, 2, 3, 4, 5],
                    "attributes": [[], [], [], [], []]
                },
                "layout": {
                    "nodeIndex": [1, 2, 3],
                    "bounds": [[0,0,1280,900],[0,0,1280,900],[10,10,80,30]],
                    "styles": [[5,6,7,8],[5,6,7,8],[5,6,7,8]],
                    "paintOrders": [1, 2, 3]
                }
            }]
        })
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), ViewportError> {
        *self.url.lock().await = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ViewportError> {
        Ok(self.url.lock().await.clone())
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

    async fn insert_text(&self, _text: &str) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn press_keys(&self, _keys: &str) -> Result<(), ViewportError> {
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
            viewport_width: 1280.0,
            viewport_height: 900.0,
            document_width: 1280.0,
            document_height: 900.0,
            ..Default::default()
        })
    }

    async fn dom_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(Self::dom())
    }

    async fn ax_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(json!({ "nodes": [] }))
    }

    async fn box_model(&self, backend_node_id: i64) -> Result<Option<Rect>, ViewportError> {
        Ok((backend_node_id == 4).then(|| Rect::new(10.0, 10.0, 80.0, 30.0)))
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

/// Model that replays a scripted sequence of decisions (or errors).
struct ScriptedModel {
    script: Mutex<VecDeque<Result<Value, ModelError>>>,
    invocations: AtomicUsize,
}

impl ScriptedModel {
    fn new(script: Vec<Result<Value, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    fn decision(actions: Value) -> Result<Value, ModelError> {
        Ok(json!({
            "currentState": {
                "evaluation": "Unknown",
                "memory": "",
                "nextGoal": "continue"
            },
            "actions": actions
        }))
    }

    fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, _request: InvokeRequest) -> Result<InvokeResponse, ModelError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front().unwrap_or_else(|| {
            Self::decision(json!([
                { "name": "finish", "params": { "text": "script exhausted", "success": false } }
            ]))
        });
        next.map(|parsed| InvokeResponse {
            parsed,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
            finish_reason: FinishReason::Stop,
        })
    }
}

fn agent(browser: Arc<MockBrowser>, model: Arc<ScriptedModel>, settings: AgentSettings) -> Agent {
    let analyzer = Arc::new(PageAnalyzer::new(
        Arc::clone(&browser) as Arc<dyn Browser>
    ));
    Agent::new(
        "test task",
        browser,
        analyzer,
        model,
        Arc::new(default_catalog()),
        settings,
    )
}

#[tokio::test]
async fn happy_path_navigate_tap_finish() {
    let browser = MockBrowser::new();
    let model = ScriptedModel::new(vec![
        ScriptedModel::decision(json!([
            { "name": "navigate", "params": { "url": "https://x" } }
        ])),
        ScriptedModel::decision(json!([
            { "name": "tap", "params": { "index": 0 } }
        ])),
        ScriptedModel::decision(json!([
            { "name": "finish", "params": { "text": "done", "success": true } }
        ])),
    ]);

    let mut agent = agent(Arc::clone(&browser), Arc::clone(&model), AgentSettings::minimal());
    let outcome = agent.run().await;

    assert_eq!(outcome.status, RunStatus::Finished);
    assert!(outcome.success);
    assert_eq!(outcome.final_result.as_deref(), Some("done"));
    assert_eq!(outcome.steps.len(), 3);
    assert!(outcome.errors.is_empty());
    assert_eq!(browser.url.lock().await.clone(), "https://x");
    // The tap resolved through the button's box model centroid.
    assert_eq!(browser.clicks.lock().await.clone(), vec![(50.0, 25.0)]);
    assert_eq!(outcome.total_usage.total_tokens, 360);
}

#[tokio::test]
async fn unknown_index_fails_step_but_run_continues() {
    let browser = MockBrowser::new();
    let model = ScriptedModel::new(vec![
        ScriptedModel::decision(json!([
            { "name": "tap", "params": { "index": 99 } }
        ])),
        ScriptedModel::decision(json!([
            { "name": "finish", "params": { "text": "recovered", "success": true } }
        ])),
    ]);

    let mut agent = agent(browser, model, AgentSettings::minimal());
    let outcome = agent.run().await;

    assert_eq!(outcome.status, RunStatus::Finished);
    assert!(outcome.success);
    assert_eq!(outcome.steps.len(), 2);

    let first = &outcome.steps[0];
    assert_eq!(first.results.len(), 1);
    assert!(!first.results[0].success);
    assert!(first.results[0]
        .error
        .as_deref()
        .unwrap_or("")
        .contains("not found"));
}

#[tokio::test]
async fn repeated_scrolling_triggers_loop_nudge() {
    let browser = MockBrowser::new();
    let scroll = || {
        ScriptedModel::decision(json!([
            { "name": "scroll", "params": { "direction": "down", "amount": 300.0 } }
        ]))
    };
    let model = ScriptedModel::new(vec![scroll(), scroll(), scroll(), scroll()]);

    let settings = AgentSettings::minimal().step_limit(4);
    let mut agent = agent(browser, model, settings);
    let outcome = agent.run().await;

    assert_eq!(outcome.status, RunStatus::StepLimit);
    // The stall was noticed and surfaced to the model.
    let transcript =
        serde_json::to_string(agent.conversation().messages()).expect("serialize transcript");
    assert!(transcript.contains("You appear to be stuck on"));
}

#[tokio::test]
async fn model_throttle_retries_once_then_aborts() {
    let model = ScriptedModel::new(vec![
        Err(ModelError::Throttled {
            retry_after_ms: Some(1),
        }),
        ScriptedModel::decision(json!([
            { "name": "finish", "params": { "text": "after retry", "success": true } }
        ])),
    ]);
    let mut first = agent(MockBrowser::new(), Arc::clone(&model), AgentSettings::minimal());
    let outcome = first.run().await;
    assert_eq!(outcome.status, RunStatus::Finished);
    assert_eq!(model.count(), 2);

    // Two throttles in a row end the run as a model failure.
    let model = ScriptedModel::new(vec![
        Err(ModelError::Throttled {
            retry_after_ms: Some(1),
        }),
        Err(ModelError::Throttled {
            retry_after_ms: Some(1),
        }),
    ]);
    let mut second = agent(MockBrowser::new(), Arc::clone(&model), AgentSettings::minimal());
    let outcome = second.run().await;
    assert_eq!(outcome.status, RunStatus::ModelFailure);
    assert!(!outcome.success);
    assert_eq!(model.count(), 2);
}

#[tokio::test]
async fn consecutive_failures_stall_the_run() {
    let browser = MockBrowser::new();
    let bad_tap = || {
        ScriptedModel::decision(json!([
            { "name": "tap", "params": { "index": 99 } }
        ]))
    };
    let model = ScriptedModel::new(vec![bad_tap(), bad_tap(), bad_tap(), bad_tap()]);

    let settings = AgentSettings::minimal().failure_threshold(3).step_limit(10);
    let mut agent = agent(browser, model, settings);
    let outcome = agent.run().await;

    assert_eq!(outcome.status, RunStatus::Stalled);
    assert!(!outcome.success);
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.contains("stalled")));
    assert_eq!(outcome.steps.len(), 3);
}

#[tokio::test]
async fn cancellation_prevents_any_inference() {
    let browser = MockBrowser::new();
    let model = ScriptedModel::new(vec![]);
    let mut agent = agent(browser, Arc::clone(&model), AgentSettings::minimal());

    agent.cancel_token().cancel();
    let outcome = agent.run().await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(outcome.cancelled);
    assert!(!outcome.success);
    assert_eq!(model.count(), 0);
    assert!(outcome.steps.is_empty());
}

#[tokio::test]
async fn action_batch_is_capped() {
    let browser = MockBrowser::new();
    let many_waits: Vec<Value> = (0..8)
        .map(|_| json!({ "name": "wait", "params": { "ms": 1 } }))
        .collect();
    let model = ScriptedModel::new(vec![
        ScriptedModel::decision(Value::Array(many_waits)),
        ScriptedModel::decision(json!([
            { "name": "finish", "params": { "text": "ok", "success": true } }
        ])),
    ]);

    // minimal() caps at 3 commands per step.
    let mut agent = agent(browser, model, AgentSettings::minimal());
    let outcome = agent.run().await;
    assert_eq!(outcome.steps[0].actions.len(), 3);
}
