//! Executor semantics: sequence truncation, error funneling, validation
//! and masking at the named entry point.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_commands::{
    default_catalog, Command, CommandError, CommandExecutor, ExecutionContext,
};
use openbrowser_commands::model::{
    FinishParams, NavigateParams, PressKeysParams, WaitParams,
};
use openbrowser_core_types::{PageMetrics, Rect, TabId, TabInfo};
use openbrowser_viewport::{Browser, ViewportError};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Browser stub whose URL flips after every `press_keys`, mimicking an
/// in-page navigation triggered by a keystroke.
struct FlippingBrowser {
    url: Mutex<String>,
    pressed: Mutex<Vec<String>>,
    navigations: Mutex<Vec<String>>,
}

impl FlippingBrowser {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new("https://start.example/".to_string()),
            pressed: Mutex::new(Vec::new()),
            navigations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Browser for FlippingBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), ViewportError> {
        self.navigations.lock().await.push(url.to_string());
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
        Ok(Value::String(String::new()))
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn insert_text(&self, _text: &str) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn press_keys(&self, keys: &str) -> Result<(), ViewportError> {
        self.pressed.lock().await.push(keys.to_string());
        let mut url = self.url.lock().await;
        *url = format!("{}next", *url);
        Ok(())
    }

    async fn scroll_by(&self, _dx: f64, _dy: f64) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, ViewportError> {
        Ok(Vec::new())
    }

    async fn page_metrics(&self) -> Result<PageMetrics, ViewportError> {
        Ok(PageMetrics::default())
    }

    async fn dom_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(json!({ "documents": [], "strings": [] }))
    }

    async fn ax_snapshot(&self) -> Result<Value, ViewportError> {
        Ok(json!({ "nodes": [] }))
    }

    async fn box_model(&self, _backend_node_id: i64) -> Result<Option<Rect>, ViewportError> {
        Ok(None)
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

fn context(browser: Arc<FlippingBrowser>) -> ExecutionContext {
    ExecutionContext {
        browser: Some(browser),
        ..Default::default()
    }
}

fn executor() -> CommandExecutor {
    CommandExecutor::new(Arc::new(default_catalog()))
}

#[tokio::test]
async fn url_change_truncates_batch() {
    let browser = FlippingBrowser::new();
    let ctx = context(Arc::clone(&browser));
    let executor = executor();

    let batch = vec![
        Command::Wait(WaitParams { ms: 1 }),
        Command::PressKeys(PressKeysParams {
            keys: "Enter".into(),
        }),
        Command::Wait(WaitParams { ms: 1 }),
    ];
    let results = executor.execute_batch(&batch, &ctx).await;

    // The keystroke changed the URL; the trailing wait never ran.
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
}

#[tokio::test]
async fn page_changing_action_truncates_batch() {
    let browser = FlippingBrowser::new();
    let ctx = context(Arc::clone(&browser));
    let executor = executor();

    let batch = vec![
        Command::Navigate(NavigateParams {
            url: "https://x.example/".into(),
        }),
        Command::Wait(WaitParams { ms: 1 }),
    ];
    let results = executor.execute_batch(&batch, &ctx).await;
    assert_eq!(results.len(), 1);
    assert_eq!(browser.navigations.lock().await.clone(), vec![
        "https://x.example/".to_string()
    ]);
}

#[tokio::test]
async fn finish_terminates_and_reports_done() {
    let browser = FlippingBrowser::new();
    let ctx = context(browser);
    let executor = executor();

    let batch = vec![
        Command::Finish(FinishParams {
            text: "done".into(),
            success: true,
        }),
        Command::Wait(WaitParams { ms: 1 }),
    ];
    let results = executor.execute_batch(&batch, &ctx).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].is_done, Some(true));
    assert_eq!(results[0].extracted_content.as_deref(), Some("done"));
}

#[tokio::test]
async fn handler_errors_become_failed_results() {
    let browser = FlippingBrowser::new();
    let ctx = context(browser);
    let executor = executor();

    // tap needs an analyzer, which this context does not provide.
    let result = executor
        .execute(&Command::Tap(openbrowser_commands::model::TapParams { index: 0 }), &ctx)
        .await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("analyzer"));
}

#[tokio::test]
async fn named_execution_validates_strictly() {
    let browser = FlippingBrowser::new();
    let ctx = context(browser);
    let executor = executor();

    let err = executor
        .execute_named("tap", json!({ "index": 1, "bogus": 2 }), &ctx)
        .await
        .expect_err("must fail validation");
    assert!(matches!(err, CommandError::ValidationFailed { .. }));

    let err = executor
        .execute_named("does_not_exist", json!({}), &ctx)
        .await
        .expect_err("must be unregistered");
    assert!(matches!(err, CommandError::NotRegistered { .. }));
}

#[tokio::test]
async fn masking_applies_before_validation() {
    let browser = FlippingBrowser::new();
    let mut ctx = context(Arc::clone(&browser));
    ctx.masked_values =
        HashMap::from([("password".to_string(), "hunter2".to_string())]);
    let executor = executor();

    let result = executor
        .execute_named("press_keys", json!({ "keys": "hunter2" }), &ctx)
        .await
        .expect("press_keys runs");
    assert!(result.success);
    // The secret was replaced by its marker before the handler saw it.
    assert_eq!(browser.pressed.lock().await.clone(), vec!["<password>"]);
}
