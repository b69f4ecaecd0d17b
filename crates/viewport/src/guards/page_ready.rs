//! DOM stability tracking.
//!
//! Combines page lifecycle events with an injected MutationObserver that
//! reports aggregate mutation counts through a runtime binding. After the
//! configured window of mutation silence a `content-ready` event is
//! published; `wait_for_dom_stable` exposes the same signal imperatively.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, Instant};
use tracing::debug;

use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

const MUTATION_BINDING: &str = "__openbrowserMutations";

const OBSERVER_SCRIPT: &str = r#"
(() => {
    const post = (count) => {
        try { window.__openbrowserMutations(String(count)); } catch (e) {}
    };
    const observe = () => {
        const root = document.documentElement || document;
        new MutationObserver((muts) => post(muts.length))
            .observe(root, { subtree: true, childList: true, attributes: true, characterData: true });
    };
    if (document.documentElement) {
        observe();
    } else {
        document.addEventListener('DOMContentLoaded', observe, { once: true });
    }
})();
"#;

#[derive(Debug)]
struct ReadyState {
    last_activity: Instant,
    announced: bool,
}

pub struct PageReadyGuard {
    idle_timeout: Duration,
    state: Arc<Mutex<ReadyState>>,
    teardown: TeardownStack,
}

impl PageReadyGuard {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            state: Arc::new(Mutex::new(ReadyState {
                last_activity: Instant::now(),
                announced: false,
            })),
            teardown: TeardownStack::default(),
        }
    }

    /// Resolve once the DOM has been mutation-silent for the idle window,
    /// or fail with a timeout.
    pub async fn wait_for_dom_stable(&self, timeout: Duration) -> Result<(), ViewportError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock().await;
                if state.last_activity.elapsed() >= self.idle_timeout {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ViewportError::timeout("waiting for DOM stability"));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl Guard for PageReadyGuard {
    fn name(&self) -> &'static str {
        "page-ready"
    }

    fn priority(&self) -> u32 {
        200
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let viewport = ctx.viewport();
        viewport.send_page_command("Page.enable", json!({})).await?;
        viewport
            .send_page_command("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        viewport
            .send_page_command("Runtime.addBinding", json!({ "name": MUTATION_BINDING }))
            .await?;
        viewport
            .send_page_command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": OBSERVER_SCRIPT }),
            )
            .await?;
        // Arm the observer on the already-loaded document as well.
        let _ = viewport
            .send_page_command(
                "Runtime.evaluate",
                json!({ "expression": OBSERVER_SCRIPT, "returnByValue": true }),
            )
            .await;

        let mut raw = ctx.raw_events();
        let state = Arc::clone(&self.state);
        let listener = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                let activity = match event.method.as_str() {
                    "Runtime.bindingCalled" => event
                        .params
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|name| name == MUTATION_BINDING)
                        .unwrap_or(false),
                    "Page.lifecycleEvent" => {
                        let name = event
                            .params
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        matches!(name, "DOMContentLoaded" | "load" | "init")
                    }
                    _ => false,
                };
                if activity {
                    let mut guard = state.lock().await;
                    guard.last_activity = Instant::now();
                    guard.announced = false;
                }
            }
        });
        self.teardown.push(listener).await;

        let state = Arc::clone(&self.state);
        let hub = ctx.hub();
        let viewport = Arc::clone(ctx.viewport());
        let idle_timeout = self.idle_timeout;
        let watcher = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(100));
            loop {
                ticker.tick().await;
                let mut guard = state.lock().await;
                if !guard.announced && guard.last_activity.elapsed() >= idle_timeout {
                    guard.announced = true;
                    drop(guard);
                    metrics::record_guard_event();
                    if let Some(tab) = viewport.current_tab().await {
                        debug!(target: "guard-page-ready", %tab, "content ready");
                        hub.publish_lossy(ViewportEvent::ContentReady { tab });
                    }
                }
            }
        });
        self.teardown.push(watcher).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}
