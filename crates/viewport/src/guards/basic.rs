//! Small single-concern guards: liveness probe, dialog auto-accept,
//! blank-page recovery and crash handling.

use std::sync::Arc;

use async_trait::async_trait;
use openbrowser_event_hub::EventHub;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::browser::Browser;
use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

/// Sanity probe: verifies the initial page answers before anything else
/// attaches. Attach fails when the page is already detached.
pub struct LocalInstanceGuard {
    teardown: TeardownStack,
}

impl LocalInstanceGuard {
    pub fn new() -> Self {
        Self {
            teardown: TeardownStack::default(),
        }
    }
}

impl Default for LocalInstanceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for LocalInstanceGuard {
    fn name(&self) -> &'static str {
        "local-instance"
    }

    fn priority(&self) -> u32 {
        10
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let url = ctx.viewport().current_url().await?;
        debug!(target: "guard-local-instance", %url, "initial page responded");
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}

/// Auto-accepts javascript dialogs (alert/confirm/prompt/beforeunload) so
/// the agent never deadlocks on a modal.
pub struct DialogGuard {
    teardown: TeardownStack,
}

impl DialogGuard {
    pub fn new() -> Self {
        Self {
            teardown: TeardownStack::default(),
        }
    }
}

impl Default for DialogGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for DialogGuard {
    fn name(&self) -> &'static str {
        "default-handler"
    }

    fn priority(&self) -> u32 {
        100
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let mut raw = ctx.raw_events();
        let viewport = Arc::clone(ctx.viewport());
        let hub = ctx.hub();

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Page.javascriptDialogOpening" {
                    continue;
                }
                metrics::record_guard_event();
                let kind = event
                    .params
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("alert")
                    .to_string();
                let message = event
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let Some(session) = event.session_id.clone() else {
                    continue;
                };
                if let Err(err) = viewport
                    .send_session_command(
                        &session,
                        "Page.handleJavaScriptDialog",
                        json!({ "accept": true }),
                    )
                    .await
                {
                    warn!(target: "guard-dialog", ?err, "failed to accept dialog");
                    continue;
                }
                let _ = hub
                    .publish(ViewportEvent::DialogHandled { kind, message })
                    .await;
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}

/// Navigations landing on `about:blank` are usually a broken redirect;
/// issue a best-effort back-navigation.
pub struct BlankPageGuard {
    teardown: TeardownStack,
}

impl BlankPageGuard {
    pub fn new() -> Self {
        Self {
            teardown: TeardownStack::default(),
        }
    }
}

impl Default for BlankPageGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for BlankPageGuard {
    fn name(&self) -> &'static str {
        "blank-page"
    }

    fn priority(&self) -> u32 {
        400
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let mut events = ctx.hub().subscribe();
        let viewport = Arc::clone(ctx.viewport());

        let task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let ViewportEvent::Navigated { tab, url } = event else {
                    continue;
                };
                if url != "about:blank" {
                    continue;
                }
                // Freshly opened tabs legitimately sit on about:blank.
                if viewport.current_tab().await.as_ref() != Some(&tab) {
                    continue;
                }
                metrics::record_guard_event();
                if let Err(err) = viewport.go_back().await {
                    debug!(target: "guard-blank-page", ?err, "back navigation failed");
                }
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}

/// Reports renderer crashes and opens a replacement page so the next
/// extract can succeed.
pub struct CrashGuard {
    teardown: TeardownStack,
}

impl CrashGuard {
    pub fn new() -> Self {
        Self {
            teardown: TeardownStack::default(),
        }
    }
}

impl Default for CrashGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for CrashGuard {
    fn name(&self) -> &'static str {
        "crash"
    }

    fn priority(&self) -> u32 {
        500
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let mut raw = ctx.raw_events();
        let viewport = Arc::clone(ctx.viewport());
        let hub = ctx.hub();

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Inspector.targetCrashed" {
                    continue;
                }
                metrics::record_guard_event();
                metrics::record_crash();
                let tab = event
                    .session_id
                    .as_deref()
                    .and_then(|sid| viewport.tab_for_session(sid));
                warn!(target: "guard-crash", ?tab, "renderer crashed");
                hub.publish_lossy(ViewportEvent::Crash {
                    tab,
                    message: "renderer target crashed".to_string(),
                });
                if let Err(err) = viewport.open_replacement_page().await {
                    warn!(target: "guard-crash", ?err, "failed to open replacement page");
                }
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}
