//! Popup tracking: announce new pages opened by the content and bring
//! them to the front.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::browser::Browser;
use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

const CONTENT_WAIT: Duration = Duration::from_secs(5);

pub struct PopupGuard {
    teardown: TeardownStack,
}

impl PopupGuard {
    pub fn new() -> Self {
        Self {
            teardown: TeardownStack::default(),
        }
    }
}

impl Default for PopupGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Guard for PopupGuard {
    fn name(&self) -> &'static str {
        "popup"
    }

    fn priority(&self) -> u32 {
        150
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        let mut raw = ctx.raw_events();
        let viewport = Arc::clone(ctx.viewport());
        let hub = ctx.hub();

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Target.targetCreated" {
                    continue;
                }
                let info = event.params.get("targetInfo");
                let target_type = info
                    .and_then(|i| i.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let opener = info.and_then(|i| i.get("openerId")).and_then(Value::as_str);
                // Only pages opened by existing content count as popups.
                if target_type != "page" || opener.is_none() {
                    continue;
                }
                let Some(target_id) = info
                    .and_then(|i| i.get("targetId"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                else {
                    continue;
                };

                metrics::record_guard_event();
                let viewport = Arc::clone(&viewport);
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    // Let the registry catch up, then wait for the popup
                    // document before announcing it.
                    let mut tab = None;
                    for _ in 0..40 {
                        if let Some(found) = viewport.tab_for_target(&target_id) {
                            tab = Some(found);
                            break;
                        }
                        sleep(Duration::from_millis(50)).await;
                    }
                    let Some(tab) = tab else {
                        debug!(target: "guard-popup", %target_id, "popup vanished before attach");
                        return;
                    };

                    let ready = timeout(CONTENT_WAIT, async {
                        loop {
                            if let Some(url) = viewport.tab_url(&tab) {
                                if !url.is_empty() && url != "about:blank" {
                                    return url;
                                }
                            }
                            sleep(Duration::from_millis(100)).await;
                        }
                    })
                    .await;

                    let url = match ready {
                        Ok(url) => url,
                        Err(_) => viewport.tab_url(&tab).unwrap_or_default(),
                    };

                    let opener = viewport.current_tab().await;
                    hub.publish_lossy(ViewportEvent::TabOpened {
                        tab: tab.clone(),
                        url,
                        opener,
                    });
                    if let Err(err) = viewport.focus_tab(&tab).await {
                        warn!(target: "guard-popup", ?err, "failed to focus popup");
                    }
                });
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
    }
}
