//! Origin-scoped permission grants, re-applied on every origin change.

use std::sync::Arc;

use async_trait::async_trait;
use openbrowser_event_hub::EventHub;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

pub struct PermissionsGuard {
    permissions: Vec<String>,
    granted_origin: Arc<Mutex<Option<String>>>,
    teardown: TeardownStack,
}

impl PermissionsGuard {
    /// `permissions` uses CDP permission names, e.g. `geolocation`,
    /// `notifications`, `clipboardReadWrite`.
    pub fn new(permissions: Vec<String>) -> Self {
        Self {
            permissions,
            granted_origin: Arc::new(Mutex::new(None)),
            teardown: TeardownStack::default(),
        }
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let scheme = parsed.scheme();
    Some(match parsed.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

#[async_trait]
impl Guard for PermissionsGuard {
    fn name(&self) -> &'static str {
        "permissions"
    }

    fn priority(&self) -> u32 {
        400
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        if self.permissions.is_empty() {
            return Ok(());
        }

        let mut events = ctx.hub().subscribe();
        let viewport = Arc::clone(ctx.viewport());
        let permissions = self.permissions.clone();
        let granted_origin = Arc::clone(&self.granted_origin);

        let task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let ViewportEvent::Navigated { url, .. } = event else {
                    continue;
                };
                let Some(origin) = origin_of(&url) else {
                    continue;
                };
                {
                    let seen = granted_origin.lock().await;
                    if seen.as_deref() == Some(origin.as_str()) {
                        continue;
                    }
                }
                metrics::record_guard_event();
                let result = viewport
                    .send_command(
                        "Browser.grantPermissions",
                        json!({ "origin": origin, "permissions": permissions }),
                    )
                    .await;
                match result {
                    Ok(_) => {
                        debug!(target: "guard-permissions", %origin, "permissions granted");
                        *granted_origin.lock().await = Some(origin);
                    }
                    Err(err) => {
                        warn!(target: "guard-permissions", ?err, %origin, "grant failed")
                    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_origins_with_ports() {
        assert_eq!(
            origin_of("https://example.com/a/b?c=d"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            origin_of("http://localhost:8080/x"),
            Some("http://localhost:8080".to_string())
        );
        assert_eq!(origin_of("about:blank"), None);
    }
}
