//! Navigation-request interception against an allow/block policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

/// Base-domain allow/block lists. An empty allow list admits everything
/// not blocked; subdomains match their base domain, `www.` is stripped.
#[derive(Clone, Debug, Default)]
pub struct UrlPolicy {
    pub allowed: Vec<String>,
    pub blocked: Vec<String>,
}

impl UrlPolicy {
    pub fn allow(mut self, domain: impl Into<String>) -> Self {
        self.allowed.push(domain.into());
        self
    }

    pub fn block(mut self, domain: impl Into<String>) -> Self {
        self.blocked.push(domain.into());
        self
    }

    /// Returns the violated rule, or `None` when the URL is admissible.
    pub fn violation(&self, url: &str) -> Option<String> {
        let host = Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

        for blocked in &self.blocked {
            if domain_matches(blocked, &host) {
                return Some(format!("blocked domain '{blocked}'"));
            }
        }
        if !self.allowed.is_empty()
            && !self
                .allowed
                .iter()
                .any(|allowed| domain_matches(allowed, &host))
        {
            return Some("not in allowed domains".to_string());
        }
        None
    }
}

/// `example.com` matches itself and any subdomain of itself.
pub fn domain_matches(base: &str, host: &str) -> bool {
    let base = base
        .trim()
        .to_ascii_lowercase()
        .trim_start_matches("www.")
        .to_string();
    host == base || host.ends_with(&format!(".{base}"))
}

pub struct UrlPolicyGuard {
    policy: UrlPolicy,
    teardown: TeardownStack,
}

impl UrlPolicyGuard {
    pub fn new(policy: UrlPolicy) -> Self {
        Self {
            policy,
            teardown: TeardownStack::default(),
        }
    }
}

#[async_trait]
impl Guard for UrlPolicyGuard {
    fn name(&self) -> &'static str {
        "url-policy"
    }

    fn priority(&self) -> u32 {
        50
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        // Intercept only top-level navigation requests; subresource
        // fetches are admitted untouched.
        ctx.viewport()
            .send_page_command(
                "Fetch.enable",
                json!({
                    "patterns": [{ "urlPattern": "*", "resourceType": "Document", "requestStage": "Request" }]
                }),
            )
            .await?;

        let mut raw = ctx.raw_events();
        let viewport = Arc::clone(ctx.viewport());
        let hub = ctx.hub();
        let policy = self.policy.clone();

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Fetch.requestPaused" {
                    continue;
                }
                let Some(session) = event.session_id.clone() else {
                    continue;
                };
                let Some(request_id) = event
                    .params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                else {
                    continue;
                };
                let url = event
                    .params
                    .get("request")
                    .and_then(|r| r.get("url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                match policy.violation(&url) {
                    Some(rule) => {
                        metrics::record_guard_event();
                        warn!(target: "guard-url-policy", %url, %rule, "navigation blocked");
                        let result = viewport
                            .send_session_command(
                                &session,
                                "Fetch.failRequest",
                                json!({ "requestId": request_id, "errorReason": "BlockedByClient" }),
                            )
                            .await;
                        if let Err(err) = result {
                            warn!(target: "guard-url-policy", ?err, "failRequest error");
                        }
                        hub.publish_lossy(ViewportEvent::PolicyViolation { url, rule });
                    }
                    None => {
                        let result = viewport
                            .send_session_command(
                                &session,
                                "Fetch.continueRequest",
                                json!({ "requestId": request_id }),
                            )
                            .await;
                        if let Err(err) = result {
                            debug!(target: "guard-url-policy", ?err, "continueRequest error");
                        }
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
    fn subdomain_matches_base() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("example.com", "shop.example.com"));
        assert!(!domain_matches("example.com", "example.com.evil.io"));
        assert!(!domain_matches("example.com", "notexample.com"));
    }

    #[test]
    fn block_list_beats_allow_list() {
        let policy = UrlPolicy::default()
            .allow("example.com")
            .block("ads.example.com");
        assert!(policy.violation("https://ads.example.com/track").is_some());
        assert!(policy.violation("https://example.com/").is_none());
    }

    #[test]
    fn empty_allow_list_admits_everything_unblocked() {
        let policy = UrlPolicy::default().block("bad.io");
        assert!(policy.violation("https://good.io/").is_none());
        assert!(policy.violation("https://www.bad.io/").is_some());
    }

    #[test]
    fn www_is_stripped_from_hosts() {
        let policy = UrlPolicy::default().allow("example.com");
        assert!(policy.violation("https://www.example.com/").is_none());
        assert!(policy.violation("https://other.org/").is_some());
    }
}
