//! HTTP archive capture over the `Network` domain.
//!
//! Entries accumulate in memory and are written as HAR 1.2 JSON when the
//! guard detaches. There is no backpressure; long sessions should rotate
//! the output by detaching and re-attaching.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::ViewportError;
use crate::har::{headers_from_json, Har, HarEntry};
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

pub struct HarCaptureGuard {
    output_path: PathBuf,
    /// Entry cap; zero means unbounded.
    max_entries: usize,
    state: Arc<Mutex<CaptureState>>,
    teardown: TeardownStack,
}

#[derive(Default)]
struct CaptureState {
    har: Har,
    // requestId -> index into har.log.entries
    open: HashMap<String, usize>,
    started: HashMap<String, std::time::Instant>,
}

impl HarCaptureGuard {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            max_entries: 0,
            state: Arc::new(Mutex::new(CaptureState::default())),
            teardown: TeardownStack::default(),
        }
    }

    pub fn with_max_entries(mut self, cap: usize) -> Self {
        self.max_entries = cap;
        self
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.har.log.entries.len()
    }
}

#[async_trait]
impl Guard for HarCaptureGuard {
    fn name(&self) -> &'static str {
        "har-capture"
    }

    fn priority(&self) -> u32 {
        500
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        ctx.viewport()
            .send_page_command("Network.enable", json!({}))
            .await?;

        let mut raw = ctx.raw_events();
        let state = Arc::clone(&self.state);
        let max_entries = self.max_entries;

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                let Some(request_id) = event
                    .params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                else {
                    continue;
                };
                match event.method.as_str() {
                    "Network.requestWillBeSent" => {
                        metrics::record_guard_event();
                        let request = event.params.get("request");
                        let method = request
                            .and_then(|r| r.get("method"))
                            .and_then(Value::as_str)
                            .unwrap_or("GET")
                            .to_string();
                        let url = request
                            .and_then(|r| r.get("url"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let headers = request
                            .and_then(|r| r.get("headers"))
                            .map(headers_from_json)
                            .unwrap_or_default();

                        let mut guard = state.lock().await;
                        if max_entries > 0 && guard.har.log.entries.len() >= max_entries {
                            continue;
                        }
                        let index = guard.har.log.entries.len();
                        guard
                            .har
                            .log
                            .entries
                            .push(HarEntry::started(method, url, headers));
                        guard.open.insert(request_id.clone(), index);
                        guard
                            .started
                            .insert(request_id, std::time::Instant::now());
                    }
                    "Network.responseReceived" => {
                        let response = event.params.get("response");
                        let mut guard = state.lock().await;
                        let Some(&index) = guard.open.get(&request_id) else {
                            continue;
                        };
                        let entry = &mut guard.har.log.entries[index];
                        if let Some(response) = response {
                            entry.response.status =
                                response.get("status").and_then(Value::as_i64).unwrap_or(0);
                            entry.response.status_text = response
                                .get("statusText")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            entry.response.content.mime_type = response
                                .get("mimeType")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            if let Some(headers) = response.get("headers") {
                                entry.response.headers = headers_from_json(headers);
                            }
                        }
                    }
                    "Network.loadingFinished" | "Network.loadingFailed" => {
                        let length = event
                            .params
                            .get("encodedDataLength")
                            .and_then(Value::as_f64)
                            .unwrap_or(-1.0);
                        let mut guard = state.lock().await;
                        let Some(index) = guard.open.remove(&request_id) else {
                            continue;
                        };
                        let elapsed = guard
                            .started
                            .remove(&request_id)
                            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
                            .unwrap_or(-1.0);
                        let entry = &mut guard.har.log.entries[index];
                        entry.time = elapsed;
                        entry.timings.wait = elapsed;
                        entry.timings.receive = 0.0;
                        entry.response.body_size = length as i64;
                        entry.response.content.size = length as i64;
                        if event.method == "Network.loadingFailed" {
                            entry.response.status_text = event
                                .params
                                .get("errorText")
                                .and_then(Value::as_str)
                                .unwrap_or("failed")
                                .to_string();
                        }
                    }
                    _ => {}
                }
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;

        let har = {
            let guard = self.state.lock().await;
            serde_json::to_vec_pretty(&guard.har)
        };
        match har {
            Ok(bytes) => {
                if let Some(parent) = self.output_path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                match std::fs::write(&self.output_path, bytes) {
                    Ok(()) => {
                        info!(target: "guard-har", path = %self.output_path.display(), "har written")
                    }
                    Err(err) => warn!(target: "guard-har", ?err, "failed to write har"),
                }
            }
            Err(err) => warn!(target: "guard-har", ?err, "failed to serialize har"),
        }
    }
}
