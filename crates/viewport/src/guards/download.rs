//! Download capture: route browser downloads into a directory, dedupe
//! filenames, and expose a waitable completion signal plus a history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    InProgress,
    Completed,
    Canceled,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    pub suggested_name: String,
    pub saved_path: PathBuf,
    pub file_size: u64,
    pub status: DownloadStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub struct DownloadGuard {
    directory: PathBuf,
    history: Arc<Mutex<Vec<DownloadRecord>>>,
    completed_tx: watch::Sender<Option<DownloadRecord>>,
    completed_rx: watch::Receiver<Option<DownloadRecord>>,
    teardown: TeardownStack,
}

impl DownloadGuard {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let (completed_tx, completed_rx) = watch::channel(None);
        Self {
            directory: directory.into(),
            history: Arc::new(Mutex::new(Vec::new())),
            completed_tx,
            completed_rx,
            teardown: TeardownStack::default(),
        }
    }

    pub async fn history(&self) -> Vec<DownloadRecord> {
        self.history.lock().await.clone()
    }

    /// Wait for the next download to finish.
    pub async fn wait_for_download(
        &self,
        wait: Duration,
    ) -> Result<DownloadRecord, ViewportError> {
        let mut rx = self.completed_rx.clone();
        // Only downloads completed after this call count.
        let _ = rx.borrow_and_update();
        timeout(wait, async {
            loop {
                rx.changed()
                    .await
                    .map_err(|_| ViewportError::internal("download channel closed"))?;
                let value = rx.borrow().clone();
                if let Some(record) = value {
                    return Ok(record);
                }
            }
        })
        .await
        .map_err(|_| ViewportError::timeout("waiting for download"))?
    }
}

/// `report.pdf` collides -> `report-1a2b3c4d.pdf`.
fn dedupe_filename(directory: &Path, suggested: &str) -> PathBuf {
    let candidate = directory.join(suggested);
    if !candidate.exists() {
        return candidate;
    }
    let suffix: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    let path = Path::new(suggested);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => directory.join(format!("{stem}-{suffix}.{ext}")),
        None => directory.join(format!("{stem}-{suffix}")),
    }
}

#[async_trait]
impl Guard for DownloadGuard {
    fn name(&self) -> &'static str {
        "download"
    }

    fn priority(&self) -> u32 {
        300
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|err| ViewportError::internal(format!("download dir: {err}")))?;

        ctx.viewport()
            .send_command(
                "Browser.setDownloadBehavior",
                json!({
                    "behavior": "allow",
                    "downloadPath": self.directory.to_string_lossy(),
                    "eventsEnabled": true,
                }),
            )
            .await?;

        let mut raw = ctx.raw_events();
        let hub = ctx.hub();
        let history = Arc::clone(&self.history);
        let directory = self.directory.clone();
        let completed_tx = self.completed_tx.clone();

        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                match event.method.as_str() {
                    "Browser.downloadWillBegin" => {
                        metrics::record_guard_event();
                        metrics::record_download();
                        let id = event
                            .params
                            .get("guid")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let suggested = event
                            .params
                            .get("suggestedFilename")
                            .and_then(Value::as_str)
                            .unwrap_or("download")
                            .to_string();
                        let url = event
                            .params
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let saved_path = dedupe_filename(&directory, &suggested);
                        debug!(target: "guard-download", %id, path = %saved_path.display(), "download started");
                        history.lock().await.push(DownloadRecord {
                            id: id.clone(),
                            url,
                            suggested_name: suggested.clone(),
                            saved_path,
                            file_size: 0,
                            status: DownloadStatus::InProgress,
                            started_at: chrono::Utc::now(),
                        });
                        hub.publish_lossy(ViewportEvent::DownloadStarted {
                            id,
                            suggested_name: suggested,
                        });
                    }
                    "Browser.downloadProgress" => {
                        let id = event
                            .params
                            .get("guid")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let state = event
                            .params
                            .get("state")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let received = event
                            .params
                            .get("receivedBytes")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        if state != "completed" && state != "canceled" {
                            continue;
                        }
                        let record = {
                            let mut guard = history.lock().await;
                            let Some(record) = guard.iter_mut().find(|r| r.id == id) else {
                                continue;
                            };
                            record.file_size = received.max(record.file_size);
                            record.status = if state == "completed" {
                                DownloadStatus::Completed
                            } else {
                                DownloadStatus::Canceled
                            };
                            // Chromium saves under the suggested name; the
                            // deduped path is where we expect it to land.
                            record.clone()
                        };
                        if record.status == DownloadStatus::Completed {
                            hub.publish_lossy(ViewportEvent::DownloadCompleted {
                                id: record.id.clone(),
                                saved_path: record.saved_path.clone(),
                                file_size: record.file_size,
                            });
                            if completed_tx.send(Some(record)).is_err() {
                                warn!(target: "guard-download", "completion receiver dropped");
                            }
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dedupes_existing_filenames() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("report.pdf"), b"x").expect("seed file");

        let path = dedupe_filename(dir.path(), "report.pdf");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_ne!(name, "report.pdf");
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".pdf"));
        // base + '-' + 8 hex chars + extension
        assert_eq!(name.len(), "report-".len() + 8 + ".pdf".len());
    }

    #[test]
    fn fresh_names_pass_through() {
        let dir = tempdir().expect("tempdir");
        let path = dedupe_filename(dir.path(), "data.csv");
        assert_eq!(path.file_name().unwrap().to_string_lossy(), "data.csv");
    }
}
