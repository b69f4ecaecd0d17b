//! Session recording, either through the native trace or a CDP
//! screencast. `Auto` prefers tracing and falls back to the screencast
//! when tracing cannot start.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::ViewportError;
use crate::metrics;

use super::{Guard, GuardContext, TeardownStack};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Tracing,
    Screencast,
    Auto,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VideoCaptureSettings {
    pub mode: CaptureMode,
    pub output_dir: PathBuf,
    /// Screencast image format: `jpeg` or `png`.
    pub format: String,
    pub quality: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Capture every nth frame; 1 captures everything.
    pub every_nth_frame: u32,
}

impl VideoCaptureSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: CaptureMode::Auto,
            output_dir: output_dir.into(),
            format: "jpeg".to_string(),
            quality: 80,
            max_width: 1280,
            max_height: 720,
            every_nth_frame: 1,
        }
    }

    pub fn mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }
}

pub struct VideoCaptureGuard {
    settings: VideoCaptureSettings,
    active_mode: Mutex<Option<CaptureMode>>,
    frame_counter: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
    trace_chunks: Arc<Mutex<Vec<Value>>>,
    viewport: Mutex<Option<Arc<crate::viewport::Viewport>>>,
    teardown: TeardownStack,
}

impl VideoCaptureGuard {
    pub fn new(settings: VideoCaptureSettings) -> Self {
        Self {
            settings,
            active_mode: Mutex::new(None),
            frame_counter: Arc::new(AtomicU64::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
            trace_chunks: Arc::new(Mutex::new(Vec::new())),
            viewport: Mutex::new(None),
            teardown: TeardownStack::default(),
        }
    }

    /// Pause frame persistence. Only meaningful for the screencast mode;
    /// the native trace keeps recording.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    async fn start_tracing(&self, ctx: &GuardContext) -> Result<(), ViewportError> {
        ctx.viewport()
            .send_page_command(
                "Tracing.start",
                json!({
                    "categories": "devtools.timeline,disabled-by-default-devtools.screenshot",
                    "options": "sampling-frequency=10000",
                }),
            )
            .await?;

        let mut raw = ctx.raw_events();
        let chunks = Arc::clone(&self.trace_chunks);
        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Tracing.dataCollected" {
                    continue;
                }
                if let Some(values) = event.params.get("value").and_then(Value::as_array) {
                    chunks.lock().await.extend(values.iter().cloned());
                }
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }

    async fn start_screencast(&self, ctx: &GuardContext) -> Result<(), ViewportError> {
        ctx.viewport()
            .send_page_command(
                "Page.startScreencast",
                json!({
                    "format": self.settings.format,
                    "quality": self.settings.quality,
                    "maxWidth": self.settings.max_width,
                    "maxHeight": self.settings.max_height,
                    "everyNthFrame": self.settings.every_nth_frame,
                }),
            )
            .await?;

        let mut raw = ctx.raw_events();
        let viewport = Arc::clone(ctx.viewport());
        let output_dir = self.settings.output_dir.clone();
        let extension = if self.settings.format == "png" {
            "png"
        } else {
            "jpg"
        };
        let pause_flag = Arc::clone(&self.paused);
        let frame_counter = Arc::clone(&self.frame_counter);
        let task = tokio::spawn(async move {
            while let Ok(event) = raw.recv().await {
                if event.method != "Page.screencastFrame" {
                    continue;
                }
                metrics::record_guard_event();
                let ack_session = event.params.get("sessionId").cloned();
                // Ack first so the browser keeps producing frames.
                if let (Some(session), Some(ack)) = (event.session_id.clone(), ack_session) {
                    let _ = viewport
                        .send_session_command(
                            &session,
                            "Page.screencastFrameAck",
                            json!({ "sessionId": ack }),
                        )
                        .await;
                }
                if pause_flag.load(Ordering::Relaxed) {
                    continue;
                }
                let Some(data) = event.params.get("data").and_then(Value::as_str) else {
                    continue;
                };
                let Ok(bytes) = BASE64.decode(data) else {
                    continue;
                };
                let frame = frame_counter.fetch_add(1, Ordering::Relaxed);
                let path = output_dir.join(format!("frame-{frame:05}.{extension}"));
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    warn!(target: "guard-video", ?err, "failed to write frame");
                }
            }
        });
        self.teardown.push(task).await;
        Ok(())
    }
}

#[async_trait]
impl Guard for VideoCaptureGuard {
    fn name(&self) -> &'static str {
        "video-capture"
    }

    fn priority(&self) -> u32 {
        500
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        std::fs::create_dir_all(&self.settings.output_dir)
            .map_err(|err| ViewportError::internal(format!("capture dir: {err}")))?;
        *self.viewport.lock().await = Some(Arc::clone(ctx.viewport()));

        let resolved = match self.settings.mode {
            CaptureMode::Tracing => {
                self.start_tracing(&ctx).await?;
                CaptureMode::Tracing
            }
            CaptureMode::Screencast => {
                self.start_screencast(&ctx).await?;
                CaptureMode::Screencast
            }
            CaptureMode::Auto => match self.start_tracing(&ctx).await {
                Ok(()) => CaptureMode::Tracing,
                Err(err) => {
                    debug!(target: "guard-video", ?err, "tracing unavailable, using screencast");
                    self.start_screencast(&ctx).await?;
                    CaptureMode::Screencast
                }
            },
        };
        info!(target: "guard-video", mode = ?resolved, "capture started");
        *self.active_mode.lock().await = Some(resolved);
        Ok(())
    }

    async fn detach(&self) {
        let mode = self.active_mode.lock().await.take();
        let viewport = self.viewport.lock().await.take();

        if let (Some(mode), Some(viewport)) = (mode, viewport) {
            match mode {
                CaptureMode::Tracing => {
                    let _ = viewport.send_page_command("Tracing.end", json!({})).await;
                    // Give the browser a moment to flush collected chunks.
                    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                    let chunks = self.trace_chunks.lock().await;
                    let body = json!({ "traceEvents": chunks.clone() });
                    let path = self.settings.output_dir.join("trace.json");
                    if let Err(err) = std::fs::write(&path, serde_json::to_vec(&body).unwrap_or_default())
                    {
                        warn!(target: "guard-video", ?err, "failed to write trace");
                    }
                }
                CaptureMode::Screencast | CaptureMode::Auto => {
                    let _ = viewport
                        .send_page_command("Page.stopScreencast", json!({}))
                        .await;
                    let manifest = json!({
                        "format": self.settings.format,
                        "quality": self.settings.quality,
                        "maxWidth": self.settings.max_width,
                        "maxHeight": self.settings.max_height,
                        "everyNthFrame": self.settings.every_nth_frame,
                        "frames": self.frames_written(),
                    });
                    let path = self.settings.output_dir.join("manifest.json");
                    if let Err(err) =
                        std::fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap_or_default())
                    {
                        warn!(target: "guard-video", ?err, "failed to write manifest");
                    }
                }
            }
        }

        self.teardown.run().await;
    }
}
