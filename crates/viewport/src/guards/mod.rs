//! Event-driven monitors attached to a Viewport.
//!
//! Guards attach in ascending priority order during `Viewport::start` and
//! detach in reverse during `close`. Attach failures abort the start;
//! failures inside event handlers are logged and swallowed so a broken
//! guard can never take down the run.

use std::sync::Arc;

use async_trait::async_trait;
use openbrowser_event_hub::InMemoryHub;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::transport::TransportEvent;
use crate::viewport::Viewport;

mod basic;
mod download;
mod har_capture;
mod page_ready;
mod permissions;
mod popup;
mod url_policy;
mod video_capture;

pub mod persistence;

pub use basic::{BlankPageGuard, CrashGuard, DialogGuard, LocalInstanceGuard};
pub use download::{DownloadGuard, DownloadRecord, DownloadStatus};
pub use har_capture::HarCaptureGuard;
pub use page_ready::PageReadyGuard;
pub use permissions::PermissionsGuard;
pub use persistence::PersistenceGuard;
pub use popup::PopupGuard;
pub use url_policy::{domain_matches, UrlPolicy, UrlPolicyGuard};
pub use video_capture::{CaptureMode, VideoCaptureGuard, VideoCaptureSettings};

/// Everything a guard can reach while attached.
#[derive(Clone)]
pub struct GuardContext {
    viewport: Arc<Viewport>,
}

impl GuardContext {
    pub fn new(viewport: Arc<Viewport>) -> Self {
        Self { viewport }
    }

    pub fn viewport(&self) -> &Arc<Viewport> {
        &self.viewport
    }

    pub fn hub(&self) -> Arc<InMemoryHub<ViewportEvent>> {
        self.viewport.hub()
    }

    /// Raw CDP event feed (post tab-registry bookkeeping).
    pub fn raw_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.viewport.subscribe_raw()
    }
}

/// Contract for a Viewport monitor.
#[async_trait]
pub trait Guard: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach order; lower attaches first, detach runs in reverse.
    fn priority(&self) -> u32;

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError>;

    /// Tear down listeners. Must be idempotent against double-detach.
    async fn detach(&self);
}

/// Teardown bookkeeping shared by the concrete guards: spawned listener
/// tasks are registered on attach and aborted in reverse on detach.
#[derive(Default)]
pub struct TeardownStack {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TeardownStack {
    pub async fn push(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    pub async fn run(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(handle) = tasks.pop() {
            handle.abort();
        }
    }
}

/// The always-on guard set, in priority order. Capture and persistence
/// guards need paths and are configured separately by the caller.
pub fn default_guards() -> Vec<Arc<dyn Guard>> {
    vec![
        Arc::new(LocalInstanceGuard::new()),
        Arc::new(DialogGuard::new()),
        Arc::new(PopupGuard::new()),
        Arc::new(PageReadyGuard::new(std::time::Duration::from_millis(500))),
        Arc::new(BlankPageGuard::new()),
        Arc::new(CrashGuard::new()),
    ]
}
