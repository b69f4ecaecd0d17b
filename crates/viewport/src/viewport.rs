//! The owned-browser facade.
//!
//! A `Viewport` owns one browser process (through the transport), tracks
//! its page targets, publishes domain events on the hub, and runs the
//! guard pipeline. All page-scoped primitives address the current tab.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use openbrowser_core_types::{PageMetrics, Rect, TabId, TabInfo};
use openbrowser_event_hub::InMemoryHub;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::errors::ViewportError;
use crate::events::ViewportEvent;
use crate::guards::{Guard, GuardContext};
use crate::launch::LaunchOptions;
use crate::metrics;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};

use async_trait::async_trait;

const ATTACH_POLL: Duration = Duration::from_millis(50);
const ATTACH_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
struct TabEntry {
    target_id: String,
    cdp_session: Option<String>,
    url: String,
    title: Option<String>,
}

pub struct Viewport {
    options: LaunchOptions,
    transport: Arc<dyn CdpTransport>,
    hub: Arc<InMemoryHub<ViewportEvent>>,
    raw_events: broadcast::Sender<TransportEvent>,
    tabs: DashMap<TabId, TabEntry>,
    targets: DashMap<String, TabId>,
    sessions: DashMap<String, TabId>,
    current: RwLock<Option<TabId>>,
    guards: Mutex<Vec<Arc<dyn Guard>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Viewport {
    /// Build a viewport over a freshly-launched browser. Falls back to the
    /// no-op transport when no executable can be found, so callers get
    /// descriptive command errors instead of a launch panic.
    pub fn new(options: LaunchOptions) -> Arc<Self> {
        let transport: Arc<dyn CdpTransport> =
            if options.executable.is_some() || options.websocket_url.is_some() {
                Arc::new(ChromiumTransport::new(options.clone()))
            } else {
                warn!(
                    target: "viewport",
                    "no Chrome/Chromium executable found; browser actions will fail \
                     (set BROWSER_BINARY_PATH to fix)"
                );
                Arc::new(NoopTransport)
            };
        Self::with_transport(options, transport)
    }

    pub fn with_transport(options: LaunchOptions, transport: Arc<dyn CdpTransport>) -> Arc<Self> {
        let (raw_events, _) = broadcast::channel(512);
        Arc::new(Self {
            options,
            transport,
            hub: InMemoryHub::new(256),
            raw_events,
            tabs: DashMap::new(),
            targets: DashMap::new(),
            sessions: DashMap::new(),
            current: RwLock::new(None),
            guards: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn hub(&self) -> Arc<InMemoryHub<ViewportEvent>> {
        Arc::clone(&self.hub)
    }

    /// Raw protocol event feed, primarily for guards.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<TransportEvent> {
        self.raw_events.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.options.navigation_timeout_ms)
    }

    /// Launch the browser, open the first page, and attach `guards` in
    /// ascending priority order. A guard attach failure aborts the start.
    pub async fn start(
        self: &Arc<Self>,
        mut guards: Vec<Arc<dyn Guard>>,
    ) -> Result<(), ViewportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.start().await?;

        let event_task = tokio::spawn(Self::event_loop(Arc::clone(self)));
        self.tasks.lock().await.push(event_task);

        self.ensure_initial_tab().await?;

        guards.sort_by_key(|g| g.priority());
        for guard in guards {
            let ctx = GuardContext::new(Arc::clone(self));
            info!(target: "viewport", guard = guard.name(), priority = guard.priority(), "attaching guard");
            if let Err(err) = guard.attach(ctx).await {
                // Roll back the guards attached so far before bailing.
                self.detach_guards().await;
                return Err(ViewportError::guard(guard.name(), err.to_string()));
            }
            self.guards.lock().await.push(guard);
        }

        Ok(())
    }

    /// Detach guards in reverse priority order, close pages, stop the
    /// transport loop. Cleanup on cancellation takes this same path.
    pub async fn close(self: &Arc<Self>) {
        self.detach_guards().await;

        let tabs: Vec<TabId> = self.tabs.iter().map(|kv| kv.key().clone()).collect();
        for tab in tabs {
            if let Err(err) = self.close_tab(&tab).await {
                debug!(target: "viewport", ?err, "close tab during shutdown");
            }
        }

        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            handle.abort();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    async fn detach_guards(&self) {
        let mut guards = self.guards.lock().await;
        while let Some(guard) = guards.pop() {
            debug!(target: "viewport", guard = guard.name(), "detaching guard");
            guard.detach().await;
        }
    }

    // ---- command plumbing ------------------------------------------------

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, ViewportError> {
        metrics::record_command();
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    pub async fn send_session_command(
        &self,
        session: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ViewportError> {
        metrics::record_command();
        self.transport
            .send_command(CommandTarget::Session(session.to_string()), method, params)
            .await
    }

    pub async fn send_tab_command(
        &self,
        tab: &TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, ViewportError> {
        let session = self.session_for(tab).await?;
        self.send_session_command(&session, method, params).await
    }

    /// Route a command to the current tab's CDP session.
    pub async fn send_page_command(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, ViewportError> {
        let tab = self.require_current().await?;
        self.send_tab_command(&tab, method, params).await
    }

    async fn session_for(&self, tab: &TabId) -> Result<String, ViewportError> {
        let deadline = Instant::now() + ATTACH_DEADLINE;
        loop {
            match self.tabs.get(tab) {
                Some(entry) => {
                    if let Some(session) = entry.cdp_session.clone() {
                        return Ok(session);
                    }
                }
                None => return Err(ViewportError::TabNotFound(tab.clone())),
            }
            if Instant::now() >= deadline {
                return Err(ViewportError::internal(format!(
                    "cdp session not ready for tab {tab}"
                )));
            }
            sleep(ATTACH_POLL).await;
        }
    }

    pub async fn current_tab(&self) -> Option<TabId> {
        self.current.read().await.clone()
    }

    async fn require_current(&self) -> Result<TabId, ViewportError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| ViewportError::internal("no open tab"))
    }

    /// Best-effort recovery after a renderer crash: make sure at least one
    /// live page exists and is current.
    pub async fn open_replacement_page(self: &Arc<Self>) -> Result<TabId, ViewportError> {
        if let Some(tab) = self.current_tab().await {
            if self
                .tabs
                .get(&tab)
                .map(|e| e.cdp_session.is_some())
                .unwrap_or(false)
            {
                return Ok(tab);
            }
        }
        let tab = self.open_tab("about:blank").await?;
        *self.current.write().await = Some(tab.clone());
        Ok(tab)
    }

    async fn ensure_initial_tab(self: &Arc<Self>) -> Result<(), ViewportError> {
        // An attached browser may already expose pages via setDiscoverTargets.
        let deadline = Instant::now() + Duration::from_millis(800);
        while Instant::now() < deadline {
            if let Some(entry) = self.tabs.iter().find(|e| e.cdp_session.is_some()) {
                let tab = entry.key().clone();
                *self.current.write().await = Some(tab);
                return Ok(());
            }
            sleep(ATTACH_POLL).await;
        }

        match self.open_tab("about:blank").await {
            Ok(tab) => {
                *self.current.write().await = Some(tab);
            }
            Err(err) => {
                // Stub transports have no pages; page-scoped commands will
                // report the failure at the call site.
                warn!(target: "viewport", ?err, "no initial tab available");
            }
        }
        Ok(())
    }

    // ---- transport event loop --------------------------------------------

    async fn event_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(event) => {
                            metrics::record_event();
                            self.track(&event).await;
                            // Guards receive the raw feed after bookkeeping so
                            // they observe a consistent tab registry.
                            let _ = self.raw_events.send(event);
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            sleep(Duration::from_millis(200)).await;
                        }
                    }
                }
            }
        }
        debug!(target: "viewport", "event loop exiting");
    }

    async fn track(&self, event: &TransportEvent) {
        match event.method.as_str() {
            "Target.targetCreated" => {
                if let Ok(payload) = serde_json::from_value::<TargetPayload>(event.params.clone())
                {
                    if payload.target_info.target_type == "page" {
                        let info = payload.target_info;
                        let tab = TabId::new();
                        self.targets.insert(info.target_id.clone(), tab.clone());
                        self.tabs.insert(
                            tab,
                            TabEntry {
                                target_id: info.target_id,
                                cdp_session: None,
                                url: info.url.unwrap_or_default(),
                                title: info.title,
                            },
                        );
                    }
                }
            }
            "Target.targetDestroyed" => {
                if let Ok(payload) =
                    serde_json::from_value::<TargetDestroyedPayload>(event.params.clone())
                {
                    if let Some((_, tab)) = self.targets.remove(&payload.target_id) {
                        self.sessions.retain(|_, v| *v != tab);
                        self.tabs.remove(&tab);
                        let mut current = self.current.write().await;
                        if current.as_ref() == Some(&tab) {
                            *current = self.tabs.iter().next().map(|e| e.key().clone());
                        }
                        drop(current);
                        self.hub.publish_lossy(ViewportEvent::TabClosed { tab });
                    }
                }
            }
            "Target.attachedToTarget" => {
                if let Ok(payload) =
                    serde_json::from_value::<AttachedPayload>(event.params.clone())
                {
                    if payload.target_info.target_type != "page" {
                        return;
                    }
                    if let Some(tab) = self
                        .targets
                        .get(&payload.target_info.target_id)
                        .map(|e| e.value().clone())
                    {
                        self.sessions.insert(payload.session_id.clone(), tab.clone());
                        if let Some(mut entry) = self.tabs.get_mut(&tab) {
                            entry.cdp_session = Some(payload.session_id);
                        }
                    }
                }
            }
            "Target.detachedFromTarget" => {
                if let Ok(payload) =
                    serde_json::from_value::<DetachedPayload>(event.params.clone())
                {
                    self.sessions.remove(&payload.session_id);
                }
            }
            "Target.targetInfoChanged" => {
                if let Ok(payload) = serde_json::from_value::<TargetPayload>(event.params.clone())
                {
                    let info = payload.target_info;
                    if info.target_type != "page" {
                        return;
                    }
                    if let Some(tab) = self.targets.get(&info.target_id).map(|e| e.value().clone())
                    {
                        let mut navigated = None;
                        if let Some(mut entry) = self.tabs.get_mut(&tab) {
                            entry.title = info.title;
                            if let Some(url) = info.url.filter(|u| !u.is_empty()) {
                                if entry.url != url {
                                    entry.url = url.clone();
                                    navigated = Some(url);
                                }
                            }
                        }
                        if let Some(url) = navigated {
                            self.hub
                                .publish_lossy(ViewportEvent::Navigated { tab, url });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn tab_for_session(&self, session_id: &str) -> Option<TabId> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn tab_for_target(&self, target_id: &str) -> Option<TabId> {
        self.targets.get(target_id).map(|e| e.value().clone())
    }

    pub fn tab_url(&self, tab: &TabId) -> Option<String> {
        self.tabs.get(tab).map(|e| e.url.clone())
    }

    // ---- key input -------------------------------------------------------

    async fn dispatch_key_chord(&self, chord: &str) -> Result<(), ViewportError> {
        let mut modifiers = 0i64;
        let mut key = "";
        for part in chord.split('+') {
            match part.trim() {
                "Control" | "Ctrl" => modifiers |= 2,
                "Shift" => modifiers |= 8,
                "Alt" => modifiers |= 1,
                "Meta" | "Cmd" => modifiers |= 4,
                other => key = other,
            }
        }
        if key.is_empty() {
            return Err(ViewportError::internal(format!("empty key chord '{chord}'")));
        }

        let (code, virtual_key, text) = key_descriptor(key);
        let mut down = json!({
            "type": if text.is_some() { "keyDown" } else { "rawKeyDown" },
            "modifiers": modifiers,
            "key": key,
            "code": code,
            "windowsVirtualKeyCode": virtual_key,
            "nativeVirtualKeyCode": virtual_key,
        });
        if let Some(text) = text {
            down["text"] = json!(text);
            down["unmodifiedText"] = json!(text);
        }
        self.send_page_command("Input.dispatchKeyEvent", down).await?;
        self.send_page_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "modifiers": modifiers,
                "key": key,
                "code": code,
                "windowsVirtualKeyCode": virtual_key,
                "nativeVirtualKeyCode": virtual_key,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Browser for Viewport {
    async fn navigate(&self, url: &str, nav_timeout: Duration) -> Result<(), ViewportError> {
        let tab = self.require_current().await?;
        let response = self
            .send_tab_command(&tab, "Page.navigate", json!({ "url": url }))
            .await
            .map_err(|err| ViewportError::navigation(url, err.to_string()))?;

        if let Some(text) = response.get("errorText").and_then(Value::as_str) {
            return Err(ViewportError::navigation(url, text));
        }

        if let Some(mut entry) = self.tabs.get_mut(&tab) {
            entry.url = url.to_string();
        }

        let deadline = Instant::now() + nav_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(ViewportError::navigation(url, "document never became ready"));
            }
            let ready = self
                .send_tab_command(
                    &tab,
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await
                .ok()
                .and_then(|v| {
                    v.get("result")
                        .and_then(|r| r.get("value"))
                        .and_then(Value::as_str)
                        .map(|state| matches!(state, "interactive" | "complete"))
                })
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn current_url(&self) -> Result<String, ViewportError> {
        let tab = self.require_current().await?;
        if let Some(entry) = self.tabs.get(&tab) {
            if !entry.url.is_empty() {
                return Ok(entry.url.clone());
            }
        }
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or("about:blank").to_string())
    }

    async fn go_back(&self) -> Result<(), ViewportError> {
        self.evaluate("history.back()").await.map(|_| ())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, ViewportError> {
        let response = self
            .send_page_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script exception");
            return Err(ViewportError::internal(text.to_string()));
        }

        Ok(response
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), ViewportError> {
        for (kind, click_count) in [("mousePressed", 1), ("mouseReleased", 1)] {
            self.send_page_command(
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": click_count,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), ViewportError> {
        self.send_page_command("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn press_keys(&self, keys: &str) -> Result<(), ViewportError> {
        for chord in keys.split_whitespace() {
            self.dispatch_key_chord(chord).await?;
        }
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), ViewportError> {
        self.evaluate(&format!("window.scrollBy({dx}, {dy})"))
            .await
            .map(|_| ())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, ViewportError> {
        let mut params = json!({ "format": "png" });
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let response = self
            .send_page_command("Page.captureScreenshot", params)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ViewportError::internal("screenshot payload missing data"))?;
        BASE64
            .decode(data)
            .map_err(|err| ViewportError::internal(format!("screenshot decode: {err}")))
    }

    async fn page_metrics(&self) -> Result<PageMetrics, ViewportError> {
        let value = self
            .evaluate(
                "({ scrollX: window.scrollX, scrollY: window.scrollY, \
                  viewportWidth: window.innerWidth, viewportHeight: window.innerHeight, \
                  documentWidth: document.documentElement.scrollWidth, \
                  documentHeight: document.documentElement.scrollHeight })",
            )
            .await?;
        let number = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(PageMetrics {
            scroll_x: number("scrollX"),
            scroll_y: number("scrollY"),
            viewport_width: number("viewportWidth"),
            viewport_height: number("viewportHeight"),
            document_width: number("documentWidth"),
            document_height: number("documentHeight"),
        })
    }

    async fn dom_snapshot(&self) -> Result<Value, ViewportError> {
        self.send_page_command(
            "DOMSnapshot.captureSnapshot",
            json!({
                "computedStyles": ["display", "visibility", "opacity", "overflow"],
                "includeDOMRects": true,
                "includePaintOrder": true,
            }),
        )
        .await
    }

    async fn ax_snapshot(&self) -> Result<Value, ViewportError> {
        self.send_page_command("Accessibility.getFullAXTree", json!({}))
            .await
    }

    async fn box_model(&self, backend_node_id: i64) -> Result<Option<Rect>, ViewportError> {
        let response = self
            .send_page_command(
                "DOM.getBoxModel",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await;
        let response = match response {
            Ok(response) => response,
            // Nodes can legitimately lose layout between snapshot and click.
            Err(ViewportError::CdpIo { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let quad = response
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(Value::as_f64)
                    .collect::<Vec<f64>>()
            })
            .unwrap_or_default();
        if quad.len() < 8 {
            return Ok(None);
        }
        let xs = [quad[0], quad[2], quad[4], quad[6]];
        let ys = [quad[1], quad[3], quad[5], quad[7]];
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Ok(Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)))
    }

    async fn set_file_input(
        &self,
        backend_node_id: i64,
        files: &[&Path],
    ) -> Result<(), ViewportError> {
        let paths: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.send_page_command(
            "DOM.setFileInputFiles",
            json!({ "backendNodeId": backend_node_id, "files": paths }),
        )
        .await
        .map(|_| ())
    }

    async fn open_tab(&self, url: &str) -> Result<TabId, ViewportError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| ViewportError::internal("createTarget missing targetId"))?
            .to_string();

        let deadline = Instant::now() + ATTACH_DEADLINE;
        loop {
            if let Some(tab) = self.targets.get(&target_id).map(|e| e.value().clone()) {
                if self
                    .tabs
                    .get(&tab)
                    .map(|e| e.cdp_session.is_some())
                    .unwrap_or(false)
                {
                    return Ok(tab);
                }
            }
            if Instant::now() >= deadline {
                return Err(ViewportError::timeout("waiting for target attach"));
            }
            sleep(ATTACH_POLL).await;
        }
    }

    async fn close_tab(&self, tab: &TabId) -> Result<(), ViewportError> {
        let target_id = self
            .tabs
            .get(tab)
            .map(|e| e.target_id.clone())
            .ok_or_else(|| ViewportError::TabNotFound(tab.clone()))?;
        self.send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await
            .map(|_| ())
    }

    async fn focus_tab(&self, tab: &TabId) -> Result<(), ViewportError> {
        let target_id = self
            .tabs
            .get(tab)
            .map(|e| e.target_id.clone())
            .ok_or_else(|| ViewportError::TabNotFound(tab.clone()))?;
        self.send_command("Target.activateTarget", json!({ "targetId": target_id }))
            .await?;
        *self.current.write().await = Some(tab.clone());
        Ok(())
    }

    async fn list_tabs(&self) -> Vec<TabInfo> {
        let current = self.current.read().await.clone();
        self.tabs
            .iter()
            .map(|kv| TabInfo {
                tab: kv.key().clone(),
                url: kv.value().url.clone(),
                title: kv.value().title.clone(),
                active: current.as_ref() == Some(kv.key()),
            })
            .collect()
    }
}

fn key_descriptor(key: &str) -> (&'static str, i64, Option<String>) {
    match key {
        "Enter" => ("Enter", 13, Some("\r".to_string())),
        "Tab" => ("Tab", 9, None),
        "Escape" => ("Escape", 27, None),
        "Backspace" => ("Backspace", 8, None),
        "Delete" => ("Delete", 46, None),
        "ArrowUp" => ("ArrowUp", 38, None),
        "ArrowDown" => ("ArrowDown", 40, None),
        "ArrowLeft" => ("ArrowLeft", 37, None),
        "ArrowRight" => ("ArrowRight", 39, None),
        "PageUp" => ("PageUp", 33, None),
        "PageDown" => ("PageDown", 34, None),
        "Home" => ("Home", 36, None),
        "End" => ("End", 35, None),
        "Space" | " " => ("Space", 32, Some(" ".to_string())),
        other => {
            let code = other
                .chars()
                .next()
                .map(|c| c.to_ascii_uppercase() as i64)
                .unwrap_or(0);
            // Single printable characters produce text; anything longer is
            // passed through as a named key without text.
            if other.chars().count() == 1 {
                ("", code, Some(other.to_string()))
            } else {
                ("", 0, None)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetPayload {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedPayload {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedPayload {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedPayload {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    title: Option<String>,
}
