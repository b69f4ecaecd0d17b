//! Raw CDP transport.
//!
//! The transport owns the websocket connection to Chromium and exposes two
//! surfaces: `send_command` (request/response, browser- or session-scoped)
//! and `next_event` (the protocol event stream). Commands are serialized
//! through a single connection loop; responses are routed back to callers
//! via oneshot channels keyed by call id.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::errors::ViewportError;
use crate::launch::LaunchOptions;

/// A protocol event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Addressing for outgoing commands.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), ViewportError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, ViewportError>;
}

/// Transport that answers every command with an error. Used when no
/// browser is available and by unit tests that never touch the wire.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), ViewportError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, ViewportError> {
        Err(ViewportError::cdp(format!(
            "no browser transport available for {method}"
        )))
    }
}

/// Transport backed by a live Chromium process (or an existing websocket
/// endpoint when `LaunchOptions::websocket_url` is set).
pub struct ChromiumTransport {
    options: LaunchOptions,
    state: Arc<OnceCell<Mutex<Option<Arc<ConnectionState>>>>>,
}

impl ChromiumTransport {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            state: Arc::new(OnceCell::new()),
        }
    }

    async fn connection(&self) -> Result<Arc<ConnectionState>, ViewportError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(conn) = guard.as_ref() {
            if conn.is_alive() {
                return Ok(Arc::clone(conn));
            }
        }

        let fresh = Arc::new(ConnectionState::start(self.options.clone()).await?);
        *guard = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), ViewportError> {
        let conn = self.connection().await?;
        let deadline = Duration::from_millis(self.options.command_timeout_ms);

        conn.send(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            deadline,
        )
        .await?;

        conn.send(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            deadline,
        )
        .await?;

        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.connection().await {
            Ok(conn) => conn.next_event().await,
            Err(err) => {
                warn!(target: "viewport-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, ViewportError> {
        let conn = self.connection().await?;
        conn.send(
            target,
            method,
            params,
            Duration::from_millis(self.options.command_timeout_ms),
        )
        .await
    }
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, ViewportError>>,
}

struct ConnectionState {
    command_tx: mpsc::Sender<PendingCommand>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    persist_after_close: bool,
    alive: Arc<AtomicBool>,
}

impl ConnectionState {
    async fn start(options: LaunchOptions) -> Result<Self, ViewportError> {
        let (child, ws_url) = if let Some(url) = options.websocket_url.clone() {
            (None, url)
        } else {
            let config = Self::browser_config(&options)?;
            Self::launch_browser(config).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| ViewportError::cdp(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = Arc::clone(&alive);
        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "viewport-transport", ?err, "connection loop terminated");
            }
        });

        let heartbeat_task = Self::spawn_heartbeat(
            command_tx.clone(),
            Arc::clone(&alive),
            Duration::from_secs(15),
        );

        info!(target: "viewport-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            persist_after_close: options.persist_after_close,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ViewportError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = PendingCommand {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| ViewportError::cdp(err.to_string()))?;

        match timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ViewportError::cdp("command response channel closed")),
            Err(_) => Err(ViewportError::timeout(format!("{method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn spawn_heartbeat(
        sender: mpsc::Sender<PendingCommand>,
        alive: Arc<AtomicBool>,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while alive.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !alive.load(Ordering::Relaxed) {
                    break;
                }

                let (resp_tx, resp_rx) = oneshot::channel();
                let ping = PendingCommand {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: Value::Object(Default::default()),
                    responder: resp_tx,
                };
                if sender.send(ping).await.is_err() {
                    break;
                }
                match timeout(Duration::from_secs(5), resp_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "viewport-transport", ?err, "heartbeat command error");
                        break;
                    }
                    Ok(Err(_)) | Err(_) => {
                        warn!(target: "viewport-transport", "heartbeat lost");
                        break;
                    }
                }
            }
        })
    }

    fn browser_config(options: &LaunchOptions) -> Result<BrowserConfig, ViewportError> {
        let executable = options.require_executable()?;
        if !executable.exists() {
            return Err(ViewportError::launch(format!(
                "browser executable not found at {}",
                executable.display()
            )));
        }

        let profile_dir = if options.user_data_dir.is_absolute() {
            options.user_data_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(|err| ViewportError::internal(err.to_string()))?
                .join(&options.user_data_dir)
        };
        fs::create_dir_all(&profile_dir).map_err(|err| {
            ViewportError::launch(format!("failed to create user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(options.command_timeout_ms))
            .launch_timeout(Duration::from_secs(20));

        if !options.headless {
            builder = builder.with_head();
        }
        builder = builder
            .args(options.args.iter().map(String::as_str).collect::<Vec<_>>())
            .chrome_executable(executable)
            .user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| ViewportError::launch(format!("browser config error: {err}")))
    }

    async fn launch_browser(
        config: BrowserConfig,
    ) -> Result<(Option<Child>, String), ViewportError> {
        let mut child = config
            .launch()
            .map_err(|err| ViewportError::launch(format!("failed to spawn chromium: {err}")))?;

        let ws_url = extract_ws_url(&mut child).await?;
        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<PendingCommand>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), ViewportError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, ViewportError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::submit(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::route_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            Self::forward_event(event, &event_tx).await;
                        }
                        Some(Err(err)) => {
                            let mapped = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(mapped.clone()));
                            }
                            return Err(mapped);
                        }
                        None => {
                            let err = ViewportError::cdp("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn submit(
        conn: &mut Connection<CdpEventMessage>,
        cmd: PendingCommand,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ViewportError>>>,
    ) -> Result<(), ViewportError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let mapped = ViewportError::cdp(err.to_string());
                let _ = cmd.responder.send(Err(mapped.clone()));
                Err(mapped)
            }
        }
    }

    fn route_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ViewportError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(ViewportError::CdpIo {
                message: format!("cdp error {}: {}", error.code, error.message),
                retriable: error.code >= 500,
            })
        } else {
            Err(ViewportError::internal("empty cdp response"))
        };

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn forward_event(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "viewport-transport", ?err, "failed to decode cdp event");
                return;
            }
        };

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        if event_tx.send(payload).await.is_err() {
            debug!(target: "viewport-transport", "event receiver dropped");
        }
    }

    fn map_cdp_error(err: CdpError) -> ViewportError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => ViewportError::timeout(hint),
            CdpError::FrameNotFound(_)
            | CdpError::JavascriptException(_)
            | CdpError::Serde(_) => ViewportError::internal(hint),
            _ => ViewportError::cdp_retriable(hint),
        }
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        self.heartbeat_task.abort();

        if self.persist_after_close {
            return;
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "viewport-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "viewport-transport", "no runtime available to reap chromium child");
                }
            }
        }
    }
}

/// Read the DevTools websocket URL from Chromium's stderr banner.
async fn extract_ws_url(child: &mut Child) -> Result<String, ViewportError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ViewportError::launch("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| ViewportError::launch(err.to_string()))?;
            preview.push(line.clone());
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(ViewportError::launch(format!(
            "chromium exited before exposing a devtools url. stderr: {}",
            preview
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        )))
    };

    timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| ViewportError::timeout("waiting for chromium devtools url"))?
}
