//! Session directory server.
//!
//! Holds SessionId -> Viewport mappings and serves a newline-delimited
//! JSON protocol over a per-user UNIX socket so one-shot CLI invocations
//! can share a long-lived browser. All mutation funnels through a single
//! request loop per connection over a shared, locked directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use openbrowser_core_types::SessionId;
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::guards::default_guards;
use openbrowser_viewport::{Browser, LaunchProfile, Viewport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::CliError;

#[derive(Debug, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct WireResponse {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireResponse {
    fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

struct SessionHandle {
    viewport: Arc<Viewport>,
    analyzer: Arc<PageAnalyzer>,
}

/// SessionId -> live browser.
pub struct SessionDirectory {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    async fn open(&self, url: &str, headless: bool) -> Result<(SessionId, String), CliError> {
        let options = LaunchProfile::from_env().headless(headless).build();
        let viewport = Viewport::new(options);
        viewport.start(default_guards()).await?;
        viewport
            .navigate(url, viewport.navigation_timeout())
            .await?;
        let final_url = viewport.current_url().await?;

        let id = SessionId::new();
        let analyzer = Arc::new(PageAnalyzer::new(
            Arc::clone(&viewport) as Arc<dyn Browser>
        ));
        self.sessions.lock().await.insert(
            id.clone(),
            SessionHandle { viewport, analyzer },
        );
        info!(target: "session-server", session = %id, url = %final_url, "session opened");
        Ok((id, final_url))
    }

    async fn close(&self, id: &SessionId) -> Result<(), CliError> {
        let handle = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| CliError::NoActiveSession(format!(" '{id}'")))?;
        handle.viewport.close().await;
        info!(target: "session-server", session = %id, "session closed");
        Ok(())
    }

    async fn close_all(&self) {
        let drained: Vec<(SessionId, SessionHandle)> =
            self.sessions.lock().await.drain().collect();
        for (_, handle) in drained {
            handle.viewport.close().await;
        }
    }

    async fn with_session<'a>(
        &'a self,
        args: &Value,
    ) -> Result<(SessionId, Arc<Viewport>, Arc<PageAnalyzer>), CliError> {
        let sessions = self.sessions.lock().await;
        let requested = args
            .get("session")
            .and_then(Value::as_str)
            .map(|s| SessionId(s.to_string()));
        let id = match requested {
            Some(id) => id,
            // Single-session convenience: an omitted id picks the only one.
            None if sessions.len() == 1 => sessions.keys().next().cloned().unwrap(),
            None => {
                return Err(CliError::NoActiveSession(
                    "; pass --session or open exactly one".into(),
                ))
            }
        };
        let handle = sessions
            .get(&id)
            .ok_or_else(|| CliError::NoActiveSession(format!(" '{id}'")))?;
        Ok((
            id,
            Arc::clone(&handle.viewport),
            Arc::clone(&handle.analyzer),
        ))
    }

    pub async fn handle(&self, request: WireRequest) -> WireResponse {
        let id = request.id;
        match self.dispatch(&request).await {
            Ok(data) => WireResponse::ok(id, data),
            Err(err) => WireResponse::err(id, err.to_string()),
        }
    }

    async fn dispatch(&self, request: &WireRequest) -> Result<Value, CliError> {
        let args = &request.args;
        match request.command.as_str() {
            "open" => {
                let url = args
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CliError::other("open requires a url"))?;
                // Reuse an existing session when one was named.
                if args.get("session").and_then(Value::as_str).is_some() {
                    let (id, viewport, _) = self.with_session(args).await?;
                    viewport
                        .navigate(url, viewport.navigation_timeout())
                        .await?;
                    return Ok(json!({
                        "session": id,
                        "url": viewport.current_url().await?
                    }));
                }
                let headless = args
                    .get("headless")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let (session, final_url) = self.open(url, headless).await?;
                Ok(json!({ "session": session, "url": final_url }))
            }
            "tap" => {
                let (_, viewport, _) = self.with_session(args).await?;
                let selector = args
                    .get("selector")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CliError::other("tap requires a selector"))?;
                let escaped = serde_json::to_string(selector)
                    .map_err(|err| CliError::other(err.to_string()))?;
                let clicked = viewport
                    .evaluate(&format!(
                        "(() => {{ const el = document.querySelector({escaped}); \
                         if (!el) return false; el.click(); return true; }})()"
                    ))
                    .await?;
                if clicked.as_bool() != Some(true) {
                    return Err(CliError::other(format!("no element matches '{selector}'")));
                }
                Ok(json!({ "clicked": selector }))
            }
            "type" => {
                let (_, viewport, _) = self.with_session(args).await?;
                let selector = args
                    .get("selector")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CliError::other("type requires a selector"))?;
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CliError::other("type requires text"))?;
                let escaped = serde_json::to_string(selector)
                    .map_err(|err| CliError::other(err.to_string()))?;
                let focused = viewport
                    .evaluate(&format!(
                        "(() => {{ const el = document.querySelector({escaped}); \
                         if (!el) return false; el.focus(); return true; }})()"
                    ))
                    .await?;
                if focused.as_bool() != Some(true) {
                    return Err(CliError::other(format!("no element matches '{selector}'")));
                }
                viewport.insert_text(text).await?;
                Ok(json!({ "typed": text }))
            }
            "eval" => {
                let (_, viewport, _) = self.with_session(args).await?;
                let expression = args
                    .get("expression")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CliError::other("eval requires an expression"))?;
                let value = viewport.evaluate(expression).await?;
                Ok(json!({ "value": value }))
            }
            "extract" => {
                let (_, viewport, _) = self.with_session(args).await?;
                let value = viewport
                    .evaluate("document.body ? document.body.innerText : ''")
                    .await?;
                Ok(json!({ "text": value }))
            }
            "capture" => {
                let (_, viewport, _) = self.with_session(args).await?;
                let full_page = args
                    .get("fullPage")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let path = args
                    .get("path")
                    .and_then(Value::as_str)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("capture.png"));
                let bytes = viewport.screenshot(full_page).await?;
                std::fs::write(&path, bytes)?;
                Ok(json!({ "path": path }))
            }
            "state" => {
                let (id, viewport, analyzer) = self.with_session(args).await?;
                let state = analyzer
                    .extract_state()
                    .await
                    .map_err(|err| CliError::other(err.to_string()))?;
                Ok(json!({
                    "session": id,
                    "url": viewport.current_url().await?,
                    "interactiveElements": state.interactive_element_count,
                    "tree": state.tree,
                }))
            }
            "sessions" => {
                let sessions = self.sessions.lock().await;
                let mut list = Vec::new();
                for (id, handle) in sessions.iter() {
                    list.push(json!({
                        "session": id,
                        "url": handle.viewport.current_url().await.unwrap_or_default(),
                    }));
                }
                Ok(Value::Array(list))
            }
            "sessions:close" => {
                match args.get("session").and_then(Value::as_str) {
                    Some(raw) => self.close(&SessionId(raw.to_string())).await?,
                    None => self.close_all().await,
                }
                Ok(json!({ "closed": true }))
            }
            other => Err(CliError::other(format!("unknown command '{other}'"))),
        }
    }
}

/// Per-user socket path in the system temp directory.
pub fn socket_path() -> PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
    std::env::temp_dir()
        .join(format!("open-browser-{user}"))
        .join("control.sock")
}

/// Bind the socket and serve until the process is stopped.
pub async fn serve(directory: Arc<SessionDirectory>) -> Result<(), CliError> {
    let path = socket_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket from a dead server blocks bind.
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    info!(target: "session-server", path = %path.display(), "listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let directory = Arc::clone(&directory);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, directory).await {
                warn!(target: "session-server", ?err, "connection error");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    directory: Arc<SessionDirectory>,
) -> Result<(), CliError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WireRequest>(&line) {
            Ok(request) => directory.handle(request).await,
            Err(err) => WireResponse::err(0, format!("malformed request: {err}")),
        };
        let mut payload = serde_json::to_vec(&response)
            .map_err(|err| CliError::other(err.to_string()))?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
    }
    Ok(())
}

/// One-shot client for the CLI front-end.
pub async fn request(command: &str, args: Value) -> Result<Value, CliError> {
    let path = socket_path();
    let stream = UnixStream::connect(&path).await.map_err(|_| {
        CliError::NoActiveSession("; start the server with `openbrowser serve`".into())
    })?;
    let (reader, mut writer) = stream.into_split();

    let mut payload = serde_json::to_vec(&json!({ "id": 1, "command": command, "args": args }))
        .map_err(|err| CliError::other(err.to_string()))?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;

    let mut lines = BufReader::new(reader).lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| CliError::other("server closed the connection"))?;
    let response: Value =
        serde_json::from_str(&line).map_err(|err| CliError::other(err.to_string()))?;
    if response.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    } else {
        Err(CliError::other(
            response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error")
                .to_string(),
        ))
    }
}
