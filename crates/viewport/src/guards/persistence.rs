//! Storage-state persistence: restore cookies on attach, save on demand.
//!
//! The state file follows the `{cookies: [...], origins: [...]}` shape so
//! snapshots can be exchanged with other automation tooling. A missing or
//! corrupt file is logged and skipped, never fatal.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::ViewportError;
use crate::viewport::Viewport;

use super::{Guard, GuardContext, TeardownStack};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Value>,
    #[serde(default)]
    pub origins: Vec<Value>,
}

pub struct PersistenceGuard {
    state_path: PathBuf,
    viewport: Mutex<Option<Arc<Viewport>>>,
    teardown: TeardownStack,
}

impl PersistenceGuard {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            viewport: Mutex::new(None),
            teardown: TeardownStack::default(),
        }
    }

    fn load_state(&self) -> Option<StorageState> {
        let bytes = std::fs::read(&self.state_path).ok()?;
        match serde_json::from_slice::<StorageState>(&bytes) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(
                    target: "guard-persistence",
                    ?err,
                    path = %self.state_path.display(),
                    "ignoring corrupt storage state"
                );
                None
            }
        }
    }

    /// Write the context's current storage state to the configured path.
    pub async fn save(&self) -> Result<(), ViewportError> {
        let viewport = self
            .viewport
            .lock()
            .await
            .clone()
            .ok_or_else(|| ViewportError::internal("persistence guard not attached"))?;

        let response = viewport.send_command("Storage.getCookies", json!({})).await?;
        let cookies = response
            .get("cookies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let state = StorageState {
            cookies,
            origins: Vec::new(),
        };
        let bytes = serde_json::to_vec_pretty(&state)
            .map_err(|err| ViewportError::internal(err.to_string()))?;
        if let Some(parent) = self.state_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&self.state_path, bytes)
            .map_err(|err| ViewportError::internal(format!("write storage state: {err}")))?;
        info!(target: "guard-persistence", path = %self.state_path.display(), "storage state saved");
        Ok(())
    }
}

#[async_trait]
impl Guard for PersistenceGuard {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn priority(&self) -> u32 {
        600
    }

    async fn attach(&self, ctx: GuardContext) -> Result<(), ViewportError> {
        *self.viewport.lock().await = Some(Arc::clone(ctx.viewport()));

        if let Some(state) = self.load_state() {
            if !state.cookies.is_empty() {
                let count = state.cookies.len();
                ctx.viewport()
                    .send_command("Storage.setCookies", json!({ "cookies": state.cookies }))
                    .await?;
                info!(target: "guard-persistence", count, "cookies restored");
            }
        }
        Ok(())
    }

    async fn detach(&self) {
        self.teardown.run().await;
        *self.viewport.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn corrupt_state_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").expect("write");
        let guard = PersistenceGuard::new(&path);
        assert!(guard.load_state().is_none());
    }

    #[test]
    fn state_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let state = StorageState {
            cookies: vec![serde_json::json!({ "name": "sid", "value": "1" })],
            origins: vec![],
        };
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).expect("write");
        let guard = PersistenceGuard::new(&path);
        let loaded = guard.load_state().expect("load");
        assert_eq!(loaded.cookies.len(), 1);
    }
}
