//! Configuration file handling.
//!
//! Precedence, lowest to highest: environment defaults, the config file
//! at `~/.open-browser/config.json`, explicit CLI flags.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::CliError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfigSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfigSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BrowserConfigSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_urls: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConfigSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_vision: Option<bool>,
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".open-browser").join("config.json"))
}

/// Load the config file when present; a missing file is the default
/// config, a corrupt one is an error the user should see.
pub fn load() -> Result<AppConfig, CliError> {
    let Some(path) = config_path() else {
        return Ok(AppConfig::default());
    };
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AppConfig::default())
        }
        Err(err) => return Err(CliError::Config(format!("{}: {err}", path.display()))),
    };
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::Config(format!("{}: {err}", path.display())))
}

pub fn save(config: &AppConfig) -> Result<(), CliError> {
    let Some(path) = config_path() else {
        return Err(CliError::Config("cannot resolve home directory".into()));
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(config)
        .map_err(|err| CliError::Config(err.to_string()))?;
    std::fs::write(&path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_camel_case_keys() {
        let raw = serde_json::json!({
            "browser": { "headless": false, "downloadsDir": "/tmp/dl" },
            "agent": { "model": "gpt-4o-mini", "maxSteps": 40 },
            "tracePath": "/tmp/trace"
        });
        let config: AppConfig = serde_json::from_value(raw).expect("parse");
        assert_eq!(config.browser.as_ref().unwrap().headless, Some(false));
        assert_eq!(config.agent.as_ref().unwrap().max_steps, Some(40));
        assert_eq!(config.trace_path.as_deref().unwrap().to_str(), Some("/tmp/trace"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = serde_json::json!({ "browsr": {} });
        assert!(serde_json::from_value::<AppConfig>(raw).is_err());
    }
}
