//! Declarative browser launch configuration.
//!
//! A `LaunchProfile` accumulates options and preset flag bundles and is
//! frozen into immutable `LaunchOptions` by [`LaunchProfile::build`]. Flags
//! are deduplicated by switch name with later additions winning, so a
//! bundle can be overridden by an explicit `arg(...)` call.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use which::which;

use crate::errors::ViewportError;

/// Proxy settings forwarded to the browser command line.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Preset flag bundles for common launch postures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagBundle {
    /// Baseline automation flags (no first-run, no default apps, ...).
    Automation,
    /// Disable background services that add noise to network captures.
    StrippedFeatures,
    /// Reduce the most common headless fingerprints.
    AntiDetection,
    /// Flags required to run inside containers without a sandbox helper.
    Container,
    /// Deterministic rendering for pixel-comparison workloads.
    ReproducibleRender,
    /// Disable web security and mixed-content enforcement.
    RelaxedSecurity,
}

fn bundle_args(bundle: FlagBundle) -> &'static [&'static str] {
    match bundle {
        FlagBundle::Automation => &[
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-default-apps",
            "--disable-hang-monitor",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--disable-popup-blocking",
            "--metrics-recording-only",
            "--password-store=basic",
            "--use-mock-keychain",
            "--remote-allow-origins=*",
        ],
        FlagBundle::StrippedFeatures => &[
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-extensions",
        ],
        FlagBundle::AntiDetection => &[
            "--disable-blink-features=AutomationControlled",
            "--disable-infobars",
        ],
        FlagBundle::Container => &[
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
        ],
        FlagBundle::ReproducibleRender => &[
            "--force-color-profile=srgb",
            "--disable-partial-raster",
            "--disable-skia-runtime-opts",
            "--font-render-hinting=none",
            "--hide-scrollbars",
        ],
        FlagBundle::RelaxedSecurity => &[
            "--disable-web-security",
            "--allow-running-insecure-content",
            "--ignore-certificate-errors",
        ],
    }
}

/// Builder-style accumulator for browser launch configuration.
#[derive(Clone, Debug, Default)]
pub struct LaunchProfile {
    headless: Option<bool>,
    window_size: Option<(u32, u32)>,
    proxy: Option<ProxySettings>,
    user_data_dir: Option<PathBuf>,
    executable: Option<PathBuf>,
    channel: Option<String>,
    persist_after_close: bool,
    extra_args: Vec<String>,
    bundles: Vec<FlagBundle>,
    websocket_url: Option<String>,
    command_timeout_ms: Option<u64>,
    navigation_timeout_ms: Option<u64>,
}

impl LaunchProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile seeded from the `BROWSER_*` / `OPEN_BROWSER_*` environment.
    pub fn from_env() -> Self {
        let mut profile = Self::new();
        if let Ok(raw) = env::var("BROWSER_HEADLESS") {
            profile.headless = Some(truthy(&raw));
        }
        if let Ok(raw) = env::var("BROWSER_DISABLE_SECURITY") {
            if truthy(&raw) {
                profile = profile.bundle(FlagBundle::RelaxedSecurity);
            }
        }
        if let Ok(path) = env::var("BROWSER_BINARY_PATH") {
            if !path.trim().is_empty() {
                profile.executable = Some(PathBuf::from(path.trim()));
            }
        }
        if let Ok(path) = env::var("BROWSER_USER_DATA_DIR") {
            if !path.trim().is_empty() {
                profile.user_data_dir = Some(PathBuf::from(path.trim()));
            }
        }
        if let Ok(server) = env::var("OPEN_BROWSER_PROXY_SERVER") {
            if !server.trim().is_empty() {
                profile.proxy = Some(ProxySettings {
                    server: server.trim().to_string(),
                    username: env::var("OPEN_BROWSER_PROXY_USERNAME").ok(),
                    password: env::var("OPEN_BROWSER_PROXY_PASSWORD").ok(),
                });
            }
        }
        profile
    }

    pub fn headless(mut self, enabled: bool) -> Self {
        self.headless = Some(enabled);
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = Some((width, height));
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Named release channel used during discovery (`chrome`, `chromium`,
    /// `msedge`). Ignored when an explicit executable is set.
    pub fn channel(mut self, name: impl Into<String>) -> Self {
        self.channel = Some(name.into());
        self
    }

    pub fn persist_after_close(mut self, persist: bool) -> Self {
        self.persist_after_close = persist;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn bundle(mut self, bundle: FlagBundle) -> Self {
        if !self.bundles.contains(&bundle) {
            self.bundles.push(bundle);
        }
        self
    }

    /// Attach to an already-running browser instead of launching one.
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = Some(ms);
        self
    }

    pub fn navigation_timeout_ms(mut self, ms: u64) -> Self {
        self.navigation_timeout_ms = Some(ms);
        self
    }

    /// Freeze the profile into immutable launch options.
    pub fn build(self) -> LaunchOptions {
        let headless = self.headless.unwrap_or(true);

        let mut flags: Vec<String> = Vec::new();
        for bundle in [FlagBundle::Automation, FlagBundle::StrippedFeatures] {
            if !self.bundles.contains(&bundle) {
                flags.extend(bundle_args(bundle).iter().map(|s| s.to_string()));
            }
        }
        for bundle in &self.bundles {
            flags.extend(bundle_args(*bundle).iter().map(|s| s.to_string()));
        }
        if headless {
            flags.push("--headless=new".to_string());
            flags.push("--mute-audio".to_string());
        }
        if let Some((w, h)) = self.window_size {
            flags.push(format!("--window-size={w},{h}"));
        }
        if let Some(proxy) = &self.proxy {
            flags.push(format!("--proxy-server={}", proxy.server));
        }
        flags.extend(self.extra_args.iter().cloned());

        LaunchOptions {
            executable: self
                .executable
                .or_else(|| detect_browser_executable(self.channel.as_deref())),
            user_data_dir: self.user_data_dir.unwrap_or_else(default_profile_dir),
            headless,
            window_size: self.window_size,
            proxy: self.proxy,
            persist_after_close: self.persist_after_close,
            args: dedupe_flags(flags),
            websocket_url: self.websocket_url,
            command_timeout_ms: self.command_timeout_ms.unwrap_or(10_000),
            navigation_timeout_ms: self.navigation_timeout_ms.unwrap_or(30_000),
        }
    }
}

/// Immutable launch configuration consumed by the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub window_size: Option<(u32, u32)>,
    pub proxy: Option<ProxySettings>,
    pub persist_after_close: bool,
    pub args: Vec<String>,
    pub websocket_url: Option<String>,
    pub command_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        LaunchProfile::from_env().build()
    }
}

impl LaunchOptions {
    pub fn require_executable(&self) -> Result<&Path, ViewportError> {
        self.executable
            .as_deref()
            .ok_or_else(|| ViewportError::launch("no Chrome/Chromium executable found"))
    }
}

/// Deduplicate by switch name; the last occurrence wins, first-seen order
/// is kept for the survivors.
fn dedupe_flags(flags: Vec<String>) -> Vec<String> {
    let mut last: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for flag in flags {
        let key = flag
            .split_once('=')
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| flag.clone());
        if !last.contains_key(&key) {
            order.push(key.clone());
        }
        last.insert(key, flag);
    }
    order
        .into_iter()
        .filter_map(|key| last.remove(&key))
        .collect()
}

fn truthy(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off" | ""
    )
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("BROWSER_USER_DATA_DIR") {
        if !path.trim().is_empty() {
            return PathBuf::from(path.trim());
        }
    }
    PathBuf::from("./.open-browser-profile")
}

/// Locate a Chrome/Chromium binary: explicit env override first, then the
/// PATH, then well-known install locations.
pub fn detect_browser_executable(channel: Option<&str>) -> Option<PathBuf> {
    if let Ok(raw) = env::var("BROWSER_BINARY_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    if let Some(channel) = channel {
        if let Ok(path) = which(channel) {
            return Some(path);
        }
    }

    for name in executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_paths().into_iter().find(|p| p.exists())
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                }
            }
        }
        paths
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_flags_win_dedup() {
        let options = LaunchProfile::new()
            .headless(true)
            .arg("--window-size=1,1")
            .window_size(1280, 720)
            .build();
        let sizes: Vec<&String> = options
            .args
            .iter()
            .filter(|a| a.starts_with("--window-size"))
            .collect();
        assert_eq!(sizes.len(), 1);
        // extra_args are appended after derived flags, so the explicit
        // argument overrides window_size().
        assert_eq!(sizes[0], "--window-size=1,1");
    }

    #[test]
    fn headless_adds_new_headless_flag() {
        let options = LaunchProfile::new().headless(true).build();
        assert!(options.args.iter().any(|a| a == "--headless=new"));
        let headful = LaunchProfile::new().headless(false).build();
        assert!(!headful.args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn relaxed_security_bundle_applies() {
        let options = LaunchProfile::new()
            .bundle(FlagBundle::RelaxedSecurity)
            .build();
        assert!(options.args.iter().any(|a| a == "--disable-web-security"));
    }

    #[test]
    fn proxy_becomes_flag() {
        let options = LaunchProfile::new()
            .proxy(ProxySettings {
                server: "http://127.0.0.1:8080".into(),
                username: None,
                password: None,
            })
            .build();
        assert!(options
            .args
            .iter()
            .any(|a| a == "--proxy-server=http://127.0.0.1:8080"));
    }
}
