//! Built-in handler implementations for the default catalog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_core_types::TabId;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::catalog::CommandHandler;
use crate::context::ExecutionContext;
use crate::errors::CommandError;
use crate::masking::unmask_text;
use crate::model::{Command, CommandResult, ScrollDirection};

const MAX_WAIT_MS: u64 = 30_000;
const PAGE_TEXT_BUDGET: usize = 30_000;

/// Dispatching handler backing every built-in catalog entry.
pub struct BuiltinHandler;

#[async_trait]
impl CommandHandler for BuiltinHandler {
    async fn run(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> Result<CommandResult, CommandError> {
        match command {
            Command::Navigate(params) => navigate(ctx, &params.url).await,
            Command::Tap(params) => tap(ctx, params.index).await,
            Command::TypeText(params) => {
                type_text(ctx, params.index, &params.text, params.clear_first).await
            }
            Command::Scroll(params) => scroll(ctx, params.direction, params.amount).await,
            Command::ScrollTo(params) => scroll_to(ctx, params.index).await,
            Command::PressKeys(params) => press_keys(ctx, &params.keys).await,
            Command::FocusTab(params) => focus_tab(ctx, &params.tab).await,
            Command::NewTab(params) => new_tab(ctx, params.url.as_deref()).await,
            Command::CloseTab(params) => close_tab(ctx, params.tab.as_deref()).await,
            Command::Extract(params) => extract(ctx, &params.goal, None).await,
            Command::ExtractStructured(params) => {
                extract(ctx, &params.goal, Some(&params.schema)).await
            }
            Command::Finish(params) => Ok(CommandResult::done(params.success, &params.text)),
            Command::WebSearch(params) => web_search(ctx, &params.query).await,
            Command::Upload(params) => upload(ctx, params.index, &params.path).await,
            Command::Select(params) => select_value(ctx, params.index, &params.value).await,
            Command::Capture(params) => {
                capture(ctx, params.path.as_deref(), params.full_page).await
            }
            Command::ReadPage(_) => read_page(ctx).await,
            Command::Wait(params) => wait(params.ms).await,
            Command::Find(params) => find(ctx, &params.query),
            Command::ListOptions(params) => list_options(ctx, params.index).await,
            Command::PickOption(params) => pick_option(ctx, params.index, &params.option).await,
        }
    }
}

fn wrap<E: std::fmt::Display>(name: &'static str) -> impl Fn(E) -> CommandError {
    move |err| CommandError::failed(name, err.to_string())
}

async fn navigate(ctx: &ExecutionContext, url: &str) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    browser
        .navigate(url, ctx.navigation_timeout)
        .await
        .map_err(wrap("navigate"))?;
    Ok(CommandResult::with_content(format!("Navigated to {url}")))
}

async fn tap(ctx: &ExecutionContext, index: u32) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    analyzer
        .click_element_by_index(index)
        .await
        .map_err(wrap("tap"))?;
    Ok(CommandResult::with_content(format!("Clicked element {index}")))
}

async fn type_text(
    ctx: &ExecutionContext,
    index: u32,
    text: &str,
    clear_first: bool,
) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    // The planner only ever sees `<key>` markers; real secrets are
    // restored immediately before they reach the page.
    let text = unmask_text(text, &ctx.masked_values);
    analyzer
        .input_text_by_index(index, &text, clear_first)
        .await
        .map_err(wrap("type_text"))?;
    Ok(CommandResult::with_content(format!(
        "Typed into element {index}"
    )))
}

async fn scroll(
    ctx: &ExecutionContext,
    direction: ScrollDirection,
    amount: Option<f64>,
) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let amount = match amount {
        Some(amount) => amount,
        None => {
            let metrics = browser.page_metrics().await.map_err(wrap("scroll"))?;
            (metrics.viewport_height * 0.8).max(200.0)
        }
    };
    let (dx, dy) = match direction {
        ScrollDirection::Up => (0.0, -amount),
        ScrollDirection::Down => (0.0, amount),
        ScrollDirection::Left => (-amount, 0.0),
        ScrollDirection::Right => (amount, 0.0),
    };
    browser.scroll_by(dx, dy).await.map_err(wrap("scroll"))?;
    Ok(CommandResult::with_content(format!(
        "Scrolled {direction:?} by {amount:.0}px"
    )))
}

async fn scroll_to(ctx: &ExecutionContext, index: u32) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    let browser = ctx.require_browser()?;
    let entry = analyzer
        .element_selector(index)
        .ok_or_else(|| CommandError::failed("scroll_to", format!("element {index} not found")))?;
    let selector = js_string(&entry.css_selector);
    browser
        .evaluate(&format!(
            "document.querySelector({selector})?.scrollIntoView({{ block: 'center' }})"
        ))
        .await
        .map_err(wrap("scroll_to"))?;
    Ok(CommandResult::with_content(format!(
        "Scrolled element {index} into view"
    )))
}

async fn press_keys(ctx: &ExecutionContext, keys: &str) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    browser.press_keys(keys).await.map_err(wrap("press_keys"))?;
    Ok(CommandResult::with_content(format!("Pressed {keys}")))
}

async fn focus_tab(ctx: &ExecutionContext, tab: &str) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    browser
        .focus_tab(&TabId(tab.to_string()))
        .await
        .map_err(wrap("focus_tab"))?;
    Ok(CommandResult::with_content(format!("Switched to tab {tab}")))
}

async fn new_tab(ctx: &ExecutionContext, url: Option<&str>) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let url = url.unwrap_or("about:blank");
    let tab = browser.open_tab(url).await.map_err(wrap("new_tab"))?;
    browser.focus_tab(&tab).await.map_err(wrap("new_tab"))?;
    Ok(CommandResult::with_content(format!("Opened tab {tab}")))
}

async fn close_tab(
    ctx: &ExecutionContext,
    tab: Option<&str>,
) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let target = match tab {
        Some(tab) => TabId(tab.to_string()),
        None => browser
            .list_tabs()
            .await
            .into_iter()
            .find(|t| t.active)
            .map(|t| t.tab)
            .ok_or_else(|| CommandError::failed("close_tab", "no active tab"))?,
    };
    browser.close_tab(&target).await.map_err(wrap("close_tab"))?;
    Ok(CommandResult::with_content(format!("Closed tab {target}")))
}

async fn page_text(ctx: &ExecutionContext) -> Result<String, CommandError> {
    let browser = ctx.require_browser()?;
    let value = browser
        .evaluate("document.body ? document.body.innerText : ''")
        .await
        .map_err(wrap("read_page"))?;
    let mut text = value.as_str().unwrap_or_default().to_string();
    if text.chars().count() > PAGE_TEXT_BUDGET {
        text = text.chars().take(PAGE_TEXT_BUDGET).collect();
        text.push_str("\n[... page text truncated]");
    }
    Ok(text)
}

async fn extract(
    ctx: &ExecutionContext,
    goal: &str,
    schema: Option<&Value>,
) -> Result<CommandResult, CommandError> {
    let text = page_text(ctx).await?;
    match (&ctx.extraction_model, schema) {
        (Some(model), _) => {
            let value = model.extract(goal, &text, schema).await?;
            let content = match value {
                Value::String(s) => s,
                other => serde_json::to_string_pretty(&other)
                    .map_err(|err| CommandError::failed("extract", err.to_string()))?,
            };
            debug!(target: "command-extract", goal, "extraction model applied");
            Ok(CommandResult {
                success: true,
                extracted_content: Some(content),
                include_in_memory: Some(true),
                ..Default::default()
            })
        }
        (None, Some(_)) => Err(CommandError::failed(
            "extract_structured",
            "no extraction model available",
        )),
        (None, None) => Ok(CommandResult {
            success: true,
            extracted_content: Some(text),
            include_in_memory: Some(true),
            ..Default::default()
        }),
    }
}

async fn web_search(ctx: &ExecutionContext, query: &str) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let encoded: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("q", query)
        .finish();
    let url = format!("https://duckduckgo.com/html/?{encoded}");
    browser
        .navigate(&url, ctx.navigation_timeout)
        .await
        .map_err(wrap("web_search"))?;
    Ok(CommandResult::with_content(format!(
        "Searched the web for '{query}'"
    )))
}

/// Resolve `path` inside the sandbox, rejecting traversal outside it.
fn sandboxed_path(sandbox: &Path, raw: &str) -> Result<PathBuf, CommandError> {
    let joined = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        sandbox.join(raw)
    };
    let canonical_sandbox = sandbox
        .canonicalize()
        .map_err(|err| CommandError::failed("upload", format!("sandbox unavailable: {err}")))?;
    let canonical = joined
        .canonicalize()
        .map_err(|err| CommandError::failed("upload", format!("file not found: {err}")))?;
    if !canonical.starts_with(&canonical_sandbox) {
        return Err(CommandError::failed(
            "upload",
            format!("path '{raw}' escapes the file sandbox"),
        ));
    }
    Ok(canonical)
}

async fn upload(
    ctx: &ExecutionContext,
    index: u32,
    path: &str,
) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    let browser = ctx.require_browser()?;
    let sandbox = ctx.require_sandbox()?;
    let file = sandboxed_path(sandbox, path)?;

    let entry = analyzer
        .element_selector(index)
        .ok_or_else(|| CommandError::failed("upload", format!("element {index} not found")))?;
    let backend_id = entry.backend_node_id.ok_or_else(|| {
        CommandError::failed("upload", format!("element {index} has no backend node id"))
    })?;
    browser
        .set_file_input(backend_id, &[file.as_path()])
        .await
        .map_err(wrap("upload"))?;
    Ok(CommandResult::with_content(format!(
        "Attached {} to element {index}",
        file.display()
    )))
}

async fn select_value(
    ctx: &ExecutionContext,
    index: u32,
    value: &str,
) -> Result<CommandResult, CommandError> {
    let script = option_script(ctx, index, "value", value)?;
    run_option_script(ctx, "select", index, &script).await
}

async fn pick_option(
    ctx: &ExecutionContext,
    index: u32,
    label: &str,
) -> Result<CommandResult, CommandError> {
    let script = option_script(ctx, index, "label", label)?;
    run_option_script(ctx, "pick_option", index, &script).await
}

fn option_script(
    ctx: &ExecutionContext,
    index: u32,
    field: &str,
    needle: &str,
) -> Result<String, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    let entry = analyzer
        .element_selector(index)
        .ok_or_else(|| CommandError::failed("select", format!("element {index} not found")))?;
    let selector = js_string(&entry.css_selector);
    let needle = js_string(needle);
    Ok(format!(
        "(() => {{\
           const el = document.querySelector({selector});\
           if (!el || !el.options) return 'no select element';\
           const target = Array.from(el.options).find(o => o.{field} === {needle});\
           if (!target) return 'option not found';\
           el.value = target.value;\
           el.dispatchEvent(new Event('input', {{ bubbles: true }}));\
           el.dispatchEvent(new Event('change', {{ bubbles: true }}));\
           return 'ok';\
         }})()"
    ))
}

async fn run_option_script(
    ctx: &ExecutionContext,
    name: &'static str,
    index: u32,
    script: &str,
) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let outcome = browser.evaluate(script).await.map_err(wrap(name))?;
    match outcome.as_str() {
        Some("ok") => Ok(CommandResult::with_content(format!(
            "Selected option on element {index}"
        ))),
        Some(problem) => Err(CommandError::failed(name, problem)),
        None => Err(CommandError::failed(name, "unexpected script result")),
    }
}

async fn list_options(ctx: &ExecutionContext, index: u32) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    let browser = ctx.require_browser()?;
    let entry = analyzer
        .element_selector(index)
        .ok_or_else(|| CommandError::failed("list_options", format!("element {index} not found")))?;
    let selector = js_string(&entry.css_selector);
    let value = browser
        .evaluate(&format!(
            "(() => {{\
               const el = document.querySelector({selector});\
               if (!el || !el.options) return null;\
               return Array.from(el.options).map(o => ({{ value: o.value, label: o.label }}));\
             }})()"
        ))
        .await
        .map_err(wrap("list_options"))?;
    match value {
        Value::Null => Err(CommandError::failed(
            "list_options",
            format!("element {index} is not a select"),
        )),
        options => Ok(CommandResult::with_content(
            serde_json::to_string_pretty(&options)
                .map_err(|err| CommandError::failed("list_options", err.to_string()))?,
        )),
    }
}

async fn capture(
    ctx: &ExecutionContext,
    path: Option<&str>,
    full_page: bool,
) -> Result<CommandResult, CommandError> {
    let browser = ctx.require_browser()?;
    let bytes = browser
        .screenshot(full_page)
        .await
        .map_err(wrap("capture"))?;

    let target: PathBuf = match (path, &ctx.sandbox_dir) {
        (Some(path), Some(sandbox)) if !Path::new(path).is_absolute() => sandbox.join(path),
        (Some(path), _) => PathBuf::from(path),
        (None, Some(sandbox)) => sandbox.join(format!(
            "capture-{}.png",
            unix_timestamp_ms()
        )),
        (None, None) => PathBuf::from(format!("capture-{}.png", unix_timestamp_ms())),
    };
    if let Some(parent) = target.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(&target, bytes)
        .map_err(|err| CommandError::failed("capture", format!("write failed: {err}")))?;
    Ok(CommandResult::with_content(format!(
        "Saved screenshot to {}",
        target.display()
    )))
}

fn unix_timestamp_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

async fn read_page(ctx: &ExecutionContext) -> Result<CommandResult, CommandError> {
    let text = page_text(ctx).await?;
    Ok(CommandResult::with_content(text))
}

async fn wait(ms: u64) -> Result<CommandResult, CommandError> {
    let clamped = ms.min(MAX_WAIT_MS);
    tokio::time::sleep(Duration::from_millis(clamped)).await;
    Ok(CommandResult::with_content(format!("Waited {clamped}ms")))
}

fn find(ctx: &ExecutionContext, query: &str) -> Result<CommandResult, CommandError> {
    let analyzer = ctx.require_analyzer()?;
    let map = analyzer
        .cached_selector_map()
        .ok_or_else(|| CommandError::failed("find", "no snapshot available yet"))?;
    let needle = query.to_lowercase();
    let matches: Vec<String> = map
        .iter()
        .filter(|(_, entry)| {
            entry
                .text
                .as_deref()
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false)
                || entry
                    .aria_label
                    .as_deref()
                    .map(|l| l.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .map(|(index, entry)| {
            format!(
                "[{index}] <{}> '{}'",
                entry.tag_name,
                entry
                    .text
                    .as_deref()
                    .or(entry.aria_label.as_deref())
                    .unwrap_or_default()
            )
        })
        .collect();
    if matches.is_empty() {
        Ok(CommandResult::with_content(format!(
            "No elements matching '{query}'"
        )))
    } else {
        Ok(CommandResult::with_content(matches.join("\n")))
    }
}

fn js_string(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}
