//! The command vocabulary: every action the planner can request, with
//! strictly-validated parameter shapes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    /// Absolute URL to open in the current tab.
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TapParams {
    /// ElementRef from the current snapshot.
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypeTextParams {
    pub index: u32,
    pub text: String,
    /// Replace the existing value instead of appending.
    #[serde(default = "default_true")]
    pub clear_first: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScrollParams {
    pub direction: ScrollDirection,
    /// Pixels; defaults to most of one viewport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScrollToParams {
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PressKeysParams {
    /// Space-separated chords, e.g. `"Control+a Delete"` or `"Enter"`.
    pub keys: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FocusTabParams {
    pub tab: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NewTabParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CloseTabParams {
    /// Defaults to the current tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    /// What to pull out of the page, in natural language.
    pub goal: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractStructuredParams {
    pub goal: String,
    /// JSON Schema the extraction must conform to.
    pub schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FinishParams {
    /// Final answer reported to the user.
    pub text: String,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WebSearchParams {
    pub query: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UploadParams {
    /// ElementRef of a file input.
    pub index: u32,
    /// Path inside the configured file sandbox.
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectParams {
    pub index: u32,
    /// Option value to select.
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CaptureParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub full_page: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadPageParams {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    pub ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FindParams {
    /// Text to look for among interactive elements.
    pub query: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListOptionsParams {
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PickOptionParams {
    pub index: u32,
    /// Visible label of the option to pick.
    pub option: String,
}

/// Tagged command union. The wire shape is
/// `{"name": "<command>", "params": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum Command {
    Navigate(NavigateParams),
    Tap(TapParams),
    TypeText(TypeTextParams),
    Scroll(ScrollParams),
    ScrollTo(ScrollToParams),
    PressKeys(PressKeysParams),
    FocusTab(FocusTabParams),
    NewTab(NewTabParams),
    CloseTab(CloseTabParams),
    Extract(ExtractParams),
    ExtractStructured(ExtractStructuredParams),
    Finish(FinishParams),
    WebSearch(WebSearchParams),
    Upload(UploadParams),
    Select(SelectParams),
    Capture(CaptureParams),
    ReadPage(ReadPageParams),
    Wait(WaitParams),
    Find(FindParams),
    ListOptions(ListOptionsParams),
    PickOption(PickOptionParams),
}

impl Command {
    pub const ALL_NAMES: &'static [&'static str] = &[
        "navigate",
        "tap",
        "type_text",
        "scroll",
        "scroll_to",
        "press_keys",
        "focus_tab",
        "new_tab",
        "close_tab",
        "extract",
        "extract_structured",
        "finish",
        "web_search",
        "upload",
        "select",
        "capture",
        "read_page",
        "wait",
        "find",
        "list_options",
        "pick_option",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Navigate(_) => "navigate",
            Command::Tap(_) => "tap",
            Command::TypeText(_) => "type_text",
            Command::Scroll(_) => "scroll",
            Command::ScrollTo(_) => "scroll_to",
            Command::PressKeys(_) => "press_keys",
            Command::FocusTab(_) => "focus_tab",
            Command::NewTab(_) => "new_tab",
            Command::CloseTab(_) => "close_tab",
            Command::Extract(_) => "extract",
            Command::ExtractStructured(_) => "extract_structured",
            Command::Finish(_) => "finish",
            Command::WebSearch(_) => "web_search",
            Command::Upload(_) => "upload",
            Command::Select(_) => "select",
            Command::Capture(_) => "capture",
            Command::ReadPage(_) => "read_page",
            Command::Wait(_) => "wait",
            Command::Find(_) => "find",
            Command::ListOptions(_) => "list_options",
            Command::PickOption(_) => "pick_option",
        }
    }

    /// Whether executing this command is expected to change the page, and
    /// therefore truncates the rest of the batch. `web_search` navigates
    /// under the hood.
    pub fn is_page_changing(&self) -> bool {
        matches!(
            self,
            Command::Navigate(_)
                | Command::WebSearch(_)
                | Command::FocusTab(_)
                | Command::NewTab(_)
                | Command::CloseTab(_)
        )
    }

    /// `finish` ends the batch and the run.
    pub fn terminates_sequence(&self) -> bool {
        matches!(self, Command::Finish(_))
    }
}

/// What every handler returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_in_memory: Option<bool>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            success: true,
            extracted_content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn done(success: bool, text: impl Into<String>) -> Self {
        Self {
            success,
            extracted_content: Some(text.into()),
            is_done: Some(true),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_name_plus_params() {
        let cmd = Command::Navigate(NavigateParams {
            url: "https://example.com".to_string(),
        });
        let json = serde_json::to_value(&cmd).expect("serialize");
        assert_eq!(json["name"], "navigate");
        assert_eq!(json["params"]["url"], "https://example.com");
    }

    #[test]
    fn roundtrips_every_variant() {
        let commands = vec![
            Command::Navigate(NavigateParams {
                url: "https://x".into(),
            }),
            Command::Tap(TapParams { index: 3 }),
            Command::TypeText(TypeTextParams {
                index: 0,
                text: "hi".into(),
                clear_first: false,
            }),
            Command::Scroll(ScrollParams {
                direction: ScrollDirection::Down,
                amount: Some(300.0),
            }),
            Command::ScrollTo(ScrollToParams { index: 2 }),
            Command::PressKeys(PressKeysParams {
                keys: "Enter".into(),
            }),
            Command::FocusTab(FocusTabParams { tab: "t1".into() }),
            Command::NewTab(NewTabParams { url: None }),
            Command::CloseTab(CloseTabParams { tab: None }),
            Command::Extract(ExtractParams {
                goal: "title".into(),
            }),
            Command::ExtractStructured(ExtractStructuredParams {
                goal: "prices".into(),
                schema: serde_json::json!({ "type": "array" }),
            }),
            Command::Finish(FinishParams {
                text: "done".into(),
                success: true,
            }),
            Command::WebSearch(WebSearchParams {
                query: "rust".into(),
            }),
            Command::Upload(UploadParams {
                index: 1,
                path: "cv.pdf".into(),
            }),
            Command::Select(SelectParams {
                index: 1,
                value: "b".into(),
            }),
            Command::Capture(CaptureParams::default()),
            Command::ReadPage(ReadPageParams::default()),
            Command::Wait(WaitParams { ms: 250 }),
            Command::Find(FindParams {
                query: "Sign in".into(),
            }),
            Command::ListOptions(ListOptionsParams { index: 4 }),
            Command::PickOption(PickOptionParams {
                index: 4,
                option: "Blue".into(),
            }),
        ];
        assert_eq!(commands.len(), Command::ALL_NAMES.len());
        for cmd in commands {
            let json = serde_json::to_value(&cmd).expect("serialize");
            let back: Command = serde_json::from_value(json).expect("deserialize");
            assert_eq!(back, cmd);
            assert!(Command::ALL_NAMES.contains(&cmd.name()));
        }
    }

    #[test]
    fn unknown_params_are_rejected() {
        let raw = serde_json::json!({
            "name": "tap",
            "params": { "index": 1, "bogus": true }
        });
        assert!(serde_json::from_value::<Command>(raw).is_err());
    }

    #[test]
    fn type_text_defaults_to_clearing() {
        let raw = serde_json::json!({
            "name": "type_text",
            "params": { "index": 0, "text": "q" }
        });
        let cmd: Command = serde_json::from_value(raw).expect("deserialize");
        match cmd {
            Command::TypeText(params) => assert!(params.clear_first),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
