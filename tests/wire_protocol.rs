//! Session-server wire protocol shapes and directory error paths.

use openbrowser_cli::server::{SessionDirectory, WireRequest};
use serde_json::json;

#[tokio::test]
async fn unknown_command_is_an_error_response() {
    let directory = SessionDirectory::new();
    let response = directory
        .handle(WireRequest {
            id: 7,
            command: "teleport".to_string(),
            args: json!({}),
        })
        .await;

    assert_eq!(response.id, 7);
    assert!(!response.success);
    assert!(response.error.unwrap_or_default().contains("teleport"));
}

#[tokio::test]
async fn session_commands_without_sessions_fail_cleanly() {
    let directory = SessionDirectory::new();
    for command in ["tap", "eval", "state", "extract"] {
        let response = directory
            .handle(WireRequest {
                id: 1,
                command: command.to_string(),
                args: json!({ "selector": "a", "expression": "1" }),
            })
            .await;
        assert!(!response.success, "{command} must fail without a session");
        assert!(response
            .error
            .unwrap_or_default()
            .to_lowercase()
            .contains("session"));
    }
}

#[tokio::test]
async fn sessions_list_is_empty_initially() {
    let directory = SessionDirectory::new();
    let response = directory
        .handle(WireRequest {
            id: 2,
            command: "sessions".to_string(),
            args: json!({}),
        })
        .await;
    assert!(response.success);
    assert_eq!(response.data, Some(json!([])));
}

#[test]
fn request_parses_wire_shape() {
    let raw = r#"{"id": 3, "command": "open", "args": {"url": "https://x", "headless": true}}"#;
    let request: WireRequest = serde_json::from_str(raw).expect("parse");
    assert_eq!(request.id, 3);
    assert_eq!(request.command, "open");
    assert_eq!(request.args["url"], "https://x");
}
