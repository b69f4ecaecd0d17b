//! Interactive REPL over the session-directory primitives.
//!
//! Commands are the same verbs the session server speaks; the REPL holds
//! an in-process directory instead of going through the socket.

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::errors::CliError;
use crate::server::{SessionDirectory, WireRequest};

const HELP: &str = "commands:
  open <url>            open a browser session
  tap <selector>        click the first matching element
  type <selector> <text...>  focus and type
  eval <expression...>  evaluate javascript
  extract               dump the page text
  capture [path]        save a screenshot
  state                 show the indexed page state
  sessions              list sessions
  close [id]            close one session (or all)
  quit                  exit";

pub async fn run(headless: bool) -> Result<(), CliError> {
    let directory = SessionDirectory::new();
    let mut request_id = 0u64;
    let stdin = std::io::stdin();

    println!("openbrowser repl - 'help' for commands");
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        let (command, args) = match verb {
            "help" => {
                println!("{HELP}");
                continue;
            }
            "quit" | "exit" => break,
            "open" => (
                "open",
                json!({ "url": rest, "headless": headless }),
            ),
            "tap" => ("tap", json!({ "selector": rest })),
            "type" => {
                let mut halves = rest.splitn(2, ' ');
                let selector = halves.next().unwrap_or_default();
                let text = halves.next().unwrap_or_default();
                ("type", json!({ "selector": selector, "text": text }))
            }
            "eval" => ("eval", json!({ "expression": rest })),
            "extract" => ("extract", json!({})),
            "capture" => {
                if rest.is_empty() {
                    ("capture", json!({}))
                } else {
                    ("capture", json!({ "path": rest }))
                }
            }
            "state" => ("state", json!({})),
            "sessions" => ("sessions", json!({})),
            "close" => {
                if rest.is_empty() {
                    ("sessions:close", json!({}))
                } else {
                    ("sessions:close", json!({ "session": rest }))
                }
            }
            other => {
                println!("unknown command '{other}' - try 'help'");
                continue;
            }
        };

        request_id += 1;
        let response = directory
            .handle(WireRequest {
                id: request_id,
                command: command.to_string(),
                args,
            })
            .await;

        if response.success {
            match response.data {
                Some(Value::String(text)) => println!("{text}"),
                Some(data) => println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default()),
                None => println!("ok"),
            }
        } else {
            println!("error: {}", response.error.unwrap_or_default());
        }
    }

    // Leave no browsers behind.
    let _ = shutdown(&directory).await;
    Ok(())
}

async fn shutdown(directory: &Arc<SessionDirectory>) -> Result<(), CliError> {
    let response = directory
        .handle(WireRequest {
            id: u64::MAX,
            command: "sessions:close".to_string(),
            args: json!({}),
        })
        .await;
    if response.success {
        Ok(())
    } else {
        Err(CliError::other(response.error.unwrap_or_default()))
    }
}
