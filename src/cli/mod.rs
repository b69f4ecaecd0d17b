//! Command-line surface.

pub mod output;
pub mod repl;
pub mod run;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;

use crate::config;
use crate::errors::CliError;
use crate::server;

#[derive(Parser)]
#[command(
    name = "openbrowser",
    version,
    about = "Autonomous web-browsing agent driving Chromium over CDP"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open (or reuse) a browser session at a URL.
    Open {
        url: String,
        #[arg(long)]
        headless: bool,
        #[arg(long)]
        session: Option<String>,
    },
    /// Click the first element matching a CSS selector.
    Tap {
        selector: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Focus an element and type text into it.
    Type {
        selector: String,
        text: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Evaluate a JavaScript expression on the page.
    Eval {
        expression: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Dump the readable text of the page.
    Extract {
        #[arg(long)]
        session: Option<String>,
    },
    /// Save a screenshot.
    Capture {
        path: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        full_page: bool,
    },
    /// Show the indexed page state.
    State {
        #[arg(long)]
        session: Option<String>,
    },
    /// List open sessions.
    Sessions,
    /// Close a session (all sessions when no id is given).
    #[command(name = "sessions:close")]
    SessionsClose { id: Option<String> },
    /// Run the session directory server.
    Serve,
    /// Run an agent against a natural-language task.
    Run {
        task: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        max_steps: Option<u32>,
        #[arg(long)]
        headless: bool,
        #[arg(long)]
        vision: bool,
    },
    /// Interactive REPL over the same primitives.
    #[command(alias = "repl")]
    Interactive {
        #[arg(long)]
        headless: bool,
    },
}

/// Dispatch a parsed invocation. Returns the process exit code.
pub async fn dispatch(cli: Cli) -> i32 {
    match execute(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn execute(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Open {
            url,
            headless,
            session,
        } => {
            let mut args = json!({ "url": url, "headless": headless });
            if let Some(session) = session {
                args["session"] = json!(session);
            }
            let data = server::request("open", args).await?;
            println!(
                "{} {}",
                data.get("session").and_then(|v| v.as_str()).unwrap_or(""),
                data.get("url").and_then(|v| v.as_str()).unwrap_or("")
            );
            Ok(())
        }
        Commands::Tap { selector, session } => {
            forward("tap", json!({ "selector": selector }), session).await
        }
        Commands::Type {
            selector,
            text,
            session,
        } => {
            forward(
                "type",
                json!({ "selector": selector, "text": text }),
                session,
            )
            .await
        }
        Commands::Eval {
            expression,
            session,
        } => forward("eval", json!({ "expression": expression }), session).await,
        Commands::Extract { session } => forward("extract", json!({}), session).await,
        Commands::Capture {
            path,
            session,
            full_page,
        } => {
            let mut args = json!({ "fullPage": full_page });
            if let Some(path) = path {
                args["path"] = json!(path);
            }
            forward("capture", args, session).await
        }
        Commands::State { session } => forward("state", json!({}), session).await,
        Commands::Sessions => forward("sessions", json!({}), None).await,
        Commands::SessionsClose { id } => {
            let args = match id {
                Some(id) => json!({ "session": id }),
                None => json!({}),
            };
            forward("sessions:close", args, None).await
        }
        Commands::Serve => {
            let directory = server::SessionDirectory::new();
            server::serve(directory).await
        }
        Commands::Run {
            task,
            model,
            provider,
            max_steps,
            headless,
            vision,
        } => {
            let config = config::load()?;
            let outcome = run::run(
                run::RunArgs {
                    task,
                    model,
                    provider,
                    max_steps,
                    headless,
                    vision,
                },
                &config,
            )
            .await?;
            output::print_outcome(&outcome);
            if outcome.success {
                Ok(())
            } else {
                Err(CliError::other("task did not complete successfully"))
            }
        }
        Commands::Interactive { headless } => repl::run(headless).await,
    }
}

async fn forward(
    command: &str,
    mut args: serde_json::Value,
    session: Option<String>,
) -> Result<(), CliError> {
    if let Some(session) = session {
        args["session"] = json!(session);
    }
    let data = server::request(command, args).await?;
    match data {
        serde_json::Value::Null => println!("ok"),
        data => println!(
            "{}",
            serde_json::to_string_pretty(&data).unwrap_or_default()
        ),
    }
    Ok(())
}
