//! OpenBrowser CLI library: command surface, configuration, session
//! directory server and the provider adapter. The agent core lives in
//! the workspace crates under `crates/`.

pub mod cli;
pub mod config;
pub mod errors;
pub mod llm;
pub mod server;
pub mod telemetry;
