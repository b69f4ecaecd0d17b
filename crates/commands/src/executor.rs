//! Sequential command execution with batch-truncation semantics.
//!
//! Actions run strictly in order. After each action the executor stops the
//! batch when the action terminates the sequence (`finish`), is
//! page-changing by nature, or the observed URL differs from before the
//! action. This contract is part of the prompt the planner sees.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::CommandCatalog;
use crate::context::ExecutionContext;
use crate::errors::CommandError;
use crate::masking::mask_params;
use crate::model::{Command, CommandResult};

pub struct CommandExecutor {
    catalog: Arc<CommandCatalog>,
}

impl CommandExecutor {
    pub fn new(catalog: Arc<CommandCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<CommandCatalog> {
        &self.catalog
    }

    /// Run a batch in order, truncating on terminate/page-change/url-change.
    /// Returns the results accumulated up to and including the truncating
    /// action.
    pub async fn execute_batch(
        &self,
        commands: &[Command],
        ctx: &ExecutionContext,
    ) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(commands.len());
        let mut url_before = self.observed_url(ctx).await;

        for command in commands {
            let result = self.execute(command, ctx).await;
            let done = result.is_done == Some(true);
            results.push(result);

            if done || command.terminates_sequence() {
                debug!(target: "command-executor", name = command.name(), "sequence terminated");
                break;
            }
            if command.is_page_changing() {
                debug!(target: "command-executor", name = command.name(), "page-changing action, batch truncated");
                break;
            }
            let url_after = self.observed_url(ctx).await;
            if url_after != url_before {
                debug!(
                    target: "command-executor",
                    name = command.name(),
                    before = url_before.as_deref().unwrap_or(""),
                    after = url_after.as_deref().unwrap_or(""),
                    "url changed, batch truncated"
                );
                break;
            }
            url_before = url_after;
        }
        results
    }

    /// Execute one already-validated command. Handler errors never
    /// propagate; they are funneled into a failed `CommandResult`.
    pub async fn execute(&self, command: &Command, ctx: &ExecutionContext) -> CommandResult {
        let name = command.name();
        let Some(entry) = self.catalog.get(name) else {
            return CommandResult::failed(format!("command '{name}' is not registered"));
        };
        if let Err(err) = ctx.satisfies(name, &entry.needs) {
            return CommandResult::failed(err.to_string());
        }

        match entry.handler.run(command, ctx).await {
            Ok(result) => result,
            Err(err @ CommandError::Failed { .. }) => {
                warn!(target: "command-executor", name, %err, "command failed");
                CommandResult::failed(err.to_string())
            }
            Err(other) => {
                warn!(target: "command-executor", name, %other, "command failed");
                CommandResult::failed(
                    CommandError::failed(name, other.to_string()).to_string(),
                )
            }
        }
    }

    /// Validation entry point for raw `{name, params}` payloads coming
    /// from external surfaces (session server, tool bridges). Applies
    /// sensitive-value masking before validation.
    pub async fn execute_named(
        &self,
        name: &str,
        params: Value,
        ctx: &ExecutionContext,
    ) -> Result<CommandResult, CommandError> {
        if self.catalog.get(name).is_none() {
            return Err(CommandError::not_registered(name));
        }

        let mut params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        mask_params(&mut params, &ctx.masked_values);

        let envelope = serde_json::json!({ "name": name, "params": params });
        let command: Command = serde_json::from_value(envelope)
            .map_err(|err| CommandError::validation(name, err.to_string()))?;

        Ok(self.execute(&command, ctx).await)
    }

    async fn observed_url(&self, ctx: &ExecutionContext) -> Option<String> {
        match &ctx.browser {
            Some(browser) => browser.current_url().await.ok(),
            None => None,
        }
    }
}
