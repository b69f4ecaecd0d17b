//! The deliberation loop: observe, compose, infer, act, record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use openbrowser_commands::{
    CommandCatalog, CommandError, CommandExecutor, CommandResult, ExecutionContext,
    ExtractionModel,
};
use openbrowser_core_types::TokenUsage;
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::Browser;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentSettings;
use crate::conversation::Conversation;
use crate::history::{RunOutcome, RunStatus, StepRecord};
use crate::model::{
    AgentDecision, ContentPart, InvokeRequest, LanguageModel, Message, ModelError,
};
use crate::prompt::{InstructionBuilder, StepContext, StepPromptBuilder};
use crate::signature::{PageSignature, SignatureRing};

const STALL_WINDOW: usize = 3;
const SIGNATURE_RING: usize = 8;

type StepHook = Box<dyn Fn(u32) + Send + Sync>;
type StepEndHook = Box<dyn Fn(u32, &[CommandResult]) + Send + Sync>;

/// Bridges the catalog's extraction capability onto the run's model.
pub struct ModelExtraction {
    model: Arc<dyn LanguageModel>,
}

impl ModelExtraction {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ExtractionModel for ModelExtraction {
    async fn extract(
        &self,
        goal: &str,
        page_text: &str,
        schema: Option<&Value>,
    ) -> Result<Value, CommandError> {
        let schema = schema.cloned().unwrap_or_else(|| {
            json!({
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            })
        });
        let messages = vec![
            Message::system(
                "Extract exactly what the goal asks for from the page text. \
                 Respond with JSON matching the response schema.",
            ),
            Message::user(format!("Goal: {goal}\n\nPage text:\n{page_text}")),
        ];
        let response = self
            .model
            .invoke(InvokeRequest::new(messages, schema))
            .await
            .map_err(|err| CommandError::failed("extract", err.to_string()))?;
        // Unwrap the default envelope so plain extractions read naturally.
        if let Some(content) = response.parsed.get("content").and_then(Value::as_str) {
            if response.parsed.as_object().map(|o| o.len()) == Some(1) {
                return Ok(Value::String(content.to_string()));
            }
        }
        Ok(response.parsed)
    }
}

enum StepVerdict {
    Continue,
    Finished { success: bool, text: String },
    FatalModel(String),
}

/// One agent run over one Viewport.
pub struct Agent {
    task: String,
    browser: Arc<dyn Browser>,
    analyzer: Arc<PageAnalyzer>,
    model: Arc<dyn LanguageModel>,
    executor: CommandExecutor,
    settings: AgentSettings,
    system_prompt: String,
    step_prompts: StepPromptBuilder,
    conversation: Conversation,
    signatures: SignatureRing,
    history: Vec<StepRecord>,
    consecutive_failures: u32,
    total_usage: TokenUsage,
    last_usage: TokenUsage,
    cancel: CancellationToken,
    masked_values: HashMap<String, String>,
    sandbox_dir: Option<PathBuf>,
    pending_nudges: Vec<String>,
    budget_warned: bool,
    on_step_start: Option<StepHook>,
    on_step_end: Option<StepEndHook>,
}

impl Agent {
    pub fn new(
        task: impl Into<String>,
        browser: Arc<dyn Browser>,
        analyzer: Arc<PageAnalyzer>,
        model: Arc<dyn LanguageModel>,
        catalog: Arc<CommandCatalog>,
        settings: AgentSettings,
    ) -> Self {
        let system_prompt = InstructionBuilder::system(&catalog.describe_for(None));
        let step_prompts = StepPromptBuilder {
            max_elements_length: settings.max_elements_length,
            ..Default::default()
        };
        Self {
            task: task.into(),
            browser,
            analyzer,
            model,
            executor: CommandExecutor::new(catalog),
            conversation: Conversation::new(settings.max_messages),
            signatures: SignatureRing::new(SIGNATURE_RING),
            history: Vec::new(),
            consecutive_failures: 0,
            total_usage: TokenUsage::default(),
            last_usage: TokenUsage::default(),
            cancel: CancellationToken::new(),
            masked_values: HashMap::new(),
            sandbox_dir: None,
            pending_nudges: Vec::new(),
            budget_warned: false,
            on_step_start: None,
            on_step_end: None,
            system_prompt,
            step_prompts,
            settings,
        }
    }

    pub fn with_masked_values(mut self, masked: HashMap<String, String>) -> Self {
        self.masked_values = masked;
        self
    }

    pub fn with_sandbox(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sandbox_dir = Some(dir.into());
        self
    }

    pub fn on_step_start(mut self, hook: StepHook) -> Self {
        self.on_step_start = Some(hook);
        self
    }

    pub fn on_step_end(mut self, hook: StepEndHook) -> Self {
        self.on_step_end = Some(hook);
        self
    }

    /// Cooperative cancellation: observed at step boundaries and during
    /// in-flight inference.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn execution_context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Arc::clone(&self.browser), Arc::clone(&self.analyzer));
        ctx.extraction_model = Some(Arc::new(ModelExtraction::new(Arc::clone(&self.model))));
        ctx.masked_values = self.masked_values.clone();
        ctx.sandbox_dir = self.sandbox_dir.clone();
        ctx
    }

    pub async fn run(&mut self) -> RunOutcome {
        let started = Instant::now();
        let ctx = self.execution_context();
        let mut errors: Vec<String> = Vec::new();
        let mut status = RunStatus::StepLimit;
        let mut success = false;
        let mut final_result = None;

        info!(target: "agent", task = %self.task, step_limit = self.settings.step_limit, "run started");

        for step in 1..=self.settings.step_limit {
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            if let Some(hook) = &self.on_step_start {
                hook(step);
            }

            let step_deadline = Duration::from_millis(self.settings.step_timeout_ms);
            let verdict = match timeout(step_deadline, self.run_step(step, &ctx, &mut errors)).await
            {
                Ok(verdict) => verdict,
                Err(_) => {
                    let message = format!("step {step} exceeded its wall clock");
                    warn!(target: "agent", step, "step wall clock exceeded");
                    errors.push(message.clone());
                    self.record_failed_step(step, &message);
                    StepVerdict::Continue
                }
            };

            match verdict {
                StepVerdict::Continue => {}
                StepVerdict::Finished { success: ok, text } => {
                    status = RunStatus::Finished;
                    success = ok;
                    final_result = Some(text);
                    break;
                }
                StepVerdict::FatalModel(message) => {
                    errors.push(message);
                    status = RunStatus::ModelFailure;
                    break;
                }
            }

            if self.consecutive_failures >= self.settings.failure_threshold {
                errors.push(format!(
                    "agent stalled after {} consecutive failed steps",
                    self.consecutive_failures
                ));
                status = RunStatus::Stalled;
                break;
            }

            if self.settings.command_delay_ms > 0 {
                sleep(Duration::from_millis(self.settings.command_delay_ms)).await;
            }
        }

        if self.cancel.is_cancelled() && status != RunStatus::Finished {
            status = RunStatus::Cancelled;
        }

        let outcome = RunOutcome {
            status,
            success,
            final_result,
            cancelled: status == RunStatus::Cancelled,
            steps: self.history.clone(),
            errors,
            total_usage: self.total_usage,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            target: "agent",
            status = ?outcome.status,
            success = outcome.success,
            steps = outcome.steps.len(),
            "run finished"
        );
        outcome
    }

    async fn run_step(
        &mut self,
        step: u32,
        ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> StepVerdict {
        let step_started = Instant::now();

        // Observe.
        let state = match self.analyzer.extract_state().await {
            Ok(state) => state,
            Err(err) => {
                warn!(target: "agent", step, %err, "extract failed");
                errors.push(err.to_string());
                self.record_failed_step(step, &err.to_string());
                return StepVerdict::Continue;
            }
        };
        let url = self
            .browser
            .current_url()
            .await
            .unwrap_or_else(|_| "about:blank".to_string());
        let tabs = self.browser.list_tabs().await;

        self.signatures
            .push(PageSignature::compute(&url, &state));

        // Stall and budget nudges feed both the conversation and the next
        // prompt's state section.
        let step_is_done = |record: &StepRecord| record.finish_result().is_some();
        if self.signatures.is_stalled(STALL_WINDOW)
            && !self.history.iter().rev().take(STALL_WINDOW).any(step_is_done)
        {
            let nudge =
                format!("You appear to be stuck on {url}; try a different approach.");
            debug!(target: "agent", step, "loop nudge injected");
            self.conversation.push_user(Message::user(nudge.clone()));
            self.pending_nudges.push(nudge);
        }
        if !self.budget_warned && step >= self.settings.budget_warning_step() {
            self.budget_warned = true;
            let nudge = format!(
                "You have used {step} of {} steps; wrap up and finish soon.",
                self.settings.step_limit
            );
            self.conversation.push_user(Message::user(nudge.clone()));
            self.pending_nudges.push(nudge);
        }

        // Compose.
        let nudges = std::mem::take(&mut self.pending_nudges);
        let prompt = self.step_prompts.build(&StepContext {
            task: &self.task,
            url: &url,
            state: &state,
            tabs: &tabs,
            step,
            step_limit: self.settings.step_limit,
            history: &self.history,
            sensitive_keys: self.masked_values.keys().map(String::as_str).collect(),
            nudges: &nudges,
            page_actions: None,
        });

        let message = if self.settings.use_vision && !(step == 1 && url == "about:blank") {
            match self.browser.screenshot(false).await {
                Ok(bytes) if !bytes.is_empty() => Message::user_parts(vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::Image {
                        media_type: "image/png".to_string(),
                        data: BASE64.encode(bytes),
                    },
                ]),
                _ => Message::user(prompt),
            }
        } else {
            Message::user(prompt)
        };
        self.conversation.push_user(message);

        // Infer.
        let decision = match self.infer().await {
            Ok(decision) => decision,
            Err(ModelError::Throttled { .. }) => {
                return StepVerdict::FatalModel(
                    "model throttled twice in a row; giving up".to_string(),
                );
            }
            Err(err) => {
                warn!(target: "agent", step, %err, "inference failed");
                errors.push(err.to_string());
                self.record_failed_step(step, &err.to_string());
                return StepVerdict::Continue;
            }
        };

        let mut actions = decision.actions.clone();
        if actions.len() > self.settings.commands_per_step {
            warn!(
                target: "agent",
                step,
                requested = actions.len(),
                cap = self.settings.commands_per_step,
                "action batch truncated"
            );
            actions.truncate(self.settings.commands_per_step);
        }
        self.conversation.push_assistant(
            serde_json::to_string(&decision).unwrap_or_else(|_| "{}".to_string()),
        );

        // Act.
        let results = if self.cancel.is_cancelled() {
            vec![CommandResult::failed("run cancelled")]
        } else {
            self.executor.execute_batch(&actions, ctx).await
        };

        // Record.
        let record = StepRecord {
            step,
            current_state: decision.current_state,
            actions,
            results,
            duration_ms: step_started.elapsed().as_millis() as u64,
            usage: self.last_usage,
        };
        self.last_usage = TokenUsage::default();

        let finish = record.finish_result();
        if record.all_failed() {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        if let Some(hook) = &self.on_step_end {
            hook(step, &record.results);
        }
        self.history.push(record);

        match finish {
            Some((success, text)) => StepVerdict::Finished { success, text },
            None => StepVerdict::Continue,
        }
    }

    /// One inference, retrying once after the suggested delay on a
    /// throttle; a second throttle gives up.
    async fn infer(&mut self) -> Result<AgentDecision, ModelError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.invoke_once().await {
                Ok(decision) => return Ok(decision),
                Err(ModelError::Throttled { retry_after_ms }) if attempt == 1 => {
                    let delay = retry_after_ms.unwrap_or(1_000);
                    debug!(target: "agent", delay, "model throttled, retrying once");
                    sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn invoke_once(&mut self) -> Result<AgentDecision, ModelError> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(self.conversation.messages());

        let mut request = InvokeRequest::new(messages, AgentDecision::response_schema());
        request.schema_name = Some("agent_decision".to_string());
        request.temperature = Some(self.settings.temperature);
        request.timeout = Some(Duration::from_millis(self.settings.model_timeout_ms));

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ModelError::Provider("cancelled".into())),
            response = self.model.invoke(request) => response?,
        };

        self.total_usage.add(&response.usage);
        self.last_usage = response.usage;
        AgentDecision::parse(response.parsed)
    }

    fn record_failed_step(&mut self, step: u32, message: &str) {
        self.consecutive_failures += 1;
        self.history.push(StepRecord {
            step,
            current_state: Default::default(),
            actions: Vec::new(),
            results: vec![CommandResult::failed(message)],
            duration_ms: 0,
            usage: TokenUsage::default(),
        });
    }
}
