//! The `run` subcommand: one task, one browser, one agent.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use openbrowser_agent::{Agent, AgentSettings, LanguageModel, RunOutcome};
use openbrowser_commands::default_catalog;
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::guards::{
    default_guards, DownloadGuard, Guard, HarCaptureGuard, UrlPolicy, UrlPolicyGuard,
    VideoCaptureGuard, VideoCaptureSettings,
};
use openbrowser_viewport::{Browser, LaunchProfile, Viewport};
use tracing::info;

use crate::cli::output;
use crate::config::AppConfig;
use crate::errors::CliError;
use crate::llm::{OpenAiConfig, OpenAiModel};

pub struct RunArgs {
    pub task: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub max_steps: Option<u32>,
    pub headless: bool,
    pub vision: bool,
}

pub async fn run(args: RunArgs, config: &AppConfig) -> Result<RunOutcome, CliError> {
    let browser_section = config.browser.clone().unwrap_or_default();
    let agent_section = config.agent.clone().unwrap_or_default();

    let mut profile = LaunchProfile::from_env();
    if args.headless || browser_section.headless.unwrap_or(true) {
        profile = profile.headless(true);
    } else {
        profile = profile.headless(false);
    }
    if let Some(binary) = &browser_section.binary_path {
        profile = profile.executable(binary.clone());
    }
    if let Some(dir) = &browser_section.user_data_dir {
        profile = profile.user_data_dir(dir.clone());
    }

    let viewport = Viewport::new(profile.build());
    let guards = assemble_guards(&browser_section, config)?;
    viewport.start(guards).await?;

    let analyzer = Arc::new(PageAnalyzer::new(
        Arc::clone(&viewport) as Arc<dyn Browser>
    ));
    let model = build_model(&args, &agent_section)?;

    let mut settings = AgentSettings::default().vision(args.vision);
    if let Some(limit) = args.max_steps.or(agent_section.max_steps) {
        settings = settings.step_limit(limit);
    }

    let mut agent = Agent::new(
        args.task.clone(),
        Arc::clone(&viewport) as Arc<dyn Browser>,
        analyzer,
        model,
        Arc::new(default_catalog()),
        settings,
    )
    .on_step_start(Box::new(output::print_step_start))
    .on_step_end(Box::new(output::print_step_results));

    // Ctrl-C cancels cleanly: the loop observes the token at the next
    // boundary and tears the browser down on the normal path.
    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "cli", "interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let outcome = agent.run().await;
    viewport.close().await;
    Ok(outcome)
}

fn assemble_guards(
    browser_section: &crate::config::BrowserConfigSection,
    config: &AppConfig,
) -> Result<Vec<Arc<dyn Guard>>, CliError> {
    let mut guards = default_guards();

    let downloads_dir = browser_section
        .downloads_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./downloads"));
    guards.push(Arc::new(DownloadGuard::new(downloads_dir)));

    if browser_section.allowed_urls.is_some() || browser_section.blocked_urls.is_some() {
        let policy = UrlPolicy {
            allowed: browser_section.allowed_urls.clone().unwrap_or_default(),
            blocked: browser_section.blocked_urls.clone().unwrap_or_default(),
        };
        guards.push(Arc::new(UrlPolicyGuard::new(policy)));
    }

    let trace_path = env::var("OPEN_BROWSER_TRACE_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(|| config.trace_path.clone());
    if let Some(path) = trace_path {
        guards.push(Arc::new(HarCaptureGuard::new(path)));
    }

    let recording_path = env::var("OPEN_BROWSER_SAVE_RECORDING_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(|| config.recording_path.clone());
    if let Some(path) = recording_path {
        guards.push(Arc::new(VideoCaptureGuard::new(VideoCaptureSettings::new(
            path,
        ))));
    }

    Ok(guards)
}

fn build_model(
    args: &RunArgs,
    agent_section: &crate::config::AgentConfigSection,
) -> Result<Arc<dyn LanguageModel>, CliError> {
    let provider = args
        .provider
        .clone()
        .or_else(|| agent_section.provider.clone())
        .unwrap_or_else(|| "openai".to_string());
    let model_name = args
        .model
        .clone()
        .or_else(|| agent_section.model.clone())
        .unwrap_or_else(|| "gpt-4o-mini".to_string());

    match provider.as_str() {
        "openai" => {
            let config = OpenAiConfig::from_env(model_name)
                .map_err(|err| CliError::Config(err.to_string()))?;
            Ok(Arc::new(OpenAiModel::new(config)))
        }
        other => Err(CliError::Config(format!(
            "unknown provider '{other}' (supported: openai)"
        ))),
    }
}
