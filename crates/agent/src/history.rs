//! Step records and run outcomes.

use openbrowser_commands::{Command, CommandResult};
use openbrowser_core_types::TokenUsage;
use serde::{Deserialize, Serialize};

use crate::model::CurrentState;

/// Everything that happened in one step, appended to the run history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub current_state: CurrentState,
    pub actions: Vec<Command>,
    pub results: Vec<CommandResult>,
    pub duration_ms: u64,
    pub usage: TokenUsage,
}

impl StepRecord {
    /// Non-empty result set in which nothing succeeded.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| !r.success)
    }

    /// The `finish` outcome, when this step reported one.
    pub fn finish_result(&self) -> Option<(bool, String)> {
        self.results
            .iter()
            .find(|r| r.is_done == Some(true))
            .map(|r| (r.success, r.extracted_content.clone().unwrap_or_default()))
    }

    /// One-line digest for prompts and CLI output.
    pub fn summary_line(&self) -> String {
        let actions: Vec<&str> = self.actions.iter().map(Command::name).collect();
        let failures: Vec<&str> = self
            .results
            .iter()
            .filter_map(|r| r.error.as_deref())
            .collect();
        let mut line = format!(
            "step {}: eval={} | goal={} | actions=[{}]",
            self.step,
            compact(&self.current_state.evaluation, 60),
            compact(&self.current_state.next_goal, 80),
            actions.join(", "),
        );
        if failures.is_empty() {
            line.push_str(" | ok");
        } else {
            line.push_str(&format!(" | errors: {}", failures.join("; ")));
        }
        if let Some(content) = self
            .results
            .iter()
            .rev()
            .find_map(|r| r.extracted_content.as_deref())
        {
            line.push_str(&format!(" | {}", compact(content, 120)));
        }
        line
    }
}

fn compact(text: &str, budget: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= budget {
        return flat;
    }
    let cut: String = flat.chars().take(budget).collect();
    format!("{cut}…")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A `finish` action was executed.
    Finished,
    /// The step limit was exhausted without a `finish`.
    StepLimit,
    /// Too many consecutive all-failed steps.
    Stalled,
    /// The model failed in a way the loop cannot recover from.
    ModelFailure,
    Cancelled,
}

/// Terminal result of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub success: bool,
    pub final_result: Option<String>,
    pub cancelled: bool,
    pub steps: Vec<StepRecord>,
    pub errors: Vec<String>,
    pub total_usage: TokenUsage,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use openbrowser_commands::model::{FinishParams, TapParams};

    #[test]
    fn finish_result_is_surfaced() {
        let record = StepRecord {
            step: 3,
            current_state: CurrentState::default(),
            actions: vec![Command::Finish(FinishParams {
                text: "42".into(),
                success: true,
            })],
            results: vec![CommandResult::done(true, "42")],
            duration_ms: 10,
            usage: TokenUsage::default(),
        };
        assert_eq!(record.finish_result(), Some((true, "42".to_string())));
        assert!(!record.all_failed());
    }

    #[test]
    fn summary_mentions_actions_and_errors() {
        let record = StepRecord {
            step: 1,
            current_state: CurrentState {
                evaluation: "Unknown".into(),
                memory: String::new(),
                next_goal: "click the button".into(),
            },
            actions: vec![Command::Tap(TapParams { index: 9 })],
            results: vec![CommandResult::failed("element 9 not found")],
            duration_ms: 5,
            usage: TokenUsage::default(),
        };
        let line = record.summary_line();
        assert!(line.contains("tap"));
        assert!(line.contains("element 9 not found"));
        assert!(record.all_failed());
    }
}
