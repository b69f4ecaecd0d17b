//! Agent run settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum deliberation steps before the run stops.
    pub step_limit: u32,

    /// Cap on actions accepted from a single decision.
    pub commands_per_step: usize,

    /// Consecutive all-failed steps before the run is declared stalled.
    pub failure_threshold: u32,

    /// Conversation bound; oldest user/assistant pairs are pruned past it.
    pub max_messages: usize,

    /// Character budget for the interactive-elements section of a step
    /// prompt.
    pub max_elements_length: usize,

    /// Attach screenshots to step prompts.
    pub use_vision: bool,

    /// Pause between steps, milliseconds.
    pub command_delay_ms: u64,

    /// Per-inference timeout, milliseconds.
    pub model_timeout_ms: u64,

    /// Whole-step wall clock, milliseconds.
    pub step_timeout_ms: u64,

    /// Fraction of the step limit after which a budget warning is
    /// injected into the conversation.
    pub budget_warning_ratio: f64,

    pub temperature: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            step_limit: 100,
            commands_per_step: 10,
            failure_threshold: 5,
            max_messages: 100,
            max_elements_length: 40_000,
            use_vision: false,
            command_delay_ms: 0,
            model_timeout_ms: 30_000,
            step_timeout_ms: 60_000,
            budget_warning_ratio: 0.75,
            temperature: 0.0,
        }
    }
}

impl AgentSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small bounds for tests and smoke runs.
    pub fn minimal() -> Self {
        Self {
            step_limit: 10,
            commands_per_step: 3,
            failure_threshold: 3,
            max_messages: 20,
            max_elements_length: 8_000,
            use_vision: false,
            command_delay_ms: 0,
            model_timeout_ms: 5_000,
            step_timeout_ms: 15_000,
            budget_warning_ratio: 0.75,
            temperature: 0.0,
        }
    }

    pub fn step_limit(mut self, limit: u32) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn vision(mut self, enabled: bool) -> Self {
        self.use_vision = enabled;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn budget_warning_step(&self) -> u32 {
        (f64::from(self.step_limit) * self.budget_warning_ratio).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_warning_lands_at_three_quarters() {
        let settings = AgentSettings::default().step_limit(100);
        assert_eq!(settings.budget_warning_step(), 75);
        let small = AgentSettings::default().step_limit(10);
        assert_eq!(small.budget_warning_step(), 8);
    }
}
