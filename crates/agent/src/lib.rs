//! The deliberative agent core.
//!
//! An [`Agent`] drives one browser through observe-plan-act steps: the
//! perception layer renders the page, the [`LanguageModel`] returns an
//! [`AgentDecision`], the command executor runs the actions, and the loop
//! records history, detects stalls and enforces budgets.

pub mod config;
pub mod controller;
pub mod conversation;
pub mod errors;
pub mod history;
pub mod model;
pub mod prompt;
pub mod signature;

pub use config::AgentSettings;
pub use controller::{Agent, ModelExtraction};
pub use conversation::Conversation;
pub use errors::AgentError;
pub use history::{RunOutcome, RunStatus, StepRecord};
pub use model::{
    AgentDecision, ContentPart, CurrentState, FinishReason, InvokeRequest, InvokeResponse,
    LanguageModel, Message, ModelError, UserContent,
};
pub use prompt::{InstructionBuilder, StepPromptBuilder};
pub use signature::{PageSignature, SignatureRing};
