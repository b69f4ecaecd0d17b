//! Terminal rendering for steps and run outcomes.

use openbrowser_agent::{RunOutcome, RunStatus, StepRecord};
use openbrowser_commands::CommandResult;

pub fn print_step_start(step: u32) {
    eprintln!("--- step {step} ---");
}

pub fn print_step_results(step: u32, results: &[CommandResult]) {
    for result in results {
        let marker = if result.success { "ok " } else { "ERR" };
        let detail = result
            .error
            .as_deref()
            .or(result.extracted_content.as_deref())
            .unwrap_or("");
        eprintln!("[{marker}] step {step}: {detail}");
    }
}

pub fn print_step_record(record: &StepRecord) {
    println!("{}", record.summary_line());
}

pub fn print_outcome(outcome: &RunOutcome) {
    println!();
    for record in &outcome.steps {
        print_step_record(record);
    }
    println!();
    let status = match outcome.status {
        RunStatus::Finished if outcome.success => "completed",
        RunStatus::Finished => "finished without success",
        RunStatus::StepLimit => "stopped at step limit",
        RunStatus::Stalled => "stalled",
        RunStatus::ModelFailure => "model failure",
        RunStatus::Cancelled => "cancelled",
    };
    println!("Result: {status} after {} steps", outcome.steps.len());
    if let Some(answer) = &outcome.final_result {
        println!("Answer: {answer}");
    }
    if !outcome.total_usage.is_empty() {
        println!(
            "Tokens: {} prompt + {} completion = {}",
            outcome.total_usage.prompt_tokens,
            outcome.total_usage.completion_tokens,
            outcome.total_usage.total_tokens
        );
    }
    println!(
        "Duration: {:.1}s",
        outcome.total_duration_ms as f64 / 1000.0
    );
    if !outcome.errors.is_empty() {
        println!("Errors:");
        for error in &outcome.errors {
            println!("  - {error}");
        }
    }
}
