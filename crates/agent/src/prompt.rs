//! System-prompt assembly and per-step user message composition.

use openbrowser_core_types::TabInfo;
use openbrowser_perception::RenderedPageState;

use crate::history::StepRecord;

/// Instruction text shared by every step of a run. Built once per agent
/// from the catalog's action listing and cached.
pub struct InstructionBuilder;

impl InstructionBuilder {
    pub fn system(action_list: &str) -> String {
        format!(
            r#"You are a browser automation agent. You complete the user's task by driving a real browser through an iterative observe-plan-act loop.

## Each step you receive
1. Your recent history: evaluations, memory and results of previous actions.
2. The current browser state: URL, open tabs, scroll position and an indexed tree of interactive elements.
3. Optionally a screenshot of the page.

## Element tree format
Interactive elements carry indices in brackets:
```
[0]<button type="submit">Search</button>
[1]<input name="q" placeholder="Search...">
```
- Only bracketed elements can be acted on; indentation shows nesting, bare text is context.
- A `*` prefix (`*[7]`) marks elements that appeared since the previous step.
- Indices are only valid for the current step; never reuse indices from earlier states.

## Available actions
{action_list}

## Response format
Respond with JSON only, in exactly this shape:
```json
{{
  "currentState": {{
    "evaluation": "Success/Failed/Unknown - did the previous actions achieve their goal?",
    "memory": "Concrete facts to remember (ids, values, progress).",
    "nextGoal": "The immediate objective for the actions below."
  }},
  "actions": [
    {{ "name": "tap", "params": {{ "index": 0 }} }}
  ]
}}
```

## Rules
- Batch 1-3 related actions per step. Actions run strictly in order, and the batch is cut short as soon as an action navigates or otherwise changes the page; plan accordingly.
- Use `navigate` for URLs you know; never type URLs into search boxes.
- If an element is missing, scroll towards it or use `find` before guessing indices.
- Sensitive values appear as `<placeholder>` markers; use the markers verbatim, never invent the underlying secret.
- Call `finish` exactly once, alone, when the task is complete (success=true) or impossible (success=false), with the final answer in `text`."#
        )
    }
}

/// Inputs for one step's user message.
pub struct StepContext<'a> {
    pub task: &'a str,
    pub url: &'a str,
    pub state: &'a RenderedPageState,
    pub tabs: &'a [TabInfo],
    pub step: u32,
    pub step_limit: u32,
    pub history: &'a [StepRecord],
    pub sensitive_keys: Vec<&'a str>,
    pub nudges: &'a [String],
    pub page_actions: Option<&'a str>,
}

pub struct StepPromptBuilder {
    pub max_elements_length: usize,
    /// History tail included verbatim in the prompt.
    pub history_window: usize,
}

impl Default for StepPromptBuilder {
    fn default() -> Self {
        Self {
            max_elements_length: 40_000,
            history_window: 5,
        }
    }
}

impl StepPromptBuilder {
    pub fn build(&self, ctx: &StepContext<'_>) -> String {
        let mut out = String::new();

        out.push_str("<agent_history>\n");
        if ctx.history.is_empty() {
            out.push_str("(first step)\n");
        } else {
            let start = ctx.history.len().saturating_sub(self.history_window);
            for record in &ctx.history[start..] {
                out.push_str(&record.summary_line());
                out.push('\n');
            }
        }
        out.push_str("</agent_history>\n\n");

        out.push_str("<agent_state>\n");
        out.push_str(&format!("Task: {}\n", ctx.task));
        if !ctx.sensitive_keys.is_empty() {
            out.push_str(&format!(
                "Sensitive data placeholders available: {}\n",
                ctx.sensitive_keys
                    .iter()
                    .map(|k| format!("<{k}>"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        out.push_str(&format!(
            "Step {} of {}\n",
            ctx.step, ctx.step_limit
        ));
        for nudge in ctx.nudges {
            out.push_str(&format!("Note: {nudge}\n"));
        }
        out.push_str("</agent_state>\n\n");

        out.push_str("<browser_state>\n");
        out.push_str(&format!("Current URL: {}\n", ctx.url));
        if ctx.tabs.len() > 1 {
            out.push_str("Open tabs:\n");
            for tab in ctx.tabs {
                let marker = if tab.active { "*" } else { " " };
                out.push_str(&format!(
                    "{marker} [{}] {} - {}\n",
                    tab.tab,
                    tab.title.as_deref().unwrap_or("(untitled)"),
                    tab.url
                ));
            }
        }
        out.push_str(&format!(
            "Page: {:.0}x{:.0} viewport, {:.0}x{:.0} document, scrolled to ({:.0}, {:.0})\n",
            ctx.state.viewport_size.0,
            ctx.state.viewport_size.1,
            ctx.state.document_size.0,
            ctx.state.document_size.1,
            ctx.state.scroll_position.0,
            ctx.state.scroll_position.1,
        ));
        out.push_str("Interactive elements:\n");
        out.push_str(&truncate_at_paragraph(
            &ctx.state.tree,
            self.max_elements_length,
        ));
        out.push_str("\n</browser_state>\n");

        if let Some(page_actions) = ctx.page_actions {
            out.push_str(&format!(
                "\n<page_specific_actions>\n{page_actions}\n</page_specific_actions>\n"
            ));
        }

        out
    }
}

/// Cut at the budget, backing up to the nearest paragraph (or line)
/// boundary so an element line is never split mid-entry.
fn truncate_at_paragraph(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut cut = budget.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let boundary = head
        .rfind("\n\n")
        .or_else(|| head.rfind('\n'))
        .unwrap_or(cut);
    format!("{}\n[... elements truncated]", &head[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_breaks_at_line_boundary() {
        let text = "line one\nline two\nline three";
        let cut = truncate_at_paragraph(text, 14);
        assert!(cut.starts_with("line one"));
        assert!(cut.contains("[... elements truncated]"));
        assert!(!cut.contains("line tw"));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_at_paragraph("abc", 100), "abc");
    }

    #[test]
    fn system_prompt_embeds_action_list() {
        let prompt = InstructionBuilder::system("- navigate: open a URL");
        assert!(prompt.contains("- navigate: open a URL"));
        assert!(prompt.contains("currentState"));
    }
}
