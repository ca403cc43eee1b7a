//! System prompt assembly for the two generation modes plus the repair
//! loop's fix exchange. Pure string templating; the formatting contracts
//! (TeX-delimited math, single fenced `html` block) live in the template
//! text itself.

/// System prompt for experiment mode: summary prose first, then exactly one
/// fenced `html` block holding a complete standalone document.
pub fn experiment_prompt(user_text: &str, knowledge_text: &str) -> String {
    let mut prompt = String::from(EXPERIMENT_TEMPLATE);
    if !knowledge_text.trim().is_empty() {
        prompt.push_str("\n\nBackground knowledge you may draw on:\n");
        prompt.push_str(knowledge_text.trim());
    }
    prompt.push_str("\n\nThe concept the user wants demonstrated:\n");
    prompt.push_str(user_text.trim());
    prompt
}

/// System prompt for follow-up chat turns: continue the technical
/// conversation under the same math-delimiting contract, without
/// regenerating the demo unless asked.
pub fn chat_prompt(knowledge_text: &str) -> String {
    let mut prompt = String::from(CHAT_TEMPLATE);
    if !knowledge_text.trim().is_empty() {
        prompt.push_str("\n\nBackground knowledge you may draw on:\n");
        prompt.push_str(knowledge_text.trim());
    }
    prompt
}

/// User-facing prompt for a "fix this code" exchange in the repair loop.
pub fn fix_prompt(code: &str, errors: &[String], suggestions: &[String]) -> String {
    let mut prompt = String::from(
        "The following JavaScript has syntax defects. Return the corrected \
         code in a single fenced ```js block and nothing else.\n\nCode:\n```js\n",
    );
    prompt.push_str(code);
    prompt.push_str("\n```\n\nDetected errors:\n");
    for error in errors {
        prompt.push_str("- ");
        prompt.push_str(error);
        prompt.push('\n');
    }
    if !suggestions.is_empty() {
        prompt.push_str("\nSuggestions:\n");
        for suggestion in suggestions {
            prompt.push_str("- ");
            prompt.push_str(suggestion);
            prompt.push('\n');
        }
    }
    prompt
}

const EXPERIMENT_TEMPLATE: &str = "\
You are an expert physics educator and front-end engineer. The user will \
describe a physics or science concept; build an interactive demonstration \
of it as a single, completely self-contained HTML document (inline CSS and \
JavaScript, no external resources, no network calls).

Layout requirements:
- Two panes: a control panel (sliders, buttons, readouts) and a simulation \
canvas. The simulation must animate and respond to the controls live.
- Works when opened directly from a file, in any modern browser.

Formatting requirements:
- Write every mathematical expression in TeX delimiters: \\( ... \\) inline \
or $$ ... $$ display. Never emit bare Unicode math symbols.
- Start your reply with a short prose summary of the physics being shown.
- End your reply with exactly one fenced code block labeled `html` that \
contains the entire document from <!DOCTYPE html> to </html>. No other \
code blocks.";

const CHAT_TEMPLATE: &str = "\
You are an expert physics educator continuing a technical conversation \
about an interactive demo that was generated earlier. Answer follow-up \
questions, explain the underlying physics, and suggest parameter ranges to \
explore. Refer to the existing demo rather than regenerating it unless the \
user explicitly asks for a new version.

Write every mathematical expression in TeX delimiters: \\( ... \\) inline \
or $$ ... $$ display. Never emit bare Unicode math symbols.";
