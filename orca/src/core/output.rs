//! Formatting of environment responses shown to the model.

use std::fmt::Write as _;

/// Wrap `content` in a `<{category}_output>` block.
pub fn format_tool_output(category: &str, content: &str) -> String {
    format!("<{category}_output>\n{content}\n</{category}_output>")
}

/// Cap an environment response at `max_chars` characters.
///
/// Over-long responses are cut and followed by a notice giving the original
/// and shown sizes in characters and estimated tokens.
pub fn truncate_env_response(response: &str, max_chars: usize) -> String {
    let original_chars = response.chars().count();
    if original_chars <= max_chars {
        return response.to_string();
    }
    let cut = response
        .char_indices()
        .nth(max_chars)
        .map_or(response.len(), |(index, _)| index);
    let mut out = response[..cut].to_string();
    let rule = "=".repeat(60);
    let _ = write!(
        out,
        "\n\n{rule}\n\u{26a0}\u{fe0f} RESPONSE TRUNCATED \u{26a0}\u{fe0f}\n\
         Original length: ~{} tokens ({original_chars} chars)\n\
         Showing: ~{} tokens ({max_chars} chars)\n{rule}",
        original_chars / 4,
        max_chars / 4,
    );
    out
}

/// Footer appended to every environment response.
pub fn turn_footer(turn: u32, max_turns: u32, final_directive: &str) -> String {
    let mut footer = format!("\n\nturns_used/max_turns: {turn}/{max_turns}");
    if turn == max_turns {
        footer.push(' ');
        footer.push_str(final_directive);
    }
    footer
}

/// Final-turn directive for subagents.
pub const SUBAGENT_FINAL_TURN: &str = "(FINAL TURN - YOU MUST SUBMIT <report> action, NO OTHER ACTIONS ALLOWED, \
     if you have not completed the task, explain what you have done and what remains to be done \
     (if anything) in the comments section)";

/// Final-turn directive for the orchestrator.
pub const ORCHESTRATOR_FINAL_TURN: &str =
    "(FINAL TURN - YOU MUST SUBMIT <finish> action summarizing what was accomplished)";
