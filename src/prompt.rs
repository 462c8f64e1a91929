//! Fold an OpenAI message history into the single prompt the upstream accepts.
//!
//! The upstream keeps its own memory of the conversation a turn is sent into,
//! and that memory may belong to an unrelated earlier request. The prompt
//! therefore opens with a directive to disregard it, replays the caller's
//! history as `role: content` lines, and ends with an `assistant:` cue.

use crate::openai::ChatMessage;

/// Prepended to every prompt.
pub const FORGET_DIRECTIVE: &str = "Forget previous messages and focus on the current message!\n";

/// Appended to every prompt so the upstream answers as the assistant.
pub const ASSISTANT_CUE: &str = "\nassistant: ";

/// Build the upstream prompt for `turns`, in order.
///
/// Turns are rendered as `"{role}: {content}"` with no separator between
/// them, matching what the upstream has been observed to accept.
pub fn build_prompt(turns: &[ChatMessage]) -> String {
    let mut prompt = String::from(FORGET_DIRECTIVE);
    for turn in turns {
        prompt.push_str(&turn.role);
        prompt.push_str(": ");
        prompt.push_str(&turn.content.text());
    }
    prompt.push_str(ASSISTANT_CUE);
    prompt
}
