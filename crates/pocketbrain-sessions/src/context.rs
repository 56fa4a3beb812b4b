//! Context-prefix and prompt composition.
//!
//! The context prefix is rebuilt from the immutable chat identity and
//! re-sent on *every* prompt, initial and follow-up. Whatever the agent
//! runtime compacts away internally, the next prompt carries the chat
//! identity again — that is the survives-compaction guarantee.

use crate::types::SessionChat;

/// Marker prepended to autonomous task prompts.
pub const SCHEDULED_TASK_MARKER: &str =
    "SCHEDULED TASK: this is an autonomous scheduled run, not a user message.";

/// The immutable identity block re-injected on every prompt.
pub fn context_prefix(chat: &SessionChat) -> String {
    format!(
        "<pocketbrain_context>\nchatJid: {}\nchatFolder: {}\nisMain: {}\n</pocketbrain_context>",
        chat.jid, chat.folder, chat.is_main
    )
}

/// Compose the one-shot first prompt of a session:
/// `[task marker?] + [instructions, new sessions only] + context + body`.
pub fn compose_first_prompt(
    prefix: &str,
    is_scheduled_task: bool,
    instructions: Option<&str>,
    body: &str,
) -> String {
    let mut out = String::new();
    if is_scheduled_task {
        out.push_str(SCHEDULED_TASK_MARKER);
        out.push_str("\n\n");
    }
    if let Some(instructions) = instructions {
        if !instructions.trim().is_empty() {
            out.push_str(instructions.trim_end());
            out.push_str("\n\n");
        }
    }
    out.push_str(prefix);
    out.push_str("\n\n");
    out.push_str(body);
    out
}

/// Compose a follow-up prompt: the context prefix is re-prepended, the
/// rest of the text is the caller's.
pub fn compose_follow_up(prefix: &str, text: &str) -> String {
    format!("{prefix}\n\n{text}")
}
