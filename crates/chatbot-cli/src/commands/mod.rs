//! Slash commands for interactive mode

use chatbot_agent::ConversationState;
use chatbot_agent::state::links;

use crate::utils::preview;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the bot)
    Message(String),
    /// Print the current thread's state
    ShowState,
    /// Forget the current thread
    Reset,
    /// List stored threads
    Threads,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let command = input.strip_prefix('/')?;
    let command = command.split_whitespace().next().unwrap_or("").to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "state" | "s" => CommandResult::ShowState,
        "reset" | "r" => CommandResult::Reset,
        "threads" | "t" => CommandResult::Threads,
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /state, /s           Show scope, summary and cached search results of this thread
  /reset, /r           Forget this thread entirely
  /threads, /t         List stored threads
  /quit, /exit, /q     Exit chatbot"#
        .to_string()
}

/// Render a thread's state for `/state`
pub fn describe_state(thread_id: &str, state: Option<&ConversationState>) -> String {
    let Some(state) = state else {
        return format!("Thread {}: no messages yet.", thread_id);
    };

    let mut out = vec![
        format!("Thread:        {}", thread_id),
        format!("Messages:      {}", state.messages().len()),
        format!("Search scope:  {}", state.search_scope),
        format!("Last seen id:  {}", state.last_seen_message_id()),
        format!(
            "Summary:       {}",
            state
                .summary
                .as_deref()
                .map(|s| preview(s, 120))
                .unwrap_or_else(|| "(none)".to_string())
        ),
    ];

    let cached = links(&state.last_search_result);
    if cached.is_empty() {
        out.push("Cached links:  (none)".to_string());
    } else {
        out.push(format!("Cached links:  {}", cached.len()));
        out.extend(cached.iter().map(|link| format!("  {}", link)));
    }
    out.join("\n")
}
