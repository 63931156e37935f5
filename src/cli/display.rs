//! Terminal display for chat sessions
//!
//! Reply text goes to stdout; everything else (model header, thinking,
//! usage summary) goes to stderr so the reply stays clean for piping.

use colored::Colorize;

use crate::chat::message::{ChatChunk, UsageMetadata};

/// Display handler for one chat run
pub struct ChatDisplay {
    model: String,
    show_thinking: bool,
}

impl ChatDisplay {
    /// Create a new display handler for the given model
    #[must_use]
    pub fn new(model: &str, show_thinking: bool) -> Self {
        Self {
            model: model.to_string(),
            show_thinking,
        }
    }

    /// Print the header at the start of a run
    pub fn print_header(&self, session: bool) {
        let mode = if session { "session" } else { "one-shot" };
        eprintln!(
            "{} {} {}",
            "===".bold().cyan(),
            self.model.bold().cyan(),
            format!("({mode})").dimmed()
        );
    }

    /// Print the prompt marker for interactive mode
    pub fn print_prompt_marker(&self) {
        eprint!("{} ", ">".bold().green());
    }

    /// Thinking text to show for a chunk, if any
    #[must_use]
    pub fn thinking_line(&self, chunk: &ChatChunk) -> Option<String> {
        if !self.show_thinking {
            return None;
        }
        chunk
            .thinking
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| truncate(t.trim(), 200))
    }

    /// Render the thinking part of a chunk to stderr
    pub fn render_thinking(&self, chunk: &ChatChunk) {
        if let Some(line) = self.thinking_line(chunk) {
            eprintln!("  {} {}", "thinking:".dimmed(), line.dimmed().italic());
        }
    }

    /// Render the post-reply usage line
    pub fn render_usage(&self, usage: &UsageMetadata) {
        eprintln!("{}", "─".repeat(50).dimmed());
        eprintln!("  {} {}", "Stats:".dimmed(), usage_summary(usage));
    }

    /// Render an error for a turn that failed
    pub fn render_error(&self, message: &str) {
        eprintln!("  {} {}", "✗".red().bold(), message.red());
    }
}

/// One-line summary of cost, duration and turns
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usage_summary(usage: &UsageMetadata) -> String {
    let mut parts = Vec::new();

    if let Some(turns) = usage.num_turns {
        parts.push(format!("{turns} turns"));
    }
    if let Some(cost) = usage.cost_usd {
        parts.push(format!("${cost:.4}"));
    }
    if let Some(ms) = usage.duration_ms {
        parts.push(format!("{:.1}s", ms as f64 / 1000.0));
    }
    if let Some(session_id) = &usage.session_id {
        parts.push(format!("session {session_id}"));
    }

    if parts.is_empty() {
        "no usage reported".to_string()
    } else {
        parts.join(" | ")
    }
}

/// Shorten `text` to at most `max` characters, ending with "..." when cut
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
