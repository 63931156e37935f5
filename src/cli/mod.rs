//! CLI output formatting
//!
//! Human-readable terminal display for the `claude-chat` binary.

pub mod display;

pub use display::usage_summary;
pub use display::ChatDisplay;
