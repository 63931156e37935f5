//! Claude Code integration
//!
//! This module handles CLI command building, stream-JSON output parsing,
//! one-shot process invocations and persistent sessions.

pub mod cli;
pub mod process;
pub mod session;
pub mod stream;

pub use cli::{PermissionMode, QueryOptions};
pub use process::{query, MessageStream, QueryStream};
pub use session::Session;
pub use stream::{ContentBlock, Message, ResultMessage};
