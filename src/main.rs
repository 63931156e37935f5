//! claude-chat - chat with Claude through the Claude Code CLI
//!
//! CLI entry point for the chat model adapter.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use claude_chat::cli::ChatDisplay;
use claude_chat::{
    AiMessage, ChatChunk, ChatMessage, ChatModel, ChatModelConfig, ClaudeCodeChatModel,
};

/// Chat with Claude through the Claude Code CLI
///
/// Runs a single prompt, or an interactive loop reading one message per
/// line from stdin when no prompt is given.
#[derive(Parser, Debug)]
#[command(name = "claude-chat", version, about)]
struct Cli {
    /// Path to a chat.toml configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to use, overriding the configuration
    #[arg(long)]
    model: Option<String>,

    /// System prompt, overriding the configuration
    #[arg(long)]
    system: Option<String>,

    /// Print the reply as it arrives
    #[arg(long)]
    stream: bool,

    /// Keep one Claude Code process alive for the whole conversation
    #[arg(long)]
    session: bool,

    /// Show thinking traces on stderr
    #[arg(long)]
    thinking: bool,

    /// Prompt to send; omit for interactive mode
    prompt: Option<String>,
}

/// Load the configuration file (if any) and apply command-line overrides.
fn build_config(cli: &Cli) -> Result<ChatModelConfig> {
    let mut config = match &cli.config {
        Some(path) => ChatModelConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ChatModelConfig::default(),
    };

    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(system) = &cli.system {
        config = config.with_system_prompt(system.clone());
    }
    if cli.session {
        config = config.with_continuous_session(true);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Send one turn and print the reply to stdout.
async fn run_turn(
    model: &ClaudeCodeChatModel,
    display: &ChatDisplay,
    messages: &[ChatMessage],
    stream: bool,
) -> Result<AiMessage> {
    if !stream {
        let result = model.agenerate(messages, None).await?;
        if let Some(thinking) = &result.message.thinking {
            display.render_thinking(&ChatChunk::thinking(thinking.as_str()));
        }
        println!("{}", result.message.content);
        display.render_usage(&result.usage);
        return Ok(result.message);
    }

    let mut chunks = model.astream(messages, None)?;
    let mut reply = AiMessage {
        model: model.config().model.clone(),
        ..AiMessage::default()
    };
    let mut stdout = std::io::stdout();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        display.render_thinking(&chunk);
        if let Some(thinking) = &chunk.thinking {
            reply
                .thinking
                .get_or_insert_with(String::new)
                .push_str(thinking);
        }
        write!(stdout, "{}", chunk.content).context("Failed to write to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
        reply.content.push_str(&chunk.content);
    }
    println!();

    Ok(reply)
}

/// Read messages from stdin until EOF, one turn per non-empty line.
async fn interactive(
    model: &ClaudeCodeChatModel,
    display: &ChatDisplay,
    cli: &Cli,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        display.print_prompt_marker();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // A session keeps its own context, so only the new message is sent
        let turn = if cli.session {
            vec![ChatMessage::human(line)]
        } else {
            history.push(ChatMessage::human(line));
            history.clone()
        };

        match run_turn(model, display, &turn, cli.stream).await {
            Ok(reply) if !cli.session => history.push(ChatMessage::assistant(reply.content)),
            Ok(_) => {}
            Err(e) => {
                display.render_error(&format!("{e:#}"));
                if !cli.session {
                    history.pop();
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let display = ChatDisplay::new(&config.model, cli.thinking);
    let model = ClaudeCodeChatModel::new(config).context("Failed to create chat model")?;

    display.print_header(cli.session);

    if cli.session {
        model
            .connect()
            .await
            .context("Failed to start Claude Code session")?;
    }

    let outcome = match &cli.prompt {
        Some(prompt) => {
            let messages = [ChatMessage::human(prompt.as_str())];
            run_turn(&model, &display, &messages, cli.stream)
                .await
                .map(|_| ())
        }
        None => interactive(&model, &display, &cli).await,
    };

    model.disconnect().await;
    outcome
}
