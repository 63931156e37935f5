//! One-shot Claude Code invocation
//!
//! `query` spawns `claude -p <prompt> --output-format stream-json`, parses
//! stdout line by line on a background task, and hands the messages to the
//! caller through a channel. The child is killed as soon as the stream is
//! dropped.

use std::io;
use std::pin::Pin;
use std::process::{Command, Stdio};
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cli::{build_command, QueryOptions};
use super::stream::{parse_message, Message};
use crate::error::ClaudeError;

/// Any source of parsed Claude Code messages.
pub type MessageStream = BoxStream<'static, Result<Message, ClaudeError>>;

const CHANNEL_CAPACITY: usize = 32;

/// Stream of messages from a running `claude` process.
///
/// Ends after the process closes stdout. A non-zero exit is reported as a
/// final `ClaudeError::Process` item carrying the captured stderr.
#[derive(Debug)]
pub struct QueryStream {
    rx: mpsc::Receiver<Result<Message, ClaudeError>>,
    task: JoinHandle<()>,
}

impl QueryStream {
    /// Spawn `cmd` on the current Tokio runtime and stream its output.
    ///
    /// Must be called from within a runtime.
    #[must_use]
    pub fn spawn(cmd: Command) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            if let Err(err) = run_process(cmd, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        Self { rx, task }
    }

    /// Box the stream for use as a `MessageStream`.
    #[must_use]
    pub fn boxed(self) -> MessageStream {
        Box::pin(self)
    }
}

impl Stream for QueryStream {
    type Item = Result<Message, ClaudeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        // Dropping the task drops the child, which kills it
        self.task.abort();
    }
}

/// Run a single prompt through Claude Code.
#[must_use]
pub fn query(prompt: &str, options: &QueryOptions) -> QueryStream {
    QueryStream::spawn(build_command(prompt, options))
}

/// Map a spawn failure onto the error taxonomy.
pub(crate) fn spawn_error(program: &str, err: io::Error) -> ClaudeError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ClaudeError::CliNotFound {
            path: program.to_string(),
            reason: err.to_string(),
        },
        _ => ClaudeError::Io(err),
    }
}

/// Read a pipe to the end, lossily decoding it.
pub(crate) async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %err, "failed to read claude stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn run_process(
    cmd: Command,
    tx: &mpsc::Sender<Result<Message, ClaudeError>>,
) -> Result<(), ClaudeError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = TokioCommand::from(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| spawn_error(&program, err))?;
    tracing::debug!(program = %program, pid = ?child.id(), "spawned claude");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("no stdout from claude"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("no stderr from claude"))?;
    let stderr_task = tokio::spawn(read_all(stderr));

    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(message) = parse_message(&line)? else {
            continue;
        };
        if tx.send(Ok(message)).await.is_err() {
            tracing::debug!("message consumer went away, stopping claude");
            return Ok(());
        }
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();
    if status.success() {
        Ok(())
    } else {
        Err(ClaudeError::Process {
            exit_code: status.code(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    async fn collect(cmd: Command) -> Vec<Result<Message, ClaudeError>> {
        QueryStream::spawn(cmd).collect().await
    }

    #[tokio::test]
    async fn test_streams_parsed_messages_in_order() {
        let items = collect(sh(concat!(
            r#"echo '{"type":"system","subtype":"init","session_id":"s1"}';"#,
            r#"echo '';"#,
            r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}';"#,
            r#"echo '{"type":"result","subtype":"success","is_error":false,"result":"hi"}'"#,
        )))
        .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Ok(Message::System { .. })));
        assert!(matches!(items[1], Ok(Message::Assistant { .. })));
        assert!(matches!(items[2], Ok(Message::Result(_))));
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_code_and_stderr() {
        let items = collect(sh("echo 'Unable to authenticate' >&2; exit 1")).await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(ClaudeError::Process { exit_code, stderr }) => {
                assert_eq!(*exit_code, Some(1));
                assert!(stderr.contains("Unable to authenticate"));
            }
            other => panic!("Expected Process error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_line_ends_stream_with_decode_error() {
        let items = collect(sh("echo 'garbage'; echo '{\"type\":\"result\"}'")).await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(ClaudeError::JsonDecode { line, .. }) => assert_eq!(line, "garbage"),
            other => panic!("Expected JsonDecode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_cli_not_found() {
        let items = collect(Command::new("/nonexistent/claude-binary")).await;
        match &items[0] {
            Err(ClaudeError::CliNotFound { path, .. }) => {
                assert_eq!(path, "/nonexistent/claude-binary");
            }
            other => panic!("Expected CliNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_uses_options_program() {
        let opts = QueryOptions {
            cli_path: Some("/nonexistent/claude-binary".into()),
            ..Default::default()
        };
        let first = query("hello", &opts).next().await.unwrap();
        assert!(matches!(first, Err(ClaudeError::CliNotFound { .. })));
    }
}
