//! Persistent Claude Code session
//!
//! A `Session` keeps one `claude` process alive in stream-json input mode so
//! that consecutive prompts share conversational context. The process and
//! its pipes are owned by a dedicated worker thread running its own Tokio
//! runtime; callers talk to it over channels, which makes a session usable
//! from any runtime and from blocking code alike.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::cli::{build_session_command, QueryOptions};
use super::process::{spawn_error, MessageStream};
use super::stream::{parse_message, Message};
use crate::error::ClaudeError;

const TURN_CHANNEL_CAPACITY: usize = 32;

/// Session ID sent before the CLI has told us the real one.
const DEFAULT_SESSION_ID: &str = "default";

/// How long a dead process gets to flush the rest of its stderr.
const STDERR_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Request {
    Turn {
        prompt: String,
        reply: mpsc::Sender<Result<Message, ClaudeError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a long-lived `claude` process.
#[derive(Debug)]
pub struct Session {
    requests: mpsc::UnboundedSender<Request>,
    session_id: watch::Receiver<Option<String>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Session {
    /// Start a session process with the given options.
    ///
    /// Resolves once the process has been spawned, or fails with the spawn
    /// error (typically `ClaudeError::CliNotFound`).
    pub async fn connect(options: &QueryOptions) -> Result<Self, ClaudeError> {
        let cmd = build_session_command(options);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (id_tx, id_rx) = watch::channel(None);

        let worker = thread::Builder::new()
            .name("claude-session".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = ready_tx.send(Err(ClaudeError::Io(err)));
                        return;
                    }
                };
                runtime.block_on(run_worker(cmd, ready_tx, requests_rx, id_tx));
            })?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(ClaudeError::NotConnected));
        if let Err(err) = ready {
            let _ = worker.join();
            return Err(err);
        }

        Ok(Self {
            requests: requests_tx,
            session_id: id_rx,
            worker: Some(worker),
        })
    }

    /// Send a prompt and stream the messages of the resulting turn.
    ///
    /// The stream ends after the turn's `result` message. Turns are handled
    /// one at a time; a second call waits until the first turn finished.
    pub fn query(&self, prompt: &str) -> Result<MessageStream, ClaudeError> {
        let (reply, mut rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        self.requests
            .send(Request::Turn {
                prompt: prompt.to_string(),
                reply,
            })
            .map_err(|_| ClaudeError::NotConnected)?;
        Ok(Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx))))
    }

    /// Session ID reported by the CLI, once known.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    /// Whether the worker is still accepting turns.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Stop the process and join the worker thread.
    pub async fn disconnect(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
    }
}

struct SessionProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    session_id: watch::Sender<Option<String>>,
    broken: bool,
}

async fn run_worker(
    cmd: std::process::Command,
    ready: oneshot::Sender<Result<(), ClaudeError>>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    session_id: watch::Sender<Option<String>>,
) {
    let mut process = match SessionProcess::spawn(cmd, session_id) {
        Ok(process) => {
            let _ = ready.send(Ok(()));
            process
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let mut ack = None;
    while let Some(request) = requests.recv().await {
        match request {
            Request::Turn { prompt, reply } => {
                process.turn(&prompt, &reply).await;
                if process.broken {
                    // Queued turns still get an answer; new ones are refused
                    requests.close();
                }
            }
            Request::Shutdown { ack: sender } => {
                ack = Some(sender);
                break;
            }
        }
    }

    process.shutdown().await;
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

impl SessionProcess {
    fn spawn(
        cmd: std::process::Command,
        session_id: watch::Sender<Option<String>>,
    ) -> Result<Self, ClaudeError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = TokioCommand::from(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(&program, err))?;
        tracing::debug!(program = %program, pid = ?child.id(), "started claude session");

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("no stdout from claude"))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("no stderr from claude"))?;

        // Stderr is collected line by line so a mid-session failure can report it
        let stderr = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&stderr);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr_pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(mut buf) = sink.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
        });

        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            stderr,
            stderr_task: Some(stderr_task),
            session_id,
            broken: false,
        })
    }

    async fn turn(&mut self, prompt: &str, reply: &mpsc::Sender<Result<Message, ClaudeError>>) {
        if self.broken {
            let _ = reply.send(Err(ClaudeError::NotConnected)).await;
            return;
        }
        if let Err(err) = self.run_turn(prompt, reply).await {
            self.broken = true;
            let _ = reply.send(Err(err)).await;
        }
    }

    async fn run_turn(
        &mut self,
        prompt: &str,
        reply: &mpsc::Sender<Result<Message, ClaudeError>>,
    ) -> Result<(), ClaudeError> {
        let current_id = self
            .session_id
            .borrow()
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        let payload = json!({
            "type": "user",
            "message": { "role": "user", "content": prompt },
            "parent_tool_use_id": null,
            "session_id": current_id,
        });

        let stdin = self.stdin.as_mut().ok_or(ClaudeError::NotConnected)?;
        if let Err(err) = write_line(stdin, &format!("{payload}\n")).await {
            // A CLI that died before reading its input shows up as a broken pipe
            if err.kind() == io::ErrorKind::BrokenPipe {
                tracing::debug!(error = %err, "claude session closed its input");
                return Err(self.exit_error().await);
            }
            return Err(err.into());
        }

        let mut consumer_alive = true;
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(self.exit_error().await);
            };
            let Some(message) = parse_message(&line)? else {
                continue;
            };
            if let Some(id) = message.session_id() {
                if self.session_id.borrow().as_deref() != Some(id) {
                    self.session_id.send_replace(Some(id.to_string()));
                }
            }

            let done = matches!(message, Message::Result(_));
            // A consumer that stops early still leaves the turn to finish,
            // so the next prompt starts on a clean boundary
            if consumer_alive && reply.send(Ok(message)).await.is_err() {
                consumer_alive = false;
            }
            if done {
                return Ok(());
            }
        }
    }

    async fn exit_error(&mut self) -> ClaudeError {
        let exit_code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(err) => return ClaudeError::Io(err),
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(STDERR_GRACE, task).await;
        }
        let stderr = self
            .stderr
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        ClaudeError::Process { exit_code, stderr }
    }

    async fn shutdown(mut self) {
        // Closing stdin lets the CLI exit on its own; kill covers the rest
        drop(self.stdin.take());
        let _ = self.child.kill().await;
        tracing::debug!("claude session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake session CLI: answers every stdin line with an init, one text
    /// message echoing the turn number, and a result.
    const ECHO_SESSION: &str = r#"#!/bin/sh
n=0
while read -r line; do
  n=$((n+1))
  echo '{"type":"system","subtype":"init","session_id":"sess-42"}'
  echo "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"turn $n\"}]}}"
  echo "{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"result\":\"turn $n\",\"session_id\":\"sess-42\"}"
done
"#;

    fn fake_cli(dir: &TempDir, script: &str) -> QueryOptions {
        let path = dir.path().join("claude");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        QueryOptions {
            cli_path: Some(path),
            ..Default::default()
        }
    }

    async fn texts(stream: MessageStream) -> Vec<String> {
        stream
            .filter_map(|item| async move {
                match item {
                    Ok(Message::Result(r)) => r.result,
                    _ => None,
                }
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_turns_share_one_process() {
        let dir = TempDir::new().unwrap();
        let session = Session::connect(&fake_cli(&dir, ECHO_SESSION)).await.unwrap();

        assert_eq!(texts(session.query("a").unwrap()).await, vec!["turn 1"]);
        assert_eq!(texts(session.query("b").unwrap()).await, vec!["turn 2"]);
        assert_eq!(session.session_id().as_deref(), Some("sess-42"));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_missing_binary_fails() {
        let opts = QueryOptions {
            cli_path: Some("/nonexistent/claude-binary".into()),
            ..Default::default()
        };
        let err = Session::connect(&opts).await.unwrap_err();
        assert!(matches!(err, ClaudeError::CliNotFound { .. }));
    }

    #[tokio::test]
    async fn test_dropping_turn_stream_early_keeps_session_usable() {
        let dir = TempDir::new().unwrap();
        let session = Session::connect(&fake_cli(&dir, ECHO_SESSION)).await.unwrap();

        let mut first = session.query("a").unwrap();
        let _ = first.next().await;
        drop(first);

        assert_eq!(texts(session.query("b").unwrap()).await, vec!["turn 2"]);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_process_death_reports_exit_and_stderr() {
        let dir = TempDir::new().unwrap();
        let opts = fake_cli(
            &dir,
            "#!/bin/sh\nread -r line\necho 'Unable to authenticate' >&2\nexit 1\n",
        );
        let session = Session::connect(&opts).await.unwrap();

        let items: Vec<_> = session.query("hi").unwrap().collect().await;
        match items.last() {
            Some(Err(ClaudeError::Process { exit_code, stderr })) => {
                assert_eq!(*exit_code, Some(1));
                assert!(stderr.contains("Unable to authenticate"), "got: {stderr}");
            }
            other => panic!("Expected Process error, got {other:?}"),
        }

        // Subsequent turns fail fast instead of hanging
        assert!(!session.is_alive());
        assert!(matches!(session.query("again"), Err(ClaudeError::NotConnected)));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_startup_failure_reports_exit_and_stderr() {
        let dir = TempDir::new().unwrap();
        let opts = fake_cli(&dir, "#!/bin/sh\necho 'Unable to authenticate' >&2\nexit 1\n");
        let session = Session::connect(&opts).await.unwrap();

        // Let the CLI die before the first prompt is written
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let items: Vec<_> = session.query("hi").unwrap().collect().await;
        match items.last() {
            Some(Err(ClaudeError::Process { exit_code, stderr })) => {
                assert_eq!(*exit_code, Some(1));
                assert!(stderr.contains("Unable to authenticate"), "got: {stderr}");
            }
            other => panic!("Expected Process error, got {other:?}"),
        }
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_query_after_worker_exit_is_not_connected() {
        let dir = TempDir::new().unwrap();
        let session = Session::connect(&fake_cli(&dir, ECHO_SESSION)).await.unwrap();
        let (ack_tx, ack_rx) = oneshot::channel();
        session
            .requests
            .send(Request::Shutdown { ack: ack_tx })
            .unwrap();
        ack_rx.await.unwrap();

        // The worker drops its receiver once it returns
        for _ in 0..100 {
            if !session.is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!session.is_alive());
        assert!(matches!(session.query("x"), Err(ClaudeError::NotConnected)));
        session.disconnect().await;
    }
}
