//! Streaming bridge
//!
//! Turns a stream of Claude Code messages into uniform `ChatChunk`s, either
//! as an async `ChunkStream` or as a blocking `BlockingChunks` iterator. The
//! blocking form runs the async path on its own thread and runtime and
//! relays items through a bounded queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::message::{AiMessage, ChatChunk, ChatResult, UsageMetadata};
use crate::claude::{ContentBlock, Message, MessageStream, ResultMessage};
use crate::error::ChatError;

const CHUNK_CHANNEL_CAPACITY: usize = 64;
const RELAY_CAPACITY: usize = 64;

/// How long the consuming thread waits on the relay queue per poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Chunks produced by a single message.
///
/// Text blocks become text chunks and thinking blocks become empty-text
/// chunks carrying the trace. A `result` flagged as an error fails.
pub fn chunks_for(message: &Message) -> Result<Vec<ChatChunk>, ChatError> {
    match message {
        Message::Assistant { content, .. } => Ok(content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(ChatChunk::text(text.clone())),
                ContentBlock::Thinking { thinking } => Some(ChatChunk::thinking(thinking.clone())),
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
            })
            .collect()),
        Message::Result(result) if result.is_error => Err(result_error(result)),
        _ => Ok(Vec::new()),
    }
}

fn result_error(result: &ResultMessage) -> ChatError {
    ChatError::model_error(result.result.as_deref().unwrap_or(&result.subtype))
}

/// Usage metadata carried by a terminal result.
#[must_use]
pub fn usage_from(result: &ResultMessage) -> UsageMetadata {
    UsageMetadata {
        usage: result.usage.clone(),
        cost_usd: result.total_cost_usd,
        duration_ms: result.duration_ms,
        session_id: result.session_id.clone(),
        num_turns: (result.num_turns > 0).then_some(result.num_turns),
    }
}

/// Collects a whole turn into a single reply.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    thinking: String,
    usage: UsageMetadata,
}

impl StreamAccumulator {
    /// Create a new empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message into the reply.
    pub fn process(&mut self, message: &Message) -> Result<(), ChatError> {
        for chunk in chunks_for(message)? {
            self.text.push_str(&chunk.content);
            if let Some(thinking) = chunk.thinking {
                self.thinking.push_str(&thinking);
            }
        }
        if let Message::Result(result) = message {
            self.usage = usage_from(result);
        }
        Ok(())
    }

    /// Build the final result.
    #[must_use]
    pub fn finish(self, model: &str) -> ChatResult {
        ChatResult {
            message: AiMessage {
                content: self.text,
                thinking: (!self.thinking.is_empty()).then_some(self.thinking),
                model: model.to_string(),
            },
            usage: self.usage,
        }
    }
}

/// Drive a message stream to completion and collect the reply.
pub async fn collect_result(
    mut messages: MessageStream,
    model: &str,
) -> Result<ChatResult, ChatError> {
    let mut accumulator = StreamAccumulator::new();
    while let Some(message) = messages.next().await {
        accumulator.process(&message?)?;
    }
    Ok(accumulator.finish(model))
}

/// Async stream of chunks backed by a producer task.
///
/// Dropping the stream aborts the producer, which in turn kills the
/// underlying process. Use [`ChunkStream::close`] to also wait for it.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<ChatChunk, ChatError>>,
    producer: Option<JoinHandle<()>>,
    done: bool,
}

impl ChunkStream {
    /// Start consuming the messages produced by `source` on the current runtime.
    ///
    /// `source` runs inside the producer task, so spawning the process (or
    /// acquiring a session) happens there too.
    pub fn spawn<F>(source: F) -> Self
    where
        F: Future<Output = Result<MessageStream, ChatError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let producer = tokio::spawn(async move {
            if let Err(err) = pump(source, &tx).await {
                tracing::error!(error = %err, "error in async streaming");
                let _ = tx.send(Err(err)).await;
            }
        });
        Self {
            rx,
            producer: Some(producer),
            done: false,
        }
    }

    /// Stop consuming, cancel the producer and wait for it to finish.
    pub async fn close(mut self) {
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
            let _ = producer.await;
        }
    }
}

async fn pump<F>(source: F, tx: &mpsc::Sender<Result<ChatChunk, ChatError>>) -> Result<(), ChatError>
where
    F: Future<Output = Result<MessageStream, ChatError>>,
{
    let mut messages = source.await?;
    while let Some(message) = messages.next().await {
        for chunk in chunks_for(&message?)? {
            if tx.send(Ok(chunk)).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

impl Stream for ChunkStream {
    type Item = Result<ChatChunk, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = futures::ready!(self.rx.poll_recv(cx));
        // Nothing follows an error
        if matches!(item, None | Some(Err(_))) {
            self.done = true;
        }
        Poll::Ready(item)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

#[derive(Debug)]
enum Relay {
    Chunk(ChatChunk),
    Failed(ChatError),
    Done,
}

/// Blocking iterator over chunks for callers without a runtime.
///
/// The async path runs on a dedicated thread with its own current-thread
/// runtime. Dropping the iterator early cancels that thread and joins it.
#[derive(Debug)]
pub struct BlockingChunks {
    rx: Option<std_mpsc::Receiver<Relay>>,
    worker: Option<thread::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl BlockingChunks {
    /// Start the worker thread consuming the messages produced by `source`.
    pub fn spawn<F>(source: F) -> Result<Self, ChatError>
    where
        F: Future<Output = Result<MessageStream, ChatError>> + Send + 'static,
    {
        let (tx, rx) = std_mpsc::sync_channel(RELAY_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name("claude-stream".to_string())
            .spawn(move || relay(source, &tx, &token))
            .map_err(|err| ChatError::Runtime(format!("failed to start streaming thread: {err}")))?;

        Ok(Self {
            rx: Some(rx),
            worker: Some(worker),
            cancel,
        })
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, thread::JoinHandle::is_finished)
    }

    /// Cancel the worker, drop the queue and join the thread.
    ///
    /// Returns `true` if the worker panicked.
    fn shutdown(&mut self) -> bool {
        self.cancel.cancel();
        // Dropping the receiver unblocks a worker stuck on a full queue
        self.rx = None;
        self.worker
            .take()
            .is_some_and(|worker| worker.join().is_err())
    }
}

fn relay<F>(source: F, tx: &std_mpsc::SyncSender<Relay>, cancel: &CancellationToken)
where
    F: Future<Output = Result<MessageStream, ChatError>> + Send + 'static,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = tx.send(Relay::Failed(ChatError::Runtime(format!(
                "failed to start streaming runtime: {err}"
            ))));
            return;
        }
    };

    runtime.block_on(async {
        let mut chunks = ChunkStream::spawn(source);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                item = chunks.next() => {
                    let (out, last) = match item {
                        Some(Ok(chunk)) => (Relay::Chunk(chunk), false),
                        Some(Err(err)) => (Relay::Failed(err), true),
                        None => (Relay::Done, true),
                    };
                    if tx.send(out).is_err() || last {
                        break;
                    }
                }
            }
        }
        chunks.close().await;
    });
}

impl Iterator for BlockingChunks {
    type Item = Result<ChatChunk, ChatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let received = self.rx.as_ref()?.recv_timeout(POLL_INTERVAL);
            match received {
                Ok(Relay::Chunk(chunk)) => return Some(Ok(chunk)),
                Ok(Relay::Failed(err)) => {
                    self.shutdown();
                    return Some(Err(err));
                }
                Ok(Relay::Done) => {
                    self.shutdown();
                    return None;
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    let panicked = self.shutdown();
                    return panicked
                        .then(|| Err(ChatError::Runtime("streaming worker panicked".to_string())));
                }
            }
        }
    }
}

impl Drop for BlockingChunks {
    fn drop(&mut self) {
        self.shutdown();
    }
}
