//! Chat model adapter
//!
//! `ChatModel` is the contract an orchestration layer programs against:
//! single-shot and streaming generation, each sync and async.
//! `ClaudeCodeChatModel` implements it on top of the Claude Code CLI.

use std::future::Future;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::chat::bridge::{collect_result, BlockingChunks, ChunkStream};
use crate::chat::config::{inert_parameter_warnings, ChatModelConfig};
use crate::chat::convert::{has_system_message, to_prompt};
use crate::chat::message::{AiMessage, ChatMessage, ChatResult};
use crate::claude::{query, MessageStream, QueryOptions, Session};
use crate::error::{ChatError, INSTALL_HINT};

/// Identifier reported by [`ChatModel::llm_type`].
pub const LLM_TYPE: &str = "claude-code";

/// Chat-model contract.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short backend identifier used for tracing
    fn llm_type(&self) -> &'static str;

    /// Parameters that identify this model instance
    fn identifying_params(&self) -> Value;

    /// Default generation parameters
    fn default_params(&self) -> Value;

    /// Generate a complete reply.
    async fn agenerate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, ChatError>;

    /// Blocking form of [`ChatModel::agenerate`].
    fn generate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, ChatError>;

    /// Stream the reply as chunks. Must be called from within a Tokio runtime.
    fn astream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChunkStream, ChatError>;

    /// Stream the reply through a blocking iterator.
    fn stream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<BlockingChunks, ChatError>;

    /// Generate and return only the reply message.
    async fn ainvoke(&self, messages: &[ChatMessage]) -> Result<AiMessage, ChatError> {
        Ok(self.agenerate(messages, None).await?.message)
    }

    /// Blocking form of [`ChatModel::ainvoke`].
    fn invoke(&self, messages: &[ChatMessage]) -> Result<AiMessage, ChatError> {
        Ok(self.generate(messages, None)?.message)
    }
}

/// Chat model backed by the Claude Code CLI.
///
/// Without session mode every call spawns its own `claude` process. With
/// `use_continuous_session`, calls share one persistent process so the CLI
/// keeps conversational context; send only the new messages each turn.
#[derive(Debug)]
pub struct ClaudeCodeChatModel {
    config: ChatModelConfig,
    session: Arc<Mutex<SessionSlot>>,
}

/// State of the persistent session.
#[derive(Debug, Default)]
enum SessionSlot {
    #[default]
    Closed,
    /// Requested by `connect`; the process starts with the first turn so
    /// that turn decides whether the configured system prompt applies.
    Pending,
    Open {
        session: Session,
        with_system_prompt: bool,
    },
}

impl SessionSlot {
    fn is_live(&self) -> bool {
        match self {
            Self::Closed => false,
            Self::Pending => true,
            Self::Open { session, .. } => session.is_alive(),
        }
    }
}

/// Prompt and CLI options for one call.
struct PreparedCall {
    prompt: String,
    options: QueryOptions,
    has_system: bool,
}

impl ClaudeCodeChatModel {
    /// Create a model, checking that the CLI can be found.
    ///
    /// Non-default `temperature` / `max_tokens` are accepted but have no
    /// effect; each one is reported once with a warning.
    pub fn new(config: ChatModelConfig) -> Result<Self, ChatError> {
        config
            .validate()
            .map_err(|err| ChatError::Config(format!("{err:#}")))?;

        which::which(&config.cli_path).map_err(|err| {
            ChatError::MissingDependency(format!(
                "Claude Code CLI '{}' is not available ({err}).\n\
                 Install it with: {INSTALL_HINT}",
                config.cli_path.display()
            ))
        })?;

        for warning in inert_parameter_warnings(&config) {
            tracing::warn!("{warning}");
        }

        Ok(Self {
            config,
            session: Arc::new(Mutex::new(SessionSlot::Closed)),
        })
    }

    /// The active configuration
    #[must_use]
    pub const fn config(&self) -> &ChatModelConfig {
        &self.config
    }

    /// Open a persistent session. A live session is reused.
    ///
    /// The `claude` process itself starts with the first call, using that
    /// call's options.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let mut slot = self.session.lock().await;
        if !slot.is_live() {
            *slot = SessionSlot::Pending;
            tracing::debug!(model = %self.config.model, "session requested");
        }
        Ok(())
    }

    /// Close the persistent session, if any. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let slot = std::mem::take(&mut *self.session.lock().await);
        if let SessionSlot::Open { session, .. } = slot {
            session.disconnect().await;
            tracing::debug!("session disconnected");
        }
    }

    /// Blocking form of [`ClaudeCodeChatModel::connect`].
    pub fn connect_blocking(&self) -> Result<(), ChatError> {
        run_blocking(self.connect())
    }

    /// Blocking form of [`ClaudeCodeChatModel::disconnect`].
    pub fn disconnect_blocking(&self) {
        let result = run_blocking(async {
            self.disconnect().await;
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "disconnect failed");
        }
    }

    /// Whether a live session is open or requested.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_live()
    }

    /// Session ID reported by the CLI for the open session.
    pub async fn session_id(&self) -> Option<String> {
        match &*self.session.lock().await {
            SessionSlot::Open { session, .. } => session.session_id(),
            SessionSlot::Closed | SessionSlot::Pending => None,
        }
    }

    /// Run `body` inside a session: connect first, disconnect afterwards,
    /// even when `body` fails.
    pub async fn scoped<'a, F, Fut, T>(&'a self, body: F) -> Result<T, ChatError>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<T, ChatError>> + 'a,
    {
        self.connect().await?;
        let outcome = body(self).await;
        self.disconnect().await;
        outcome
    }

    /// Build the prompt and CLI options for a call.
    fn prepare(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<PreparedCall, ChatError> {
        if let Some(stop) = stop.filter(|s| !s.is_empty()) {
            tracing::warn!(
                ?stop,
                "stop sequences are not supported by Claude Code CLI and will be ignored"
            );
        }

        let has_system = has_system_message(messages);
        let prompt = to_prompt(messages)?;
        Ok(PreparedCall {
            prompt,
            options: self.config.query_options(!has_system),
            has_system,
        })
    }

    /// Where the messages for one call come from: the open session, one
    /// started for this call, or a fresh process.
    fn message_source(
        &self,
        call: PreparedCall,
    ) -> impl Future<Output = Result<MessageStream, ChatError>> + Send + 'static {
        let slot = Arc::clone(&self.session);
        let lazy_connect = self.config.use_continuous_session;
        let configured_prompt = self.config.system_prompt.is_some();
        async move {
            let PreparedCall {
                prompt,
                options,
                has_system,
            } = call;
            let mut slot = slot.lock().await;

            let start = match &*slot {
                SessionSlot::Pending => true,
                SessionSlot::Closed => lazy_connect,
                SessionSlot::Open { session, .. } => lazy_connect && !session.is_alive(),
            };
            if start {
                let session = Session::connect(&options).await?;
                tracing::debug!("session connected");
                *slot = SessionSlot::Open {
                    session,
                    with_system_prompt: options.system_prompt.is_some(),
                };
            }

            if let SessionSlot::Open {
                session,
                with_system_prompt,
            } = &*slot
            {
                if has_system && *with_system_prompt {
                    tracing::warn!(
                        "the session was started with the configured system_prompt; \
                         the system message is sent as part of the prompt"
                    );
                } else if has_system && configured_prompt {
                    warn_system_prompt_conflict();
                }
                return Ok(session.query(&prompt)?);
            }
            drop(slot);

            if has_system && configured_prompt {
                warn_system_prompt_conflict();
            }
            Ok::<_, ChatError>(query(&prompt, &options).boxed())
        }
    }
}

fn warn_system_prompt_conflict() {
    tracing::warn!(
        "both a configured system_prompt and a system message were given; \
         using the system message"
    );
}

#[async_trait]
impl ChatModel for ClaudeCodeChatModel {
    fn llm_type(&self) -> &'static str {
        LLM_TYPE
    }

    fn identifying_params(&self) -> Value {
        json!({
            "model_name": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "permission_mode": self.config.permission_mode.as_str(),
        })
    }

    fn default_params(&self) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }

    async fn agenerate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, ChatError> {
        let call = self.prepare(messages, stop)?;
        let messages = self.message_source(call).await?;
        collect_result(messages, &self.config.model).await
    }

    fn generate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, ChatError> {
        run_blocking(self.agenerate(messages, stop))
    }

    fn astream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChunkStream, ChatError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ChatError::Runtime(
                "astream must be called from within a Tokio runtime; use stream instead"
                    .to_string(),
            ));
        }
        let call = self.prepare(messages, stop)?;
        Ok(ChunkStream::spawn(self.message_source(call)))
    }

    fn stream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<BlockingChunks, ChatError> {
        let call = self.prepare(messages, stop)?;
        BlockingChunks::spawn(self.message_source(call))
    }
}

/// Drive `future` to completion from synchronous code.
///
/// Inside a running runtime the future is moved to a dedicated thread with
/// its own runtime, since blocking on the caller's runtime would panic.
fn run_blocking<T, F>(future: F) -> Result<T, ChatError>
where
    T: Send,
    F: Future<Output = Result<T, ChatError>> + Send,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return block_on_fresh(future);
    }

    thread::scope(|scope| {
        thread::Builder::new()
            .name("claude-generate".to_string())
            .spawn_scoped(scope, || block_on_fresh(future))
            .map_err(|err| ChatError::Runtime(format!("failed to start generation thread: {err}")))?
            .join()
            .map_err(|_| ChatError::Runtime("generation thread panicked".to_string()))?
    })
}

fn block_on_fresh<T, F>(future: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| ChatError::Runtime(format!("failed to start runtime: {err}")))?;
    runtime.block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;

    fn model() -> ClaudeCodeChatModel {
        // `sh` stands in for the CLI; these tests never reach the process
        ClaudeCodeChatModel::new(ChatModelConfig::default().with_cli_path("sh")).unwrap()
    }

    #[test]
    fn test_missing_cli_is_reported_with_install_hint() {
        let err = ClaudeCodeChatModel::new(
            ChatModelConfig::default().with_cli_path("/nonexistent/claude-binary"),
        )
        .unwrap_err();
        match err {
            ChatError::MissingDependency(msg) => {
                assert!(msg.contains("npm install"), "got: {msg}");
                assert!(msg.contains("@anthropic-ai/claude-code"), "got: {msg}");
            }
            other => panic!("Expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ClaudeCodeChatModel::new(
            ChatModelConfig::default()
                .with_cli_path("sh")
                .with_allowed_tools(["Bash("]),
        )
        .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_identifying_and_default_params() {
        let model = ClaudeCodeChatModel::new(
            ChatModelConfig::default()
                .with_cli_path("sh")
                .with_temperature(0.3)
                .with_max_tokens(100),
        )
        .unwrap();
        assert_eq!(model.llm_type(), "claude-code");

        let params = model.identifying_params();
        assert_eq!(params["model_name"], "claude-sonnet-4-20250514");
        assert_eq!(params["temperature"], 0.3);
        assert_eq!(params["max_tokens"], 100);
        assert_eq!(params["permission_mode"], "default");

        let defaults = model.default_params();
        assert_eq!(defaults["model"], "claude-sonnet-4-20250514");
        assert!(defaults.get("permission_mode").is_none());
    }

    #[test]
    fn test_prepare_drops_configured_system_prompt_when_conversation_has_one() {
        let model = ClaudeCodeChatModel::new(
            ChatModelConfig::default()
                .with_cli_path("sh")
                .with_system_prompt("configured"),
        )
        .unwrap();

        let call = model.prepare(&[ChatMessage::human("hi")], None).unwrap();
        assert!(!call.has_system);
        assert_eq!(call.options.system_prompt.as_deref(), Some("configured"));

        let call = model
            .prepare(
                &[ChatMessage::system("inline"), ChatMessage::human("hi")],
                Some(&["STOP".to_string()]),
            )
            .unwrap();
        assert!(call.has_system);
        assert!(call.options.system_prompt.is_none());
        assert!(call.prompt.starts_with("System: inline"));
    }

    #[test]
    fn test_empty_conversation_fails_before_spawning() {
        let err = model().generate(&[], None).unwrap_err();
        assert!(matches!(
            err,
            ChatError::InvalidInput(ConvertError::EmptyConversation)
        ));
        assert!(model().stream(&[ChatMessage::human("  ")], None).is_err());
    }

    #[test]
    fn test_astream_outside_runtime_is_an_error() {
        let err = model()
            .astream(&[ChatMessage::human("hi")], None)
            .unwrap_err();
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_logged_by(config: ChatModelConfig) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            ClaudeCodeChatModel::new(config).unwrap();
        });
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_non_default_temperature_warns_exactly_once() {
        let output =
            warnings_logged_by(ChatModelConfig::default().with_cli_path("sh").with_temperature(0.2));
        assert_eq!(output.matches("WARN").count(), 1, "got: {output}");
        assert!(output.contains("Temperature 0.2"), "got: {output}");
    }

    #[test]
    fn test_default_parameters_do_not_warn() {
        let output = warnings_logged_by(ChatModelConfig::default().with_cli_path("sh"));
        assert!(output.is_empty(), "got: {output}");
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_a_no_op() {
        let model = model();
        assert!(!model.is_connected().await);
        model.disconnect().await;
        model.disconnect().await;
        assert!(model.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_defers_process_start_to_first_call() {
        let model = model();
        model.connect().await.unwrap();
        assert!(model.is_connected().await);
        assert!(model.session_id().await.is_none());
        assert!(matches!(*model.session.lock().await, SessionSlot::Pending));

        model.disconnect().await;
        assert!(!model.is_connected().await);
    }

    #[tokio::test]
    async fn test_generate_inside_runtime_does_not_panic() {
        let err = model().generate(&[], None).unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }
}
