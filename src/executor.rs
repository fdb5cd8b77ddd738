//! Retrying tool-call executor.
//!
//! Every AI-driven sub-operation (create branch, analyze repository
//! structure, modify a file, open a PR) has the same shape: build an
//! instruction plus a restricted tool allow-list, invoke the backend, and
//! consume heterogeneous event chunks until a terminal result appears. This
//! module owns that loop once, so call sites don't each carry their own
//! retry/backoff/fault-isolation logic.
//!
//! Failure semantics: after exhausting attempts the executor returns `None`.
//! Callers treat that as "this sub-operation did not happen" and decide
//! whether to skip, abort, or flag for stage-level retry. Expected failure
//! modes never propagate as errors past this boundary.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clients::AgentBackend;
use crate::stream::{AgentEvent, ContentItem, content_text, extract_json};

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// How the terminal signal was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A structured payload (or explicit domain signal) confirmed success.
    Confirmed,
    /// The stream ended without an explicit success marker, but chunks were
    /// processed and no fatal error chunk was seen. This leniency is
    /// deliberate - it tolerates an unreliable backend at the cost of
    /// possible false positives. Callers wanting certainty should verify
    /// with a read-back before trusting it.
    Assumed,
}

#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    /// Structured JSON recovered from the stream, when any. Tool-result
    /// payloads are preferred over free-text scanning of the final blob.
    pub structured: Option<Value>,
    pub completion: Completion,
    pub chunks_processed: u32,
    /// A tool result reported "already exists" for an idempotent operation.
    pub already_exists: bool,
}

impl ToolCallOutcome {
    pub fn structured_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.structured.as_ref().and_then(Value::as_object)
    }
}

pub struct ToolCallExecutor {
    backend: Arc<dyn AgentBackend>,
    max_attempts: u32,
    backoff: Duration,
}

/// What one drained stream amounted to.
enum AttemptResult {
    Done(ToolCallOutcome),
    /// Operation reported failure through a fatal chunk; not retried.
    Failed,
    /// Stream-level breakdown or empty stream; worth another attempt.
    Retry(String),
}

impl ToolCallExecutor {
    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self::with_policy(backend, MAX_ATTEMPTS, RETRY_BACKOFF)
    }

    pub fn with_policy(backend: Arc<dyn AgentBackend>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            backend,
            max_attempts,
            backoff,
        }
    }

    /// Run one tool-call operation to completion. Returns `None` after all
    /// attempts are exhausted or when the operation reported failure.
    pub async fn execute(
        &self,
        instruction: &str,
        allowed_tools: &[String],
    ) -> Option<ToolCallOutcome> {
        for attempt in 1..=self.max_attempts {
            let stream = match self.backend.stream(instruction, allowed_tools).await {
                Ok(stream) => stream,
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, error = %err, "agent call failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                    continue;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "agent call failed, giving up");
                    return None;
                }
            };

            match self.drain(stream).await {
                AttemptResult::Done(outcome) => {
                    if outcome.completion == Completion::Assumed {
                        warn!(
                            chunks = outcome.chunks_processed,
                            "stream ended without explicit success marker, assuming success"
                        );
                    }
                    return Some(outcome);
                }
                AttemptResult::Failed => return None,
                AttemptResult::Retry(reason) if attempt < self.max_attempts => {
                    warn!(attempt, %reason, "attempt failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                AttemptResult::Retry(reason) => {
                    warn!(%reason, "all attempts exhausted");
                }
            }
        }
        None
    }

    async fn drain(&self, mut stream: crate::clients::EventStream) -> AttemptResult {
        let mut chunks: u32 = 0;
        let mut accumulated = String::new();
        let mut tool_structured: Option<Value> = None;
        let mut final_text: Option<String> = None;
        let mut saw_fatal = false;
        let mut already_exists = false;

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                // One malformed chunk must not lose an otherwise-successful
                // run: log and continue with the next chunk.
                Err(err) if !err.is_retryable() => {
                    warn!(error = %err, "skipping malformed chunk");
                    continue;
                }
                Err(err) => return AttemptResult::Retry(err.to_string()),
            };

            chunks += 1;
            match event {
                AgentEvent::Assistant { message } => {
                    for item in message.content {
                        match item {
                            ContentItem::ToolUse { name, input } => {
                                debug!(tool = %name, input = %input, "tool invocation");
                            }
                            ContentItem::ToolResult { content, is_error } => {
                                let text = content_text(&content);
                                if is_error {
                                    if text.to_lowercase().contains("already exists") {
                                        already_exists = true;
                                    } else {
                                        warn!(result = %text, "tool reported an error");
                                        saw_fatal = true;
                                    }
                                } else if let Ok(value) = serde_json::from_str::<Value>(text.trim())
                                {
                                    // Exact JSON from a tool result beats
                                    // free-text scanning later.
                                    if value.is_object() || value.is_array() {
                                        tool_structured = Some(value);
                                    }
                                }
                            }
                            ContentItem::Text { text } => {
                                accumulated.push_str(&text);
                                accumulated.push('\n');
                            }
                        }
                    }
                }
                AgentEvent::Result { result, is_error } => {
                    if is_error {
                        saw_fatal = true;
                    }
                    final_text = result;
                }
                AgentEvent::System { .. } => {}
            }
        }

        if already_exists {
            return AttemptResult::Done(ToolCallOutcome {
                structured: None,
                completion: Completion::Confirmed,
                chunks_processed: chunks,
                already_exists: true,
            });
        }

        if chunks == 0 {
            return AttemptResult::Retry("stream ended without producing any chunks".to_string());
        }

        let structured = tool_structured
            .or_else(|| final_text.as_deref().and_then(extract_json))
            .or_else(|| extract_json(&accumulated));

        if saw_fatal && structured.is_none() {
            return AttemptResult::Failed;
        }

        let completion = if structured.is_some() {
            Completion::Confirmed
        } else {
            Completion::Assumed
        };
        AttemptResult::Done(ToolCallOutcome {
            structured,
            completion,
            chunks_processed: chunks,
            already_exists: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::EventStream;
    use crate::errors::AgentError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted backend: each call pops the next canned attempt.
    struct ScriptedBackend {
        attempts: Mutex<Vec<Attempt>>,
        calls: AtomicU32,
    }

    enum Attempt {
        StreamError(AgentError),
        Events(Vec<Result<AgentEvent, AgentError>>),
    }

    impl ScriptedBackend {
        fn new(attempts: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                attempts: Mutex::new(attempts),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentBackend for ScriptedBackend {
        async fn stream(
            &self,
            _instruction: &str,
            _allowed_tools: &[String],
        ) -> Result<EventStream, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                if attempts.is_empty() {
                    Attempt::Events(vec![])
                } else {
                    attempts.remove(0)
                }
            };
            match attempt {
                Attempt::StreamError(err) => Err(err),
                Attempt::Events(events) => Ok(Box::pin(futures::stream::iter(events))),
            }
        }
    }

    fn result_event(text: &str) -> AgentEvent {
        AgentEvent::Result {
            result: Some(text.to_string()),
            is_error: false,
        }
    }

    fn tool_result(content: &str, is_error: bool) -> AgentEvent {
        AgentEvent::Assistant {
            message: crate::stream::AssistantMessage {
                content: vec![ContentItem::ToolResult {
                    content: serde_json::Value::String(content.to_string()),
                    is_error,
                }],
            },
        }
    }

    fn fast_executor(backend: Arc<ScriptedBackend>) -> ToolCallExecutor {
        ToolCallExecutor::with_policy(backend, MAX_ATTEMPTS, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![Ok(result_event(
            r#"{"branch_created": true}"#,
        ))])]);
        let executor = fast_executor(backend.clone());

        let outcome = executor.execute("do it", &[]).await.unwrap();
        assert_eq!(outcome.completion, Completion::Confirmed);
        assert_eq!(outcome.structured.unwrap()["branch_created"], true);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds_on_third_attempt() {
        let backend = ScriptedBackend::new(vec![
            Attempt::StreamError(AgentError::Transport("connection reset".into())),
            Attempt::StreamError(AgentError::TaskGroup(vec!["subtask died".into()])),
            Attempt::Events(vec![Ok(result_event(r#"{"ok": true}"#))]),
        ]);
        let executor = fast_executor(backend.clone());

        let outcome = executor.execute("do it", &[]).await.unwrap();
        assert_eq!(outcome.completion, Completion::Confirmed);
        assert_eq!(backend.calls(), 3, "exactly 3 invocations expected");
    }

    #[tokio::test]
    async fn test_retry_bound_is_three_attempts() {
        let backend = ScriptedBackend::new(vec![
            Attempt::StreamError(AgentError::Transport("down".into())),
            Attempt::StreamError(AgentError::Transport("down".into())),
            Attempt::StreamError(AgentError::Transport("down".into())),
            // Would succeed on a 4th attempt - must never be reached.
            Attempt::Events(vec![Ok(result_event(r#"{"ok": true}"#))]),
        ]);
        let executor = fast_executor(backend.clone());

        assert!(executor.execute("do it", &[]).await.is_none());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_chunk_does_not_abort_stream() {
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![
            Err(AgentError::Decode("unexpected token".into())),
            Ok(result_event(r#"{"modified": true}"#)),
        ])]);
        let executor = fast_executor(backend.clone());

        let outcome = executor.execute("do it", &[]).await.unwrap();
        assert_eq!(outcome.completion, Completion::Confirmed);
        assert_eq!(outcome.structured.unwrap()["modified"], true);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_exists_short_circuits_as_success() {
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![Ok(tool_result(
            "Reference already exists for this repository",
            true,
        ))])]);
        let executor = fast_executor(backend);

        let outcome = executor.execute("create branch", &[]).await.unwrap();
        assert!(outcome.already_exists);
        assert_eq!(outcome.completion, Completion::Confirmed);
    }

    #[tokio::test]
    async fn test_ambiguous_stream_end_assumes_success() {
        // Chunks processed, no fatal error, no structured payload.
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![Ok(AgentEvent::Assistant {
            message: crate::stream::AssistantMessage {
                content: vec![ContentItem::Text {
                    text: "working on it".into(),
                }],
            },
        })])]);
        let executor = fast_executor(backend);

        let outcome = executor.execute("do it", &[]).await.unwrap();
        assert_eq!(outcome.completion, Completion::Assumed);
        assert!(outcome.structured.is_none());
        assert_eq!(outcome.chunks_processed, 1);
    }

    #[tokio::test]
    async fn test_empty_stream_retries_then_gives_up() {
        let backend = ScriptedBackend::new(vec![
            Attempt::Events(vec![]),
            Attempt::Events(vec![]),
            Attempt::Events(vec![]),
        ]);
        let executor = fast_executor(backend.clone());

        assert!(executor.execute("do it", &[]).await.is_none());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_result_chunk_fails_without_retry() {
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![Ok(AgentEvent::Result {
            result: Some("tool execution denied".into()),
            is_error: true,
        })])]);
        let executor = fast_executor(backend.clone());

        assert!(executor.execute("do it", &[]).await.is_none());
        // Operation *reported* failure; that is not a transport problem.
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_result_json_preferred_over_final_text() {
        let backend = ScriptedBackend::new(vec![Attempt::Events(vec![
            Ok(tool_result(r#"{"source": "tool_result"}"#, false)),
            Ok(result_event(r#"{"source": "final_text"}"#)),
        ])]);
        let executor = fast_executor(backend);

        let outcome = executor.execute("do it", &[]).await.unwrap();
        assert_eq!(outcome.structured.unwrap()["source"], "tool_result");
    }

    #[tokio::test]
    async fn test_spawn_errors_retry_until_exhausted() {
        let backend = ScriptedBackend::new(vec![
            Attempt::StreamError(AgentError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "agent binary missing",
            ))),
            Attempt::StreamError(AgentError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "agent binary missing",
            ))),
            Attempt::StreamError(AgentError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "agent binary missing",
            ))),
        ]);
        let executor = fast_executor(backend.clone());

        assert!(executor.execute("do it", &[]).await.is_none());
        assert_eq!(backend.calls(), 3);
    }
}
