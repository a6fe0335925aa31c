//! LLM client abstraction (§6 "LLM client capability").
//!
//! The core is indifferent to provider: any client honoring `LLMBackend` is
//! acceptable. Ported near-verbatim from the teacher's `backend.rs`
//! (`with_retry`, `LoggingBackend`, `MockBackend`, `SharedBackend`); the
//! tool-format default methods (`supports_native_tools`,
//! `format_tool_definitions`, etc.) and the `complete_stream`/`StreamEvent`
//! token-streaming surface are dropped since tool-calling is a Non-goal and
//! provider-level token streaming is not part of this core's contract (the
//! Streaming Executor in `streaming.rs` streams the agent loop's own
//! transitions, not provider tokens).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, RlmError};
use crate::types::{CompletionOptions, CompletionResult, FinishReason, Message, Usage};

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on the *LLM-error* (network/transport) kind; this does not
/// contradict "LLM errors at the top level propagate" (§10.5) - retries
/// happen inside the client before the core ever sees a terminal error.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        backend = backend_name,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

/// Only transport/provider errors are retryable; configuration and
/// serialization errors should not be.
pub fn is_retryable(error: &RlmError) -> bool {
    matches!(error, RlmError::Llm(_))
}

/// Trait for LLM backend providers.
///
/// A single-shot completion: `complete(messages, options) -> CompletionResult`.
/// Implementations wrap Anthropic, OpenAI, a local model, etc.
#[async_trait]
pub trait LLMBackend: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResult>;

    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Check if the backend is available and properly configured.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LLMBackend>;

/// A mock backend for testing purposes.
///
/// Returns pre-configured responses in order, useful for deterministic
/// testing of the agent loop. Matches the teacher's `MockBackend` shape.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    responses: std::sync::Mutex<Vec<CompletionResult>>,
    request_log: std::sync::Mutex<Vec<Vec<Message>>>,
}

impl MockBackend {
    /// Create a new mock backend with the given responses, returned in order.
    /// If more requests are made than responses available, an error is returned.
    pub fn new(responses: Vec<CompletionResult>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: std::sync::Mutex::new(responses),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![CompletionResult {
            content: text.into(),
            thinking: None,
            usage: Usage::new(10, 20),
            finish_reason: FinishReason::Stop,
        }])
    }

    /// Get all message histories sent to this backend, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMBackend for MockBackend {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResult> {
        self.request_log.lock().unwrap().push(messages.to_vec());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(RlmError::Llm(
                "MockBackend: no more responses available".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A backend that wraps another backend with request/response logging (§10.5).
pub struct LoggingBackend<B: LLMBackend> {
    inner: B,
    name: String,
}

impl<B: LLMBackend> LoggingBackend<B> {
    pub fn new(inner: B) -> Self {
        let name = format!("logging({})", inner.name());
        Self { inner, name }
    }
}

#[async_trait]
impl<B: LLMBackend> LLMBackend for LoggingBackend<B> {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResult> {
        tracing::debug!(
            backend = self.inner.name(),
            messages = messages.len(),
            temperature = options.temperature,
            "Sending completion request"
        );

        let start = std::time::Instant::now();
        let result = self.inner.complete(messages, options).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::debug!(
                    backend = self.inner.name(),
                    finish_reason = ?response.finish_reason,
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    duration_ms = elapsed.as_millis() as u64,
                    "Completion successful"
                );
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.inner.name(),
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Completion failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_mock_backend_single_response() {
        let backend = MockBackend::with_text("Hello!");
        let response = backend
            .complete(&[Message::user("Hi")], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(response.content, "Hello!");
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_multiple_responses() {
        let backend = MockBackend::new(vec![
            CompletionResult {
                content: "First".to_string(),
                thinking: None,
                usage: Usage::new(10, 10),
                finish_reason: FinishReason::Stop,
            },
            CompletionResult {
                content: "Second".to_string(),
                thinking: None,
                usage: Usage::new(10, 10),
                finish_reason: FinishReason::Stop,
            },
        ]);

        let r1 = backend
            .complete(&[Message::user("1")], &CompletionOptions::default())
            .await
            .unwrap();
        let r2 = backend
            .complete(&[Message::user("2")], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(r1.content, "First");
        assert_eq!(r2.content, "Second");
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_exhausted() {
        let backend = MockBackend::new(vec![]);
        let result = backend
            .complete(&[Message::user("Hi")], &CompletionOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_logging_backend_passes_through() {
        let inner = MockBackend::with_text("Logged!");
        let backend = LoggingBackend::new(inner);
        assert_eq!(backend.name(), "logging(mock)");

        let response = backend
            .complete(&[Message::user("Hi")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "Logged!");
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_failure() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(1), "test", || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RlmError::Llm("transient".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_configuration_errors() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, Duration::from_millis(1), "test", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(RlmError::Configuration("bad".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
