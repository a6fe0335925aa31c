//! Streaming Executor (§4.7).
//!
//! Wraps [`crate::executor::Executor`] with a channel of typed progress
//! events instead of only a final [`crate::types::RLMResult`], for callers
//! that want to render a run live (a CLI spinner, a chat UI). The agent loop
//! itself is not duplicated: `Executor` accepts an optional event sink and
//! emits into it at the same points it already logs to the `TraceLogger`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ExecutorOptions;
use crate::executor::Executor;
use crate::types::{RLMResult, TerminatorKind, UsageSummary};

/// One step of a run's progress, emitted in the order it happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start { query: String, context_length: usize },
    Thinking { iteration: u32, content: String },
    Code { iteration: u32, code: String },
    CodeOutput { iteration: u32, output: String, error: Option<String> },
    SubQuery { prompt: String, sub_context_length: usize, depth: u32 },
    SubResponse { response: String, depth: u32 },
    Final { method: TerminatorKind, response: String },
    Error { message: String, code: Option<&'static str> },
    Done { usage: UsageSummary, execution_time_ms: u64 },
}

/// Runs an `Executor`'s loop on a background task and exposes its progress
/// as a stream of `StreamEvent`s, ending in exactly one `Final`/`Error`
/// followed by `Done`.
pub struct StreamingExecutor {
    executor: Arc<Executor>,
}

impl StreamingExecutor {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Start the run. The returned receiver yields events until the run
    /// finishes; drop it early to stop listening (the background task runs
    /// to completion regardless, matching the non-streaming `execute`'s
    /// all-or-nothing disposal guarantee).
    pub fn execute_streaming(
        &self,
        query: String,
        context: String,
        options: ExecutorOptions,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = self.executor.clone();

        let _ = tx.send(StreamEvent::Start {
            query: query.clone(),
            context_length: context.len(),
        });

        tokio::spawn(async move {
            let result = executor
                .execute_with_events(&query, &context, options, Some(tx.clone()))
                .await;

            match result {
                Ok(RLMResult {
                    usage,
                    execution_time_ms,
                    ..
                }) => {
                    // `Final` was already emitted by the loop itself with
                    // the resolved response.
                    let _ = tx.send(StreamEvent::Done {
                        usage,
                        execution_time_ms,
                    });
                }
                Err(e) => {
                    // a failed run ends in `Error`, never followed by `Done`.
                    let code = crate::executor::termination_reason(&e);
                    let _ = tx.send(StreamEvent::Error {
                        message: e.to_string(),
                        code: Some(code),
                    });
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::types::{CompletionResult, FinishReason, PricingTable, Usage};
    use std::sync::Arc as StdArc;

    fn executor(text: &str) -> StdArc<Executor> {
        StdArc::new(Executor::new(
            StdArc::new(MockBackend::new(vec![CompletionResult {
                content: text.to_string(),
                thinking: None,
                usage: Usage::new(5, 5),
                finish_reason: FinishReason::Stop,
            }])),
            PricingTable::new(),
        ))
    }

    #[tokio::test]
    async fn test_stream_ends_with_final_then_done() {
        let streaming = StreamingExecutor::new(executor(r#"FINAL("ok")"#));
        let mut rx = streaming.execute_streaming(
            "q".to_string(),
            "ctx".to_string(),
            ExecutorOptions::new("m"),
        );

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Final { response, .. } if response == "ok")));
    }

    #[tokio::test]
    async fn test_stream_reports_error_without_done() {
        let streaming = StreamingExecutor::new(executor("no code, no terminator"));
        let mut rx = streaming.execute_streaming(
            "q".to_string(),
            "ctx".to_string(),
            ExecutorOptions::new("m").with_max_iterations(1),
        );

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        // a failed run ends in `Error`, with no trailing `Done`.
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Error { .. })));
    }
}
