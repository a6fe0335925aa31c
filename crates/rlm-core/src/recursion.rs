//! Recursive sub-queries (§4.6).
//!
//! Simplifies the teacher's `subquery::SubQuery`/`SubQueryExecutor`
//! isolation pattern (fresh message list, no inherited history, shared
//! budget) down to the spec's one-shot, non-agentic sub-call contract:
//! sub-queries never themselves run sandboxed code, so a single
//! `RecursionHost` instance is enough to model every recursive hop a given
//! sandbox session can reach (depth 0 -> depth 1).
//!
//! Budget-exceeded errors must propagate out of the *top-level* `execute`
//! (§7 "Budget-exceeded... propagates from sub-queries too") but nothing
//! inside sandboxed code may ever see a thrown exception from `llm_query`
//! itself (§7 "everything the sandbox surfaces stays inside the sandbox").
//! The two requirements are reconciled with a side channel: a budget trip
//! is recorded into `fatal` and also reported to the sandbox as a plain
//! string, and the Executor checks `take_fatal()` immediately after every
//! `sandbox.execute` call, before looking at the execution's own output.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;

use crate::backend::SharedBackend;
use crate::cost::CostTracker;
use crate::error::RlmError;
use crate::prompts::SUBQUERY_SYSTEM_PROMPT;
use crate::streaming::StreamEvent;
use crate::trace::{TraceEntry, TraceLogger};
use crate::types::{CompletionOptions, Message};

const SUB_QUERY_DEPTH: u32 = 1;

/// The sentinel string returned to sandboxed code when a recursive call
/// would exceed `maxDepth` (§4.6 step 1).
pub fn depth_exceeded_sentinel(max_depth: u32) -> String {
    format!("[Error: Maximum recursion depth ({max_depth}) exceeded]")
}

/// The host interface sandboxed code's `llm_query`/`llm_query_parallel`
/// calls are bound to. Implementations must never propagate an error back
/// across the sandbox boundary (§7); budget trips are instead recorded for
/// the Executor to observe via a side channel owned by the implementation.
#[async_trait]
pub trait RecursionHost: Send + Sync {
    async fn llm_query(&self, prompt: String, sub_context: String) -> String;
    async fn llm_query_parallel(&self, queries: Vec<(String, String)>) -> Vec<String>;
}

/// Default `RecursionHost`: performs one-shot sub-queries against a shared
/// backend, recording usage against the shared `CostTracker` and logging
/// against the shared `TraceLogger` (§4.6 step 3).
pub struct SubQueryRunner {
    backend: SharedBackend,
    model: String,
    temperature: f32,
    max_depth: u32,
    cost: Arc<Mutex<CostTracker>>,
    trace: Arc<Mutex<TraceLogger>>,
    current_iteration: Arc<AtomicU32>,
    fatal: Arc<Mutex<Option<RlmError>>>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl SubQueryRunner {
    pub fn new(
        backend: SharedBackend,
        model: impl Into<String>,
        temperature: f32,
        max_depth: u32,
        cost: Arc<Mutex<CostTracker>>,
        trace: Arc<Mutex<TraceLogger>>,
        current_iteration: Arc<AtomicU32>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature,
            max_depth,
            cost,
            trace,
            current_iteration,
            fatal: Arc::new(Mutex::new(None)),
            events: None,
        }
    }

    /// Attach a stream event sink (used only by [`crate::streaming::StreamingExecutor`]).
    pub fn with_events(mut self, events: Option<mpsc::UnboundedSender<StreamEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Take (and clear) any fatal error a sub-query recorded. The Executor
    /// must call this immediately after `sandbox.execute` returns, before
    /// treating the execution's own output as authoritative.
    pub fn take_fatal(&self) -> Option<RlmError> {
        self.fatal.lock().unwrap().take()
    }

    async fn run_one(&self, prompt: String, sub_context: String) -> String {
        const TOP_LEVEL_DEPTH: u32 = 0;
        if TOP_LEVEL_DEPTH + 1 > self.max_depth {
            return depth_exceeded_sentinel(self.max_depth);
        }

        if let Some(tx) = &self.events {
            let _ = tx.send(StreamEvent::SubQuery {
                prompt: prompt.clone(),
                sub_context_length: sub_context.len(),
                depth: SUB_QUERY_DEPTH,
            });
        }

        let messages = vec![
            Message::system(SUBQUERY_SYSTEM_PROMPT),
            Message::user(format!("{sub_context}\n\n{prompt}")),
        ];
        let options = CompletionOptions {
            temperature: self.temperature,
            ..Default::default()
        };

        let response = match self.backend.complete(&messages, &options).await {
            Ok(result) => {
                let record = {
                    let mut cost = self.cost.lock().unwrap();
                    cost.record_usage(&self.model, &result.usage, 1)
                };
                if let Err(budget_err) = record {
                    let mut fatal = self.fatal.lock().unwrap();
                    if fatal.is_none() {
                        *fatal = Some(budget_err);
                    }
                    // still report something usable to the sandbox; the
                    // Executor will discard this run once it observes the
                    // fatal side channel.
                    result.content
                } else {
                    let mut trace = self.trace.lock().unwrap();
                    trace.log(TraceEntry::SubLlmCall {
                        iteration: self.current_iteration.load(Ordering::SeqCst),
                        depth: SUB_QUERY_DEPTH,
                        prompt: prompt.clone(),
                        sub_context_len: sub_context.len(),
                        usage: result.usage,
                    });
                    result.content
                }
            }
            Err(e) => {
                let mut trace = self.trace.lock().unwrap();
                trace.log(TraceEntry::Error {
                    iteration: self.current_iteration.load(Ordering::SeqCst),
                    depth: SUB_QUERY_DEPTH,
                    message: e.to_string(),
                });
                format!("[Error: {e}]")
            }
        };

        if let Some(tx) = &self.events {
            let _ = tx.send(StreamEvent::SubResponse {
                response: response.clone(),
                depth: SUB_QUERY_DEPTH,
            });
        }

        response
    }
}

#[async_trait]
impl RecursionHost for SubQueryRunner {
    async fn llm_query(&self, prompt: String, sub_context: String) -> String {
        self.run_one(prompt, sub_context).await
    }

    async fn llm_query_parallel(&self, queries: Vec<(String, String)>) -> Vec<String> {
        join_all(
            queries
                .into_iter()
                .map(|(prompt, sub_context)| self.run_one(prompt, sub_context)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompletionResult, FinishReason, Usage};

    fn runner(backend: SharedBackend, max_depth: u32) -> SubQueryRunner {
        SubQueryRunner::new(
            backend,
            "test-model",
            0.0,
            max_depth,
            Arc::new(Mutex::new(CostTracker::default())),
            Arc::new(Mutex::new(TraceLogger::new(false))),
            Arc::new(AtomicU32::new(1)),
        )
    }

    #[tokio::test]
    async fn test_depth_exceeded_returns_sentinel_without_call() {
        let backend: SharedBackend = Arc::new(crate::backend::MockBackend::new(vec![]));
        let runner = runner(backend, 0);
        let result = runner.llm_query("q".to_string(), "ctx".to_string()).await;
        assert_eq!(result, depth_exceeded_sentinel(0));
    }

    #[tokio::test]
    async fn test_successful_sub_query_logs_trace_and_usage() {
        let backend: SharedBackend = Arc::new(crate::backend::MockBackend::with_text("answer"));
        let runner = runner(backend, 1);
        let result = runner.llm_query("q".to_string(), "ctx".to_string()).await;
        assert_eq!(result, "answer");
        assert_eq!(runner.trace.lock().unwrap().get_call_count(), 1);
        assert!(runner.cost.lock().unwrap().call_count() == 1);
        assert!(runner.take_fatal().is_none());
    }

    #[tokio::test]
    async fn test_parallel_preserves_order() {
        let backend: SharedBackend = Arc::new(crate::backend::MockBackend::new(vec![
            CompletionResult {
                content: "one".to_string(),
                thinking: None,
                usage: Usage::new(1, 1),
                finish_reason: FinishReason::Stop,
            },
            CompletionResult {
                content: "two".to_string(),
                thinking: None,
                usage: Usage::new(1, 1),
                finish_reason: FinishReason::Stop,
            },
        ]));
        let runner = runner(backend, 1);
        let results = runner
            .llm_query_parallel(vec![
                ("a".to_string(), "ctx".to_string()),
                ("b".to_string(), "ctx".to_string()),
            ])
            .await;
        // MockBackend hands out responses strictly in call order, and our
        // join_all preserves input order in the output vector regardless.
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_exceeded_is_recorded_not_thrown() {
        let backend: SharedBackend = Arc::new(crate::backend::MockBackend::with_text("x"));
        let cost = Arc::new(Mutex::new(CostTracker::new(
            Default::default(),
            None,
            Some(1),
        )));
        let runner = SubQueryRunner::new(
            backend,
            "test-model",
            0.0,
            1,
            cost,
            Arc::new(Mutex::new(TraceLogger::new(false))),
            Arc::new(AtomicU32::new(1)),
        );
        let result = runner.llm_query("q".to_string(), "ctx".to_string()).await;
        // sandboxed code still sees a plain string, never a thrown error
        assert_eq!(result, "x");
        assert!(matches!(runner.take_fatal(), Some(RlmError::BudgetExceeded(_))));
    }
}
