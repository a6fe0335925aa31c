//! Executor (§4.5): the top-level agent loop.
//!
//! Alternates LLM turns and sandboxed code-execution turns until a turn
//! carries a `FINAL`/`FINAL_VAR` terminator, generalizing the teacher's
//! `engine::run_exploration_loop` (same iterate-until-stop-condition shape,
//! same "nudge the model if a turn did nothing useful" recovery) to the
//! code-and-terminator contract instead of tool-calling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::backend::SharedBackend;
use crate::config::ExecutorOptions;
use crate::cost::CostTracker;
use crate::error::{Result, RlmError};
use crate::parser;
use crate::prompts::{seed_user_prompt, CORE_RLM_BEHAVIOR, NUDGE_PROMPT};
use crate::recursion::{RecursionHost, SubQueryRunner};
use crate::sandbox::SandboxSession;
use crate::streaming::StreamEvent;
use crate::trace::{TraceEntry, TraceLogger};
use crate::trace_data;
use crate::types::{CompletionOptions, Message, PricingTable, RLMResult, Terminator, TerminatorKind};

type EventSink = Option<mpsc::UnboundedSender<StreamEvent>>;

fn emit(sink: &EventSink, event: StreamEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}

pub(crate) fn termination_reason(err: &RlmError) -> &'static str {
    match err {
        RlmError::MaxIterations(_) => "max_iterations",
        RlmError::BudgetExceeded(_) => "budget_exceeded",
        RlmError::Llm(_) => "llm_error",
        RlmError::Cancelled(_) => "cancelled",
        _ => "error",
    }
}

/// Owns the LLM backend and pricing table; stateless otherwise - all
/// per-run state (cost, trace, sandbox, message history) lives in `execute`.
pub struct Executor {
    backend: SharedBackend,
    pricing: PricingTable,
}

impl Executor {
    pub fn new(backend: SharedBackend, pricing: PricingTable) -> Self {
        Self { backend, pricing }
    }

    /// Run one top-level query against `context` to completion.
    pub async fn execute(
        &self,
        query: &str,
        context: &str,
        options: ExecutorOptions,
    ) -> Result<RLMResult> {
        self.execute_with_events(query, context, options, None).await
    }

    /// Same as [`Self::execute`], but also emits [`StreamEvent`]s into
    /// `events` as the run progresses. Used by
    /// [`crate::streaming::StreamingExecutor`]; not part of the plain
    /// (non-streaming) public contract.
    pub(crate) async fn execute_with_events(
        &self,
        query: &str,
        context: &str,
        options: ExecutorOptions,
        events: EventSink,
    ) -> Result<RLMResult> {
        options.validate()?;
        let started = Instant::now();

        rlm_tracing::start_span_with_data(
            "rlm_run",
            trace_data::RunTraceData {
                model: options.model.clone(),
                context_len: context.len(),
                max_iterations: options.max_iterations,
                max_depth: options.max_depth,
            },
        );

        let cost = Arc::new(Mutex::new(CostTracker::new(
            self.pricing.clone(),
            options.max_cost,
            options.max_tokens,
        )));
        let trace = Arc::new(Mutex::new(TraceLogger::new(options.verbose)));
        let current_iteration = Arc::new(AtomicU32::new(0));

        let host = Arc::new(
            SubQueryRunner::new(
                self.backend.clone(),
                options.model.clone(),
                options.temperature,
                options.max_depth,
                cost.clone(),
                trace.clone(),
                current_iteration.clone(),
            )
            .with_events(events.clone()),
        );
        let host_dyn: Arc<dyn RecursionHost> = host.clone();

        let sandbox = SandboxSession::new(
            context.to_string(),
            host_dyn,
            Duration::from_millis(options.sandbox_timeout_ms),
        )
        .await?;

        let outcome = self
            .run_loop(
                query,
                context,
                &options,
                &sandbox,
                &cost,
                &trace,
                &current_iteration,
                &events,
            )
            .await;

        sandbox.dispose().await;

        // A budget trip inside a sub-query never surfaces through the
        // sandbox's own return value (§7); check the side channel first.
        let outcome = match host.take_fatal() {
            Some(fatal) => Err(fatal),
            None => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                trace.lock().unwrap().log(TraceEntry::Error {
                    iteration: current_iteration.load(Ordering::SeqCst),
                    depth: 0,
                    message: err.to_string(),
                });
                self.end_run_span(
                    &cost,
                    current_iteration.load(Ordering::SeqCst),
                    started,
                    termination_reason(&err),
                );
                return Err(err);
            }
        };

        let usage = cost.lock().unwrap().summary();
        let trace_entries = trace.lock().unwrap().get_entries().to_vec();

        self.end_run_span(
            &cost,
            current_iteration.load(Ordering::SeqCst),
            started,
            "final",
        );

        Ok(RLMResult {
            response,
            trace: trace_entries,
            usage,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn end_run_span(
        &self,
        cost: &Arc<Mutex<CostTracker>>,
        iterations_used: u32,
        started: Instant,
        termination_reason: &'static str,
    ) {
        let cost = cost.lock().unwrap();
        rlm_tracing::record_event(
            "rlm_completion",
            Some(trace_data::CompletionTraceData {
                termination_reason,
                iterations_used,
                total_tokens: cost.total_tokens(),
                estimated_cost_usd: cost.estimated_cost_usd(),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
        );
        rlm_tracing::end_span_ok();
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        query: &str,
        context: &str,
        options: &ExecutorOptions,
        sandbox: &SandboxSession,
        cost: &Arc<Mutex<CostTracker>>,
        trace: &Arc<Mutex<TraceLogger>>,
        current_iteration: &Arc<AtomicU32>,
        events: &EventSink,
    ) -> Result<String> {
        let seed = seed_user_prompt(query, context.len());
        let seed_message = match &options.image {
            Some(image) => {
                Message::user_with_image(seed, image.media_type.clone(), image.data.clone())
            }
            None => Message::user(seed),
        };
        let mut messages = vec![Message::system(CORE_RLM_BEHAVIOR), seed_message];

        let mut iteration: u32 = 0;
        loop {
            iteration += 1;
            current_iteration.store(iteration, Ordering::SeqCst);
            if iteration > options.max_iterations {
                return Err(RlmError::MaxIterations(options.max_iterations));
            }

            let completion_options = CompletionOptions {
                temperature: options.temperature,
                max_tokens: None,
                stop_sequences: Vec::new(),
                thinking: options.extended_thinking,
            };
            let llm_started = Instant::now();
            let completion = self.backend.complete(&messages, &completion_options).await?;
            let llm_latency_ms = llm_started.elapsed().as_millis() as u64;

            cost.lock()
                .unwrap()
                .record_usage(&options.model, &completion.usage, 0)?;

            let parsed_preview = parser::parse(&completion.content);
            rlm_tracing::start_span_with_data(
                "rlm_iteration",
                trace_data::IterationTraceData {
                    iteration,
                    message_count: messages.len(),
                    llm_latency_ms,
                    prompt_tokens: completion.usage.prompt_tokens,
                    completion_tokens: completion.usage.completion_tokens,
                    had_code: parsed_preview.has_code(),
                    had_terminator: parsed_preview.has_terminator(),
                },
            );
            rlm_tracing::end_span_ok();

            {
                let mut trace_guard = trace.lock().unwrap();
                trace_guard.log(TraceEntry::LlmCall {
                    iteration,
                    depth: 0,
                    model: options.model.clone(),
                    usage: completion.usage,
                });
                if let Some(thinking) = &completion.thinking {
                    trace_guard.log(TraceEntry::ExtendedThinking {
                        iteration,
                        depth: 0,
                        content: thinking.clone(),
                    });
                    emit(
                        events,
                        StreamEvent::Thinking {
                            iteration,
                            content: thinking.clone(),
                        },
                    );
                }
            }

            messages.push(Message::assistant(completion.content.clone()));
            let parsed = parsed_preview;

            if !parsed.has_code() && !parsed.has_terminator() {
                messages.push(Message::user(NUDGE_PROMPT));
                continue;
            }

            // Code-first: a terminator in the SAME turn must see bindings
            // this turn's own code just created (§4.5 step 3e).
            let mut feedback = None;
            if let Some(code) = &parsed.code {
                emit(
                    events,
                    StreamEvent::Code {
                        iteration,
                        code: code.clone(),
                    },
                );
                let exec_result = sandbox.execute(code).await;

                trace.lock().unwrap().log(TraceEntry::CodeExecution {
                    iteration,
                    depth: 0,
                    code: code.clone(),
                    output: exec_result.output.clone(),
                    error: exec_result.error.clone(),
                    execution_time_ms: exec_result.execution_time_ms,
                });
                emit(
                    events,
                    StreamEvent::CodeOutput {
                        iteration,
                        output: exec_result.output.clone(),
                        error: exec_result.error.clone(),
                    },
                );

                feedback = Some(match (&exec_result.output, &exec_result.error) {
                    (output, None) if output.is_empty() => {
                        "Code executed successfully with no output.".to_string()
                    }
                    (output, None) => format!("Output:\n{output}"),
                    (output, Some(err)) if output.is_empty() => format!("Error:\n{err}"),
                    (output, Some(err)) => format!("Output:\n{output}\n\nError:\n{err}"),
                });
            }

            if let Some(feedback) = feedback {
                messages.push(Message::user(feedback));
            }

            if let Some(terminator) = &parsed.terminator {
                let resolved = self.resolve_terminator(terminator, sandbox).await?;
                trace.lock().unwrap().log(TraceEntry::Final {
                    iteration,
                    depth: 0,
                    method: terminator.kind,
                    response: resolved.clone(),
                });
                emit(
                    events,
                    StreamEvent::Final {
                        method: terminator.kind,
                        response: resolved.clone(),
                    },
                );
                return Ok(resolved);
            }
        }
    }

    /// Resolve a terminator's raw captured text (shared by both `FINAL` and
    /// `FINAL_VAR`): if it looks like a bare identifier, try to read it back
    /// out of the sandbox first (§4.5 step 3e); otherwise, or if the name is
    /// unbound, fall back to the literal text (§9 Open Question).
    async fn resolve_terminator(
        &self,
        terminator: &Terminator,
        sandbox: &SandboxSession,
    ) -> Result<String> {
        if parser::BARE_IDENT_RE.is_match(&terminator.value) {
            if let Some(text) = sandbox.get_variable(&terminator.value).await? {
                return Ok(text);
            }
        }
        Ok(terminator.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::types::{CompletionResult, FinishReason, Usage};

    fn executor(responses: Vec<CompletionResult>) -> Executor {
        Executor::new(Arc::new(MockBackend::new(responses)), PricingTable::new())
    }

    fn result(content: &str) -> CompletionResult {
        CompletionResult {
            content: content.to_string(),
            thinking: None,
            usage: Usage::new(10, 10),
            finish_reason: FinishReason::Stop,
        }
    }

    #[tokio::test]
    async fn test_final_terminates_immediately() {
        let exec = executor(vec![result(r#"FINAL("the answer is 42")"#)]);
        let outcome = exec
            .execute("what is the answer?", "some context", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "the answer is 42");
        assert_eq!(outcome.usage.call_count, 1);
    }

    #[tokio::test]
    async fn test_code_then_final_var_sees_same_turn_binding() {
        let exec = executor(vec![result(
            "```js\nglobalThis.answer = 'found it';\n```\nFINAL_VAR(\"answer\")",
        )]);
        let outcome = exec
            .execute("find it", "ctx", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "found it");
    }

    #[tokio::test]
    async fn test_code_then_bare_final_resolves_sandbox_variable() {
        let exec = executor(vec![result(
            "```js\nglobalThis.result = 42;\n```\nFINAL(result)",
        )]);
        let outcome = exec
            .execute("what is the answer?", "ctx", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "42");
    }

    #[tokio::test]
    async fn test_final_unbound_bare_ident_falls_back_to_literal() {
        let exec = executor(vec![result(r#"FINAL(nonexistent)"#)]);
        let outcome = exec
            .execute("q", "ctx", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "nonexistent");
    }

    #[tokio::test]
    async fn test_final_var_unbound_falls_back_to_literal() {
        let exec = executor(vec![result(r#"FINAL_VAR(nonexistent)"#)]);
        let outcome = exec
            .execute("q", "ctx", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "nonexistent");
    }

    #[tokio::test]
    async fn test_no_code_no_terminator_gets_nudged_then_succeeds() {
        let exec = executor(vec![
            result("just thinking out loud, no action yet"),
            result(r#"FINAL("done")"#),
        ]);
        let outcome = exec
            .execute("q", "ctx", ExecutorOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(outcome.response, "done");
    }

    #[tokio::test]
    async fn test_max_iterations_zero_never_calls_backend() {
        let exec = executor(vec![]);
        let err = exec
            .execute("q", "ctx", ExecutorOptions::new("m").with_max_iterations(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::MaxIterations(0)));
    }

    #[tokio::test]
    async fn test_exhausting_iterations_without_terminator_errors() {
        let exec = executor(vec![
            result("```js\nprint('still looking');\n```"),
            result("```js\nprint('still looking');\n```"),
        ]);
        let err = exec
            .execute("q", "ctx", ExecutorOptions::new("m").with_max_iterations(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::MaxIterations(2)));
    }

    #[tokio::test]
    async fn test_budget_exceeded_propagates_from_top_level_call() {
        let exec = executor(vec![result(r#"FINAL("x")"#)]);
        let err = exec
            .execute("q", "ctx", ExecutorOptions::new("m").with_max_tokens(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn test_ambient_tracing_records_run_and_iteration_spans() {
        let exec = executor(vec![result(r#"FINAL("x")"#)]);
        let (outcome, run_trace) = rlm_tracing::with_tracing(async {
            exec.execute("q", "ctx", ExecutorOptions::new("m")).await
        })
        .await;

        assert!(outcome.is_ok());
        assert_eq!(run_trace.spans.len(), 1);
        let run_span = &run_trace.spans[0];
        assert_eq!(run_span.name, "rlm_run");
        assert!(run_span.children.iter().any(|s| s.name == "rlm_iteration"));
        assert!(run_span.events.iter().any(|e| e.name == "rlm_completion"));
    }
}
