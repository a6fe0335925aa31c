//! Serializable payloads attached to the ambient `rlm-tracing` spans the
//! Executor emits (distinct from the spec-mandated `trace::TraceLogger`,
//! which is a flat in-memory log the *caller* consumes; this module feeds
//! the cross-cutting `Span`/`Trace` observability layer a host process can
//! persist to JSONL via `rlm_tracing::TraceWriter`). Shaped after the
//! teacher's `engine::trace::{RlmCycleTraceData, RlmIterationTraceData,
//! RlmCompletionTraceData}`.

use serde::Serialize;

/// Recorded once at the start of a top-level `execute`.
#[derive(Debug, Clone, Serialize)]
pub struct RunTraceData {
    pub model: String,
    pub context_len: usize,
    pub max_iterations: u32,
    pub max_depth: u32,
}

/// Recorded once per top-level iteration, after the LLM call returns.
#[derive(Debug, Clone, Serialize)]
pub struct IterationTraceData {
    pub iteration: u32,
    pub message_count: usize,
    pub llm_latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub had_code: bool,
    pub had_terminator: bool,
}

/// Recorded once at the end of a top-level `execute`, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionTraceData {
    pub termination_reason: &'static str,
    pub iterations_used: u32,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub duration_ms: u64,
}
