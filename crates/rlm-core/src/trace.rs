//! Trace Logger (§4.4).
//!
//! Reshapes the teacher's per-kind trace-data structs
//! (`RlmCycleTraceData`/`RlmIterationTraceData`/`RlmCompletionTraceData` in
//! `engine/trace.rs`) into a single flat `TraceEntry` enum that satisfies
//! invariants I1-I3: entries are appended in the order events occur, each
//! carries its own `depth`/`iteration` so a consumer can reconstruct the
//! full narrative by linear scan with no cross-references.

use serde::{Deserialize, Serialize};

use crate::types::{TerminatorKind, Usage};

/// One structured event recorded during a top-level `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// A top-level LLM turn.
    LlmCall {
        iteration: u32,
        depth: u32,
        model: String,
        usage: Usage,
    },
    /// Extended-thinking content returned alongside an `LlmCall`.
    ExtendedThinking {
        iteration: u32,
        depth: u32,
        content: String,
    },
    /// A `sandbox.execute(code)` call.
    CodeExecution {
        iteration: u32,
        depth: u32,
        code: String,
        output: String,
        error: Option<String>,
        execution_time_ms: u64,
    },
    /// A recursive sub-query issued from inside sandboxed code.
    SubLlmCall {
        iteration: u32,
        depth: u32,
        prompt: String,
        sub_context_len: usize,
        usage: Usage,
    },
    /// The terminal `FINAL`/`FINAL_VAR` resolution.
    Final {
        iteration: u32,
        depth: u32,
        method: TerminatorKind,
        response: String,
    },
    /// A fatal error that ended the run.
    Error {
        iteration: u32,
        depth: u32,
        message: String,
    },
}

impl TraceEntry {
    pub fn depth(&self) -> u32 {
        match self {
            TraceEntry::LlmCall { depth, .. }
            | TraceEntry::ExtendedThinking { depth, .. }
            | TraceEntry::CodeExecution { depth, .. }
            | TraceEntry::SubLlmCall { depth, .. }
            | TraceEntry::Final { depth, .. }
            | TraceEntry::Error { depth, .. } => *depth,
        }
    }

    pub fn iteration(&self) -> u32 {
        match self {
            TraceEntry::LlmCall { iteration, .. }
            | TraceEntry::ExtendedThinking { iteration, .. }
            | TraceEntry::CodeExecution { iteration, .. }
            | TraceEntry::SubLlmCall { iteration, .. }
            | TraceEntry::Final { iteration, .. }
            | TraceEntry::Error { iteration, .. } => *iteration,
        }
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            TraceEntry::LlmCall { usage, .. } | TraceEntry::SubLlmCall { usage, .. } => {
                Some(usage)
            }
            _ => None,
        }
    }

    fn is_call(&self) -> bool {
        matches!(self, TraceEntry::LlmCall { .. } | TraceEntry::SubLlmCall { .. })
    }
}

/// Append-only ordered log of `TraceEntry`s for one top-level `execute`.
///
/// Verbose mode additionally mirrors each event to `tracing` at debug level,
/// so a caller running with `RUST_LOG=debug` sees the narrative live instead
/// of only after the run finishes.
#[derive(Debug, Default)]
pub struct TraceLogger {
    entries: Vec<TraceEntry>,
    verbose: bool,
}

impl TraceLogger {
    pub fn new(verbose: bool) -> Self {
        Self {
            entries: Vec::new(),
            verbose,
        }
    }

    pub fn log(&mut self, entry: TraceEntry) {
        if self.verbose {
            tracing::debug!(?entry, "rlm trace event");
        }
        self.entries.push(entry);
    }

    pub fn get_entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Sum of token usage across every `LlmCall`/`SubLlmCall` entry, at any depth.
    pub fn get_total_usage(&self) -> Usage {
        let mut total = Usage::default();
        for entry in &self.entries {
            if let Some(usage) = entry.usage() {
                total.add(usage);
            }
        }
        total
    }

    /// Number of LLM calls recorded (top-level plus sub-queries, any depth).
    pub fn get_call_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_call()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
