//! rlm-core: the Recursive Language Model execution core.
//!
//! Drives a `FINAL`/`FINAL_VAR`-terminated agent loop over a persistent,
//! sandboxed JavaScript environment instead of structured tool-calling:
//! - Output parsing of free-form model turns into code/thinking/terminator
//! - A persistent `rquickjs` sandbox exposing `context`, `print`/`console`,
//!   `llm_query`/`llm_query_parallel`, and a handful of text helpers
//! - Recursive, depth-bounded sub-queries issued from sandboxed code
//! - Token/cost budget enforcement and a structured, append-only trace
//! - A streaming variant of the loop for live progress reporting
//!
//! The LLM client itself is out of scope: any implementer of
//! [`backend::LLMBackend`] can drive the loop.

pub mod backend;
pub mod config;
pub mod cost;
pub mod error;
pub mod executor;
pub mod parser;
pub mod prompts;
pub mod recursion;
pub mod sandbox;
pub mod streaming;
pub mod trace;
pub mod trace_data;
pub mod types;

pub mod testing;

pub use backend::{LLMBackend, LoggingBackend, MockBackend, SharedBackend};
pub use config::{ExecutorOptions, ImagePayload};
pub use cost::CostTracker;
pub use error::{BudgetExceededError, BudgetType, Result, RlmError};
pub use executor::Executor;
pub use parser::parse;
pub use prompts::CORE_RLM_BEHAVIOR;
pub use recursion::{RecursionHost, SubQueryRunner};
pub use sandbox::SandboxSession;
pub use streaming::{StreamEvent, StreamingExecutor};
pub use trace::{TraceEntry, TraceLogger};
pub use types::{
    CompletionOptions, CompletionResult, ContentPart, ExecutionResult, ExtendedThinkingConfig,
    FinishReason, Message, MessageContent, ModelPricing, ParsedOutput, PricingTable, RLMResult,
    Role, Terminator, TerminatorKind, Usage, UsageSummary,
};
