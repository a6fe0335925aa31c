//! Configuration (§6, §10.3).
//!
//! `ExecutorOptions` generalizes the teacher's `EngineConfig` (builder
//! methods returning `Self`, a `Default` impl) with a fallible `validate()`
//! step that raises the *Configuration* error kind synchronously at
//! construction time, matching §7.

use crate::error::{Result, RlmError};
use crate::types::ExtendedThinkingConfig;

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const DEFAULT_MAX_DEPTH: u32 = 1;
pub const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 10_000;
pub const MIN_SANDBOX_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// An inline image attached to the top-level query, forwarded to the LLM
/// client's first turn only.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

/// Construction-time options for one top-level `execute` (§6 configuration table).
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub model: String,
    pub max_iterations: u32,
    pub max_depth: u32,
    pub sandbox_timeout_ms: u64,
    pub temperature: f32,
    pub max_cost: Option<f64>,
    pub max_tokens: Option<u64>,
    pub verbose: bool,
    pub extended_thinking: Option<ExtendedThinkingConfig>,
    pub image: Option<ImagePayload>,
}

impl ExecutorOptions {
    /// Start a builder for the required `model`; everything else defaults
    /// per the §6 configuration table.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_depth: DEFAULT_MAX_DEPTH,
            sandbox_timeout_ms: DEFAULT_SANDBOX_TIMEOUT_MS,
            temperature: DEFAULT_TEMPERATURE,
            max_cost: None,
            max_tokens: None,
            verbose: false,
            extended_thinking: None,
            image: None,
        }
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_depth(mut self, n: u32) -> Self {
        self.max_depth = n;
        self
    }

    pub fn with_sandbox_timeout_ms(mut self, ms: u64) -> Self {
        self.sandbox_timeout_ms = ms;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.max_cost = Some(usd);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_extended_thinking(mut self, cfg: ExtendedThinkingConfig) -> Self {
        self.extended_thinking = Some(cfg);
        self
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    /// Validate at construction time. Note `max_iterations == 0` is
    /// deliberately NOT rejected here (§9 Open Question: the loop's
    /// iteration counter increments before the LLM call, so `0` raises
    /// `MaxIterations` without ever calling the backend — that is the
    /// intended behavior, not a configuration error).
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RlmError::Configuration("model must not be empty".into()));
        }
        if self.sandbox_timeout_ms < MIN_SANDBOX_TIMEOUT_MS {
            return Err(RlmError::Configuration(format!(
                "sandboxTimeout must be >= {}ms, got {}ms",
                MIN_SANDBOX_TIMEOUT_MS, self.sandbox_timeout_ms
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RlmError::Configuration(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if let Some(max_cost) = self.max_cost {
            if max_cost < 0.0 {
                return Err(RlmError::Configuration(
                    "maxCost must be non-negative".into(),
                ));
            }
        }
        Ok(())
    }
}
