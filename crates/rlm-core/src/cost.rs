//! Cost tracking and budget enforcement (§4.3).
//!
//! Generalizes the teacher's `engine::budget::BudgetTracker` with a pricing
//! table lookup: usage is recorded against a shared accumulator keyed by
//! nothing but the running total (the accumulator does not partition by
//! model), and each record checks the optional `maxCost`/`maxTokens`
//! ceilings configured for the run.

use crate::error::{BudgetExceededError, BudgetType, Result, RlmError};
use crate::types::{ModelPricing, PricingTable, Usage, UsageSummary};

/// Monotone accumulator of token usage and derived USD cost.
///
/// Reset at the start of every top-level `execute` (§3 invariant on
/// `UsageAccumulator`'s lifetime).
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    pricing: PricingTable,
    max_cost: Option<f64>,
    max_tokens: Option<u64>,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
    total_tokens: u64,
    estimated_cost_usd: f64,
    call_count: u32,
}

impl CostTracker {
    pub fn new(pricing: PricingTable, max_cost: Option<f64>, max_tokens: Option<u64>) -> Self {
        Self {
            pricing,
            max_cost,
            max_tokens,
            ..Default::default()
        }
    }

    /// Compute the USD cost of one turn's usage for `model`. Unknown models cost 0.
    pub fn cost_for(&self, model: &str, usage: &Usage) -> f64 {
        match self.pricing.get(model) {
            Some(ModelPricing {
                input_per_1m,
                output_per_1m,
            }) => {
                usage.prompt_tokens as f64 / 1_000_000.0 * input_per_1m
                    + usage.completion_tokens as f64 / 1_000_000.0 * output_per_1m
            }
            None => 0.0,
        }
    }

    /// Accumulate usage from a completed LLM call (top-level or sub-query,
    /// any depth) and enforce the configured ceilings.
    pub fn record_usage(&mut self, model: &str, usage: &Usage, _depth: u32) -> Result<()> {
        let cost = self.cost_for(model, usage);
        self.total_prompt_tokens += usage.prompt_tokens as u64;
        self.total_completion_tokens += usage.completion_tokens as u64;
        self.total_tokens += usage.total_tokens as u64;
        self.estimated_cost_usd += cost;
        self.call_count += 1;

        if let Some(max_tokens) = self.max_tokens {
            if self.total_tokens > max_tokens {
                return Err(RlmError::BudgetExceeded(BudgetExceededError {
                    budget_type: BudgetType::Tokens,
                    limit: max_tokens as f64,
                    actual: self.total_tokens as f64,
                }));
            }
        }

        if let Some(max_cost) = self.max_cost {
            if self.estimated_cost_usd > max_cost {
                return Err(RlmError::BudgetExceeded(BudgetExceededError {
                    budget_type: BudgetType::Cost,
                    limit: max_cost,
                    actual: self.estimated_cost_usd,
                }));
            }
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        self.total_prompt_tokens = 0;
        self.total_completion_tokens = 0;
        self.total_tokens = 0;
        self.estimated_cost_usd = 0.0;
        self.call_count = 0;
    }

    pub fn call_count(&self) -> u32 {
        self.call_count
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.estimated_cost_usd
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            total_prompt_tokens: self.total_prompt_tokens,
            total_completion_tokens: self.total_completion_tokens,
            total_tokens: self.total_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
            call_count: self.call_count,
        }
    }
}
