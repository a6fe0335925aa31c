//! Error types for the RLM executor.

use thiserror::Error;

/// Result type alias for RLM operations.
pub type Result<T> = std::result::Result<T, RlmError>;

/// Errors that can occur while running the executor.
#[derive(Debug, Error)]
pub enum RlmError {
    /// Invalid configuration supplied at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A `sandbox.execute(code)` call exceeded its wall-clock timeout.
    ///
    /// This variant is surfaced to the model as execution feedback; it
    /// never terminates the agent loop on its own.
    #[error("sandbox execution timed out after {0:?}")]
    SandboxTimeout(std::time::Duration),

    /// Model code raised an exception or failed to evaluate.
    ///
    /// Like `SandboxTimeout`, this stays inside the loop as feedback text.
    #[error("sandbox execution error: {0}")]
    SandboxExecution(String),

    /// The LLM client returned a transport or provider error after retries
    /// were exhausted. Fatal to the current `execute`.
    #[error("LLM error: {0}")]
    Llm(String),

    /// The loop exhausted `maxIterations` without reaching a terminator.
    #[error("max iterations ({0}) exceeded without a final answer")]
    MaxIterations(u32),

    /// A cost or token ceiling was exceeded. Fatal; propagates from
    /// sub-queries at any depth.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetExceededError),

    /// Serialization/deserialization failure (pricing tables, trace entries).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An external cancellation signal fired mid-`execute`.
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// Anything else that does not fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Details about which budget was exceeded.
#[derive(Debug, Clone)]
pub struct BudgetExceededError {
    /// The kind of budget that tripped.
    pub budget_type: BudgetType,
    /// The configured ceiling.
    pub limit: f64,
    /// The value that tripped it.
    pub actual: f64,
}

impl std::fmt::Display for BudgetExceededError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} budget exceeded: {} > {}",
            self.budget_type, self.actual, self.limit
        )
    }
}

/// Types of budgets the cost tracker enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetType {
    /// Total tokens across all depths.
    Tokens,
    /// Estimated USD cost across all depths.
    Cost,
}

impl From<serde_json::Error> for RlmError {
    fn from(e: serde_json::Error) -> Self {
        RlmError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for RlmError {
    fn from(e: std::io::Error) -> Self {
        RlmError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RlmError::Llm("connection failed".to_string());
        assert_eq!(err.to_string(), "LLM error: connection failed");

        let budget_err = RlmError::BudgetExceeded(BudgetExceededError {
            budget_type: BudgetType::Tokens,
            limit: 100_000.0,
            actual: 150_000.0,
        });
        assert!(budget_err.to_string().contains("Tokens"));
        assert!(budget_err.to_string().contains("150000"));
    }

    #[test]
    fn test_budget_exceeded_display() {
        let err = BudgetExceededError {
            budget_type: BudgetType::Cost,
            limit: 1.0,
            actual: 1.5,
        };
        assert_eq!(err.to_string(), "Cost budget exceeded: 1.5 > 1");
    }
}
