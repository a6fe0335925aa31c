//! System prompts for the RLM executor (§4.5, §4.6).
//!
//! Keeps the teacher's "strategy/guidelines/termination" prompt structure
//! (`CORE_RLM_BEHAVIOR`) but rewrites the content in-voice to describe the
//! sandbox contract instead of tool-calling: the system prompt and the
//! sandbox implementation must evolve in lockstep (§9).

/// The top-level agent loop's system prompt: documents the sandbox surface
/// and the `FINAL`/`FINAL_VAR` termination protocol.
pub const CORE_RLM_BEHAVIOR: &str = r#"You are a context exploration assistant. A large block of text ("the context") has been loaded into a sandboxed JavaScript environment as the variable `context`. You cannot see the context directly - it is too large for your input window. Instead, you write JavaScript code that runs inside the sandbox to explore it.

## Strategy

1. **Understand** - work out what the query needs from the context
2. **Explore** - write JavaScript to search, slice, and summarize `context`
3. **Recurse when useful** - for parts of the context too large to reason about directly, call `llm_query(prompt, subContext)` to get an LLM's answer about just that slice
4. **Synthesize** - combine what you learn into a final answer

## The sandbox

Your code runs in a persistent session: variables you bind in one turn are still there in the next turn. The sandbox exposes:

- `context` - the full context string (read-only)
- `print(...)` / `console.log(...)` / `console.error(...)` / `console.warn(...)` - write to this turn's captured output
- `await llm_query(prompt, subContext)` - ask an LLM a question about `subContext` (defaults to `context`); returns a string
- `await llm_query_parallel([{prompt, subContext}, ...])` - run several sub-queries concurrently; returns an array of strings in the same order
- `chunk(text, size)` - split text into chunks near `size` characters, preferring paragraph/sentence/word boundaries
- `grep(text, pattern)` - return the lines of `text` matching `pattern` (a substring or a regex)
- `len`, `slice`, `split`, `join`, `str` (a safe, JSON-like stringifier), a 5-second-capped `setTimeout`
- Standard built-ins: `Array`, `Object`, `String`, `Number`, `Math`, `JSON`, `RegExp`, `Map`, `Set`, `Promise`

Write your code in a fenced code block. Top-level `await` is allowed.

## Ending the task

When you have your answer, end your reply with exactly one of:

- `FINAL("your answer here")` - the literal answer text
- `FINAL_VAR("variableName")` - stringify and return the sandbox variable `variableName`

If a turn's code defines the answer as a variable, prefer `FINAL_VAR` over re-typing the value - the code in the SAME turn runs before the terminator is resolved, so it can see what you just computed.

Do not call `FINAL`/`FINAL_VAR` until you have actually explored enough of the context to answer confidently. If you have neither written code nor reached a conclusion, write code to explore further."#;

/// System prompt used for one-shot, non-agentic recursive sub-queries (§4.6 step 2).
/// Deliberately minimal: sub-queries are pure functions of `(prompt, subContext, model)`
/// and must not inherit the parent's agentic system prompt or history (§9).
pub const SUBQUERY_SYSTEM_PROMPT: &str = "Answer the question based on the provided context. Be concise and direct.";

/// Build the seed user prompt for a top-level run: states the context length
/// (never its content - the raw context lives only inside the sandbox) and
/// the task.
pub fn seed_user_prompt(query: &str, context_len: usize) -> String {
    format!(
        "A context of {context_len} characters has been loaded into the sandbox as `context`. \
         Use the sandbox to explore it and answer the following query:\n\n{query}"
    )
}

/// The nudge appended when a model turn contained neither code nor a terminator (§4.5 step 3f).
pub const NUDGE_PROMPT: &str =
    "Please write code to explore the context or provide your final answer using FINAL(\"answer\").";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_rlm_behavior_documents_sandbox_contract() {
        assert!(CORE_RLM_BEHAVIOR.contains("llm_query"));
        assert!(CORE_RLM_BEHAVIOR.contains("llm_query_parallel"));
        assert!(CORE_RLM_BEHAVIOR.contains("FINAL("));
        assert!(CORE_RLM_BEHAVIOR.contains("FINAL_VAR("));
        assert!(CORE_RLM_BEHAVIOR.contains("chunk("));
        assert!(CORE_RLM_BEHAVIOR.contains("grep("));
    }

    #[test]
    fn test_seed_user_prompt_states_length_not_content() {
        let prompt = seed_user_prompt("find the secret", 12345);
        assert!(prompt.contains("12345"));
        assert!(prompt.contains("find the secret"));
    }

    #[test]
    fn test_seed_user_prompt_zero_length() {
        let prompt = seed_user_prompt("anything?", 0);
        assert!(prompt.contains("0 characters"));
    }
}
