//! Cross-crate integration tests for the RLM executor. No public API -
//! scenarios live under `tests/`.
