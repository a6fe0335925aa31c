//! Output Parser (§4.1).
//!
//! Extracts `thinking`/`code`/`terminator` from one free-form model turn.
//! Infallible: unrecognized input simply yields a `ParsedOutput` with all
//! fields unset. The `FINAL(...)` branches of the terminator regex carry
//! over the behavior of the teacher's `engine::mod::extract_final_pattern`
//! (`r#"(?m)^FINAL\(["']?([\s\S]+?)["']?\)$"#`, whose optional quotes match
//! bare identifiers too); the code-fence extraction and `FINAL_VAR` handling
//! are new, built to the contract in SPEC_FULL.md §4.1.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ParsedOutput, Terminator, TerminatorKind};

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:javascript|js)?\r?\n?(.*?)```").expect("valid code fence regex")
});

/// Matches, in order of first occurrence, any of:
///   FINAL_VAR("...") / FINAL_VAR('...') / FINAL_VAR(bareIdent)
///   FINAL(bareIdent) / FINAL("...") / FINAL('...')
/// `FINAL_VAR` is tried first in the alternation so `FINAL_VAR(...)` is never
/// mis-captured as a bare `FINAL(...)` prefix match. `FINAL` also gets a
/// bare-identifier branch, mirroring the teacher's `extract_final_pattern`
/// (`r#"(?m)^FINAL\(["']?([\s\S]+?)["']?\)$"#`), whose optional quotes let it
/// match unquoted content too.
static TERMINATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)FINAL_VAR\(\s*"([^"]*)"\s*\)|FINAL_VAR\(\s*'([^']*)'\s*\)|FINAL_VAR\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)|FINAL\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)|FINAL\(\s*"([^"]*)"\s*\)|FINAL\(\s*'([^']*)'\s*\)"#,
    )
    .expect("valid terminator regex")
});

/// Bare-identifier shape used by the Executor to decide whether a `FINAL(...)`
/// value should be resolved as a sandbox variable (§4.5 step 3e, §9 Open
/// Question).
pub static BARE_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid ident regex"));

/// Parse one model turn's raw text into thinking/code/terminator.
pub fn parse(text: &str) -> ParsedOutput {
    let code = extract_code(text);
    let terminator = extract_terminator(text);
    let thinking = extract_thinking(text);

    ParsedOutput {
        thinking,
        code,
        terminator,
    }
}

fn extract_code(text: &str) -> Option<String> {
    let bodies: Vec<&str> = CODE_FENCE_RE
        .captures_iter(text)
        .map(|c| c.get(1).map(|m| m.as_str()).unwrap_or(""))
        .collect();
    if bodies.is_empty() {
        None
    } else {
        Some(bodies.join("\n"))
    }
}

fn extract_terminator(text: &str) -> Option<Terminator> {
    let caps = TERMINATOR_RE.captures(text)?;
    // Groups 1-3 belong to FINAL_VAR (quoted-double, quoted-single, bare ident);
    // groups 4-6 belong to FINAL (bare ident, quoted-double, quoted-single).
    if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
        return Some(Terminator {
            kind: TerminatorKind::FinalVar,
            value: m.as_str().to_string(),
        });
    }
    if let Some(m) = caps.get(4).or_else(|| caps.get(5)).or_else(|| caps.get(6)) {
        return Some(Terminator {
            kind: TerminatorKind::Final,
            value: m.as_str().to_string(),
        });
    }
    None
}

fn extract_thinking(text: &str) -> Option<String> {
    let fence_start = CODE_FENCE_RE.find(text).map(|m| m.start())?;
    let prefix = text[..fence_start].trim();
    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_string())
    }
}
