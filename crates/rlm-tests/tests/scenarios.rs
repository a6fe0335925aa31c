//! End-to-end scenarios exercising the real sandbox and agent loop together,
//! as opposed to `rlm-core`'s own unit tests which mostly isolate one module
//! at a time.

use std::sync::Arc;

use rlm_core::testing::{fixtures, ScriptedBackend};
use rlm_core::{Executor, ExecutorOptions, ModelPricing, PricingTable, RlmError};

fn haystack(needle: &str) -> String {
    let mut text = String::new();
    for i in 0..200 {
        text.push_str(&format!("filler line {i} with nothing interesting\n"));
    }
    text.push_str(needle);
    text.push('\n');
    for i in 200..400 {
        text.push_str(&format!("filler line {i} with nothing interesting\n"));
    }
    text
}

#[tokio::test]
async fn test_needle_in_haystack_requires_real_sandbox_exploration() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_response(
                "print(grep(context, 'THE-SECRET-CODE-IS-7321')[0]);",
            ))
            .with_response(fixtures::final_response("7321")),
    );
    let executor = Executor::new(backend.clone(), PricingTable::new());

    let outcome = executor
        .execute(
            "what is the secret code?",
            &haystack("THE-SECRET-CODE-IS-7321"),
            ExecutorOptions::new("test-model"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.response, "7321");

    // The second request the model "saw" must contain the grep result - proof
    // the sandbox actually ran against the full context, not a stub.
    let requests = backend.captured_requests();
    let second_request_text: String = requests[1]
        .iter()
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(second_request_text.contains("THE-SECRET-CODE-IS-7321"));
}

#[tokio::test]
async fn test_final_var_resolves_sandbox_computed_value() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_response(
                "globalThis.lineCount = context.split('\\n').length;",
            ))
            .with_response(fixtures::final_var_response("lineCount")),
    );
    let executor = Executor::new(backend, PricingTable::new());

    let context = "one\ntwo\nthree\nfour\n";
    let outcome = executor
        .execute("how many lines?", context, ExecutorOptions::new("test-model"))
        .await
        .unwrap();

    assert_eq!(outcome.response, context.lines().count().to_string());
}

#[tokio::test]
async fn test_bare_identifier_final_resolves_sandbox_computed_value() {
    let backend = Arc::new(ScriptedBackend::new().with_response(
        fixtures::code_then_final_bare_ident("globalThis.result = 42;", "result"),
    ));
    let executor = Executor::new(backend, PricingTable::new());

    let outcome = executor
        .execute("what is the answer?", "ctx", ExecutorOptions::new("test-model"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "42");
}

#[tokio::test]
async fn test_final_var_unbound_identifier_falls_back_to_literal() {
    let backend = Arc::new(
        ScriptedBackend::new().with_response(fixtures::final_var_response("neverDefined")),
    );
    let executor = Executor::new(backend, PricingTable::new());

    let outcome = executor
        .execute("q", "ctx", ExecutorOptions::new("test-model"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "neverDefined");
}

#[tokio::test]
async fn test_plain_object_concatenation_never_shows_object_object() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_then_final(
                "const parsed = { title: 'report', pages: 12 }; print('' + parsed);",
                "done",
            )),
    );
    let executor = Executor::new(backend.clone(), PricingTable::new());

    executor
        .execute("describe the object", "ctx", ExecutorOptions::new("test-model"))
        .await
        .unwrap();

    let requests = backend.captured_requests();
    let all_text: String = requests
        .iter()
        .flat_map(|msgs| msgs.iter().map(|m| m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(!all_text.contains("[object Object]"));
}

#[tokio::test]
async fn test_depth_exceeded_at_max_depth_zero_never_calls_sub_backend() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_then_final(
                "const r = await llm_query('summarize', context); print(r);",
                "stopped",
            )),
    );
    let executor = Executor::new(backend.clone(), PricingTable::new());

    let outcome = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("test-model").with_max_depth(0),
        )
        .await
        .unwrap();

    assert_eq!(outcome.response, "stopped");
    // Exactly one request: the single top-level turn. No sub-query call was made.
    backend.assert_request_count(1);
}

#[tokio::test]
async fn test_one_level_recursion_is_allowed_at_default_max_depth() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_response(
                "const r = await llm_query('summarize', context); globalThis.subAnswer = r;",
            ))
            .with_response(fixtures::text_response("a concise summary"))
            .with_response(fixtures::final_var_response("subAnswer")),
    );
    let executor = Executor::new(backend.clone(), PricingTable::new());

    let outcome = executor
        .execute("q", "ctx", ExecutorOptions::new("test-model"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "a concise summary");
    backend.assert_request_count(3);
}

#[tokio::test]
async fn test_budget_exceeded_from_sub_query_propagates_to_top_level() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_response(
                "const r = await llm_query('summarize', context); print(r);",
            ))
            .with_response(fixtures::text_response("a very expensive sub-answer"))
            .with_response(fixtures::final_response("never reached")),
    );
    let executor = Executor::new(backend, PricingTable::new());

    // text_response's usage is 10 prompt + 10 completion = 20 tokens; two
    // calls (top-level + sub-query) total 40, which exceeds a 30-token cap.
    let err = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("test-model").with_max_tokens(30),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RlmError::BudgetExceeded(_)));
}

#[tokio::test]
async fn test_max_cost_trips_on_pricey_model() {
    let mut pricing = PricingTable::new();
    pricing.insert(
        "pricey-model".to_string(),
        ModelPricing {
            input_per_1m: 1_000_000.0,
            output_per_1m: 1_000_000.0,
        },
    );
    let backend = Arc::new(ScriptedBackend::new().with_response(fixtures::final_response("x")));
    let executor = Executor::new(backend, pricing);

    let err = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("pricey-model").with_max_cost(0.01),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RlmError::BudgetExceeded(_)));
}

#[tokio::test]
async fn test_sandbox_state_persists_within_a_run() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_response("globalThis.seen = [];"))
            .with_response(fixtures::code_response("seen.push('a'); seen.push('b');"))
            .with_response(fixtures::final_var_response("seen")),
    );
    let executor = Executor::new(backend, PricingTable::new());

    let outcome = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("test-model").with_max_iterations(5),
        )
        .await
        .unwrap();

    assert!(outcome.response.contains('a') && outcome.response.contains('b'));
}

#[tokio::test]
async fn test_sandbox_timeout_surfaces_as_execution_error_not_run_failure() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_then_final(
                "await new Promise(r => setTimeout(r, 5000));",
                "recovered",
            ))
    );
    let executor = Executor::new(backend, PricingTable::new());

    let outcome = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("test-model").with_sandbox_timeout_ms(1_000),
        )
        .await
        .unwrap();

    // A timed-out execution is reported back to the model as an error, not a
    // fatal run failure: the same turn's FINAL still terminates the run.
    assert_eq!(outcome.response, "recovered");
}

#[tokio::test]
async fn test_sandbox_timeout_floor_rejects_configuration() {
    let backend = Arc::new(ScriptedBackend::new());
    let executor = Executor::new(backend, PricingTable::new());

    let err = executor
        .execute(
            "q",
            "ctx",
            ExecutorOptions::new("test-model").with_sandbox_timeout_ms(10),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RlmError::Configuration(_)));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_sandbox_state() {
    let backend_a = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_then_final("globalThis.x = 'a';", "a-done")),
    );
    let backend_b = Arc::new(
        ScriptedBackend::new()
            .with_response(fixtures::code_then_final(
                "print(typeof globalThis.x);",
                "b-done",
            )),
    );
    let executor_a = Executor::new(backend_a, PricingTable::new());
    let executor_b = Executor::new(backend_b.clone(), PricingTable::new());

    let (a, b) = tokio::join!(
        executor_a.execute("q", "ctx", ExecutorOptions::new("test-model")),
        executor_b.execute("q", "ctx", ExecutorOptions::new("test-model")),
    );

    assert_eq!(a.unwrap().response, "a-done");
    assert_eq!(b.unwrap().response, "b-done");

    let requests = backend_b.captured_requests();
    let text: String = requests
        .iter()
        .flat_map(|msgs| msgs.iter().map(|m| m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(text.contains("undefined"));
}

#[tokio::test]
async fn test_ambient_trace_round_trips_through_jsonl_persistence() {
    let backend = Arc::new(ScriptedBackend::new().with_response(fixtures::final_response("ok")));
    let executor = Executor::new(backend, PricingTable::new());

    let (outcome, run_trace) = rlm_tracing::with_tracing(async {
        executor
            .execute("q", "ctx", ExecutorOptions::new("test-model"))
            .await
    })
    .await;
    assert!(outcome.is_ok());

    let dir = tempfile::tempdir().unwrap();
    let writer = rlm_tracing::TraceWriter::new(rlm_tracing::WriterConfig::session(
        dir.path().join("traces.jsonl"),
    ))
    .unwrap();
    writer.write(&run_trace).unwrap();

    let files = writer.list_trace_files().unwrap();
    assert_eq!(files.len(), 1);
    let read_back = rlm_tracing::TraceWriter::read_traces(&files[0]).unwrap();
    assert_eq!(read_back.len(), 1);
    assert_eq!(read_back[0].trace_id, run_trace.trace_id);

    let as_json = serde_json::to_value(&read_back[0]).unwrap();
    assert!(as_json["spans"][0]["name"] == "rlm_run");
}
