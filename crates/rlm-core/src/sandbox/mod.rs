//! Sandbox Session (§4.2).
//!
//! A persistent, stateful JavaScript environment backed by `rquickjs`: one
//! `SandboxSession` is created per top-level `execute` and lives for its
//! whole duration, so variables a turn's code binds are still visible to the
//! next turn's code (§3 invariant on session lifetime). The teacher's
//! `repl_tools::SandboxConfig`/`ExecutionResult`/timeout-via-
//! `tokio::time::timeout` shape is kept; the execution core itself is new,
//! since the teacher's sandbox is a non-persistent per-call subprocess
//! spawner and cannot satisfy the persistent-session requirement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::object::Property;
use rquickjs::prelude::{Async, Func};
use rquickjs::{async_with, AsyncContext, AsyncRuntime, CatchResultExt, Promise, Undefined, Value};

use crate::error::{Result, RlmError};
use crate::recursion::RecursionHost;
use crate::types::ExecutionResult;

const PRELUDE_JS: &str = include_str!("prelude.js");

/// One live sandbox, bound to a fixed `context` string and recursion host
/// for its entire lifetime.
pub struct SandboxSession {
    runtime: AsyncRuntime,
    context: AsyncContext,
    timeout: Duration,
}

impl SandboxSession {
    /// Start a fresh sandbox: boot the engine, bind `context` and the
    /// recursion host's callbacks, and install the prelude (§4.2 step 1).
    pub async fn new(
        context_value: String,
        host: Arc<dyn RecursionHost>,
        timeout: Duration,
    ) -> Result<Self> {
        let runtime = AsyncRuntime::new()
            .map_err(|e| RlmError::SandboxExecution(format!("failed to start sandbox: {e}")))?;
        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| RlmError::SandboxExecution(format!("failed to start sandbox: {e}")))?;

        Self::bind_globals(&context, &context_value, host).await?;

        Ok(Self {
            runtime,
            context,
            timeout,
        })
    }

    async fn bind_globals(
        context: &AsyncContext,
        context_value: &str,
        host: Arc<dyn RecursionHost>,
    ) -> Result<()> {
        let context_value = context_value.to_string();
        let host_query = host.clone();
        let host_parallel = host;

        async_with!(context => |ctx| {
            let globals = ctx.globals();

            // Non-writable: model code reassigning `context` must not leak
            // into the next turn's `execute` (§3 invariant I3). The session
            // reuses this `AsyncContext` across every turn, so a plain
            // `set` here would let `context = "tampered"` stick.
            globals.prop("context", Property::from(context_value).writable(false))
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(format!("failed to bind context: {e}")))?;

            globals.set(
                "__llm_query",
                Func::new(Async(move |prompt: String, sub_context: String| {
                    let host = host_query.clone();
                    async move { host.llm_query(prompt, sub_context).await }
                })),
            )
            .catch(&ctx)
            .map_err(|e| RlmError::SandboxExecution(format!("failed to bind llm_query: {e}")))?;

            globals.set(
                "__llm_query_parallel",
                Func::new(Async(move |rows: Vec<Vec<String>>| {
                    let host = host_parallel.clone();
                    async move {
                        let queries = rows
                            .into_iter()
                            .map(|mut row| {
                                let sub_context = row.pop().unwrap_or_default();
                                let prompt = row.pop().unwrap_or_default();
                                (prompt, sub_context)
                            })
                            .collect();
                        host.llm_query_parallel(queries).await
                    }
                })),
            )
            .catch(&ctx)
            .map_err(|e| RlmError::SandboxExecution(format!("failed to bind llm_query_parallel: {e}")))?;

            globals.set(
                "__sleep",
                Func::new(Async(move |ms: u64| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                })),
            )
            .catch(&ctx)
            .map_err(|e| RlmError::SandboxExecution(format!("failed to bind setTimeout: {e}")))?;

            ctx.eval::<(), _>(PRELUDE_JS)
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(format!("failed to install sandbox prelude: {e}")))?;

            // `AsyncContext::full` installs the entire QuickJS intrinsic set,
            // including `eval` and the `Function` constructor - both are
            // indirect "evaluate this string as code" constructs the
            // isolation model forbids (§4.2). Strip them after setup so no
            // turn's code can reach them.
            globals.set("eval", Undefined)
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(format!("failed to strip eval: {e}")))?;
            globals.set("Function", Undefined)
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(format!("failed to strip Function: {e}")))?;

            Ok::<_, RlmError>(())
        })
        .await
    }

    /// Run one turn's code to completion (or until `timeout` elapses).
    ///
    /// Code is wrapped in an async IIFE so top-level `await` works; the
    /// return value of the final expression is not itself surfaced - scripts
    /// communicate through `print`/`console.*` and through bindings the next
    /// turn can read back with [`Self::get_variable`].
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        let started = Instant::now();
        let wrapped = format!("(async () => {{\n{code}\n}})()");

        let run = async_with!(self.context => |ctx| {
            ctx.eval::<(), _>("globalThis.__captured = [];")
                .catch(&ctx)
                .map_err(|e| e.to_string())?;

            let promise: Promise = ctx
                .eval(wrapped)
                .catch(&ctx)
                .map_err(|e| e.to_string())?;
            let exec_result: std::result::Result<Value, String> = promise
                .into_future()
                .await
                .catch(&ctx)
                .map_err(|e| e.to_string());

            let captured: Vec<String> = ctx
                .globals()
                .get("__captured")
                .unwrap_or_default();
            let output = captured.join("\n");

            match exec_result {
                Ok(_) => Ok(output),
                Err(message) => Err((output, message)),
            }
        });

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => ExecutionResult {
                output,
                error: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err((output, message))) => ExecutionResult {
                output,
                error: Some(message),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Err(_) => ExecutionResult {
                output: String::new(),
                error: Some(format!(
                    "sandbox execution timed out after {:?}",
                    self.timeout
                )),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    /// Stringify a bound variable the way `str()` would inside the sandbox,
    /// used to resolve `FINAL_VAR(name)` (§4.5 step 3e).
    pub async fn get_variable(&self, name: &str) -> Result<Option<String>> {
        let name = name.to_string();
        async_with!(self.context => |ctx| {
            let globals = ctx.globals();
            if !globals.contains_key(&name).unwrap_or(false) {
                return Ok(None);
            }
            let value: Value = globals
                .get(&name)
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(e.to_string()))?;
            let stringify: rquickjs::Function = globals
                .get("str")
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(e.to_string()))?;
            let text: String = stringify
                .call((value,))
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(e.to_string()))?;
            Ok(Some(text))
        })
        .await
    }

    /// Bind a plain string variable into the session's global scope.
    pub async fn set_variable(&self, name: &str, value: &str) -> Result<()> {
        let name = name.to_string();
        let value = value.to_string();
        async_with!(self.context => |ctx| {
            ctx.globals()
                .set(&name, value)
                .catch(&ctx)
                .map_err(|e| RlmError::SandboxExecution(e.to_string()))
        })
        .await
    }

    /// Discard all bindings and reinstall a fresh `context`/prelude,
    /// keeping the underlying engine warm.
    pub async fn reset(&mut self, context_value: String, host: Arc<dyn RecursionHost>) -> Result<()> {
        self.context = AsyncContext::full(&self.runtime)
            .await
            .map_err(|e| RlmError::SandboxExecution(format!("failed to reset sandbox: {e}")))?;
        Self::bind_globals(&self.context, &context_value, host).await
    }

    /// Tear the sandbox down. Guarantees disposal on every exit path (§3
    /// invariant I5); the Executor calls this in a `finally`-equivalent
    /// position regardless of how the run ended.
    pub async fn dispose(self) {
        drop(self.context);
        self.runtime.idle().await;
    }
}
