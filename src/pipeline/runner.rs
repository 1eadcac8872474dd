//! Chain execution engine
//!
//! Runs steps strictly in order. Each step is gated by its condition, rendered
//! from the variable pool, passed through the optional pre-request script,
//! executed, checked by the post-request and test scripts, and finally feeds
//! its extractors back into the pool for the steps after it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::chain::ChainStep;
use super::{condition, extract, template};
use crate::client::RequestExecutor;
use crate::http::{HttpRequest, HttpResponse};
use crate::scripting::{ScriptContext, ScriptSandbox, TestEngine, TestResult, VariableMap};

pub const CONDITION_NOT_MET: &str = "Condition not met, skipping step";
pub const PREVIOUS_STEP_FAILED: &str = "Skipped: a previous step failed";

/// What happens to the rest of the chain after a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going; only condition-gated steps react to the failure
    #[default]
    Continue,
    /// Record every remaining step as skipped
    StopOnError,
}

#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    pub failure_policy: FailurePolicy,
    /// Serve GET steps from the response cache
    pub use_cache: bool,
    /// Falls back to the executor default
    pub cache_ttl: Option<Duration>,
    /// Merge `pm.environment` writes from step scripts into the pool
    pub persist_script_variables: bool,
}

/// Outcome of one step, in step order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecutionResult {
    pub step_id: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<VariableMap>,
    /// URL actually sent, after templating and scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<TestResult>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ChainExecutionResult {
    fn skipped(step: &ChainStep, reason: &str) -> Self {
        Self {
            step_id: step.id.clone(),
            success: false,
            skipped: true,
            response: None,
            error: Some(reason.to_string()),
            extracted_data: None,
            resolved_url: None,
            tests: None,
            duration_ms: 0,
        }
    }

    fn failed(step: &ChainStep, error: String, resolved_url: Option<String>, elapsed: Duration) -> Self {
        Self {
            step_id: step.id.clone(),
            success: false,
            skipped: false,
            response: None,
            error: Some(error),
            extracted_data: None,
            resolved_url,
            tests: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Failed after actually running, as opposed to being skipped
    pub fn failed_to_run(&self) -> bool {
        !self.success && !self.skipped
    }

    /// Status of the response, if one arrived
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Whether every test attached to the step passed
    pub fn tests_passed(&self) -> bool {
        self.tests.as_ref().is_none_or(|tests| tests.iter().all(|t| t.passed))
    }
}

/// Runs chains against a shared request executor
#[derive(Debug, Clone)]
pub struct ChainExecutor {
    executor: Arc<RequestExecutor>,
    sandbox: ScriptSandbox,
    options: ChainOptions,
}

/// Rendered request plus the pool as scripts left it
struct Prepared {
    request: HttpRequest,
    pool: VariableMap,
}

impl ChainExecutor {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self {
            executor,
            sandbox: ScriptSandbox::new(),
            options: ChainOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChainOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sandbox(mut self, sandbox: ScriptSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Run `steps` in order and return one result per step.
    ///
    /// Never fails as a whole: every error is recorded on its step.
    pub async fn execute_chain(
        &self,
        steps: &[ChainStep],
        initial_variables: VariableMap,
    ) -> Vec<ChainExecutionResult> {
        let mut pool = initial_variables;
        let mut results: Vec<ChainExecutionResult> = Vec::with_capacity(steps.len());
        let total = steps.len();

        for (i, step) in steps.iter().enumerate() {
            let stop = self.options.failure_policy == FailurePolicy::StopOnError
                && results.iter().any(ChainExecutionResult::failed_to_run);
            if stop {
                tracing::info!(step = %step.id, "Skipping step after earlier failure");
                results.push(ChainExecutionResult::skipped(step, PREVIOUS_STEP_FAILED));
                continue;
            }

            if let (Some(gate), Some(previous)) = (&step.condition, results.last()) {
                let holds = previous
                    .response
                    .as_ref()
                    .is_some_and(|response| condition::evaluate(gate, response));
                if !holds {
                    tracing::info!(step = %step.id, "Condition not met");
                    results.push(ChainExecutionResult::skipped(step, CONDITION_NOT_MET));
                    continue;
                }
            }

            tracing::info!(
                step = %step.id,
                name = step.display_name(),
                index = i + 1,
                total,
                "Running chain step"
            );
            let result = self.run_step(step, &mut pool).await;
            tracing::info!(
                step = %step.id,
                success = result.success,
                status = ?result.status(),
                duration_ms = result.duration_ms,
                "Chain step finished"
            );
            results.push(result);
        }

        results
    }

    async fn run_step(&self, step: &ChainStep, pool: &mut VariableMap) -> ChainExecutionResult {
        let start = Instant::now();

        let prepared = match self.prepare(step, pool) {
            Ok(prepared) => prepared,
            Err(e) => return ChainExecutionResult::failed(step, e, None, start.elapsed()),
        };
        if self.options.persist_script_variables {
            *pool = prepared.pool;
        }
        let request = prepared.request;
        let resolved_url = Some(request.url.clone());

        let sent_at = Instant::now();
        let response = match self
            .executor
            .execute_request(&request, self.options.use_cache, self.options.cache_ttl)
            .await
        {
            Ok(response) => response,
            Err(e) => return ChainExecutionResult::failed(step, e.to_string(), resolved_url, start.elapsed()),
        };
        let response_time = sent_at.elapsed();

        let mut success = response.is_success();
        let mut error = None;

        if let Some(script) = step.post_request_script.as_deref() {
            let context = ScriptContext::post_request(request.clone(), response.clone(), response_time);
            let outcome = self.sandbox.execute_script(script, &context, pool);
            if outcome.success {
                if self.options.persist_script_variables {
                    *pool = outcome.variables.environment;
                }
            } else {
                success = false;
                error = Some(format!(
                    "Post-request script error: {}",
                    outcome.error.unwrap_or_default()
                ));
            }
        }

        let tests = step.test_script.as_deref().map(|script| {
            let mut engine = TestEngine::with_environment(pool.clone()).with_limits(self.sandbox.limits());
            let results = engine.run_tests(script, &response, &request, response_time);
            if self.options.persist_script_variables {
                *pool = engine.environment().clone();
            }
            results
        });

        let mut extracted = VariableMap::new();
        for extractor in &step.extractors {
            let value = extract::extract(extractor, &response);
            tracing::debug!(step = %step.id, variable = %extractor.target_variable, "Extracted value");
            pool.insert(extractor.target_variable.clone(), value.clone());
            extracted.insert(extractor.target_variable.clone(), value);
        }

        ChainExecutionResult {
            step_id: step.id.clone(),
            success,
            skipped: false,
            response: Some(response),
            error,
            extracted_data: Some(extracted),
            resolved_url,
            tests,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Render the step and run its pre-request script
    fn prepare(&self, step: &ChainStep, pool: &VariableMap) -> std::result::Result<Prepared, String> {
        let url = template::render(&step.url, pool);
        let mut request = HttpRequest::new(&step.method, url).map_err(|e| e.to_string())?;
        for (name, value) in &step.headers {
            request.headers.insert(name.clone(), template::render(value, pool));
        }
        request.body = step.body.as_deref().map(|body| template::render(body, pool));

        let Some(script) = step.pre_request_script.as_deref() else {
            return Ok(Prepared {
                request,
                pool: pool.clone(),
            });
        };

        let outcome = self
            .sandbox
            .execute_script(script, &ScriptContext::pre_request(request.clone()), pool);
        if !outcome.success {
            return Err(format!(
                "Pre-request script error: {}",
                outcome.error.unwrap_or_default()
            ));
        }

        Ok(Prepared {
            request: outcome.updated_request.unwrap_or(request),
            pool: outcome.variables.environment,
        })
    }
}
