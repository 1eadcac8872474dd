//! Test script execution
//!
//! A test script calls `pm.test(name, fn)` any number of times. Each callback
//! runs on its own; a failed assertion marks that test and the script moves on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::{ScriptMode, VariableMap, VariableScopes};
use super::interpreter::{SandboxState, ScriptLimits};
use super::sandbox;
use crate::http::{HttpRequest, HttpResponse};

/// Name of the result recorded when the script fails outside any test
pub const TEST_EXECUTION_ERROR: &str = "Test Execution Error";

/// Outcome of one `pm.test` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Runs test scripts. Variables persist across runs on the same engine.
#[derive(Debug, Default)]
pub struct TestEngine {
    limits: ScriptLimits,
    variables: VariableScopes,
    results: Vec<TestResult>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(environment: VariableMap) -> Self {
        Self {
            variables: VariableScopes::with_environment(environment),
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, limits: ScriptLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run `script` against a response and return the results of this run
    pub fn run_tests(
        &mut self,
        script: &str,
        response: &HttpResponse,
        request: &HttpRequest,
        response_time: Duration,
    ) -> Vec<TestResult> {
        let state = SandboxState {
            mode: Some(ScriptMode::Test),
            request: request.clone(),
            response: Some(response.clone()),
            response_time_ms: response_time.as_secs_f64() * 1000.0,
            variables: std::mem::take(&mut self.variables),
            ..SandboxState::default()
        };

        let (result, state) = sandbox::run(script, state, self.limits);
        self.variables = state.variables;

        let mut results = state.tests;
        if let Err(err) = result {
            results.push(TestResult {
                name: TEST_EXECUTION_ERROR.to_string(),
                passed: false,
                message: Some(err.message()),
                duration: None,
            });
        }

        let passed = results.iter().filter(|r| r.passed).count();
        tracing::debug!(total = results.len(), passed, "test script finished");

        self.results.extend(results.iter().cloned());
        results
    }

    /// Environment as the last run left it
    pub fn environment(&self) -> &VariableMap {
        &self.variables.environment
    }

    pub fn variables(&self) -> &VariableScopes {
        &self.variables
    }

    /// Every result recorded since the last `clear_results`
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> HttpResponse {
        let mut resp = HttpResponse::new(
            200,
            r#"{"id": 7, "name": "Ada", "roles": ["admin", "dev"], "meta": {"active": true}}"#,
        );
        resp.headers.insert("Content-Type".into(), "application/json".into());
        resp
    }

    fn run(script: &str) -> Vec<TestResult> {
        TestEngine::new().run_tests(script, &response(), &HttpRequest::get("http://api/users/7"), Duration::from_millis(40))
    }

    #[test]
    fn test_passing_and_failing_tests_are_isolated() {
        let results = run(
            r#"
            pm.test('status is 200', () => { pm.response.to.have.status(200); });
            pm.test('wrong id', () => { pm.expect(pm.response.json().id).to.equal(8); });
            pm.test('has name', function () { pm.expect(pm.response.json()).to.have.property('name'); });
            "#,
        );
        assert_eq!(results.len(), 3);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].message.as_deref(), Some("Expected 7 to equal 8"));
        assert!(results[2].passed);
        assert!(results.iter().all(|r| r.duration.is_some()));
    }

    #[test]
    fn test_assertion_vocabulary() {
        let results = run(
            r#"
            const body = pm.response.json();
            pm.test('above', () => pm.expect(body.id).to.be.above(5));
            pm.test('below', () => pm.expect(body.id).to.be.below(10));
            pm.test('one of', () => pm.expect(body.name).to.be.oneOf(['Ada', 'Grace']));
            pm.test('type', () => pm.expect(body.roles).to.be.an('array'));
            pm.test('length', () => pm.expect(body.roles).to.have.length(2));
            pm.test('include', () => pm.expect(body.roles).to.include('dev'));
            pm.test('deep', () => pm.expect(body.meta).to.eql({ active: true }));
            pm.test('not', () => pm.expect(body.name).to.not.equal('Grace'));
            pm.test('flag', () => pm.expect(body.meta.active).to.be.true);
            pm.test('header', () => pm.response.to.have.header('content-type'));
            pm.test('fast', () => pm.expect(pm.response.responseTime).to.be.below(1000));
            "#,
        );
        let failed: Vec<_> = results.iter().filter(|r| !r.passed).collect();
        assert!(failed.is_empty(), "{:?}", failed);
        assert_eq!(results.len(), 11);
    }

    #[test]
    fn test_failure_messages() {
        let results = run(
            r#"
            pm.test('type', () => pm.expect('x').to.be.a('number'));
            pm.test('prop', () => pm.expect({}).to.have.property('id'));
            pm.test('len', () => pm.expect([1]).to.have.length(3));
            pm.test('status', () => pm.response.to.have.status(404));
            "#,
        );
        let messages: Vec<_> = results.iter().map(|r| r.message.clone().unwrap_or_default()).collect();
        assert_eq!(
            messages,
            vec![
                "Expected type number, got string",
                "Expected object to have property id",
                "Expected length 3, got 1",
                "Expected response to have status code 404 but got 200",
            ]
        );
    }

    #[test]
    fn test_error_outside_test_is_recorded() {
        let results = run("pm.test('ok', () => {}); undefinedThing();");
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert_eq!(results[1].name, TEST_EXECUTION_ERROR);
        assert_eq!(results[1].message.as_deref(), Some("ReferenceError: undefinedThing is not defined"));
    }

    #[test]
    fn test_variables_persist_per_engine() {
        let request = HttpRequest::get("http://api");
        let mut engine = TestEngine::with_environment(VariableMap::from([("count".to_string(), json!(1))]));
        let script = "pm.environment.set('count', pm.environment.get('count') + 1);";
        engine.run_tests(script, &response(), &request, Duration::ZERO);
        engine.run_tests(script, &response(), &request, Duration::ZERO);
        assert_eq!(engine.environment()["count"], 3);

        let fresh = TestEngine::new();
        assert!(fresh.environment().is_empty());
    }

    #[test]
    fn test_results_accumulate_until_cleared() {
        let mut engine = TestEngine::new();
        let request = HttpRequest::get("http://api");
        engine.run_tests("pm.test('a', () => {});", &response(), &request, Duration::ZERO);
        engine.run_tests("pm.test('b', () => {});", &response(), &request, Duration::ZERO);
        assert_eq!(engine.results().len(), 2);
        engine.clear_results();
        assert!(engine.results().is_empty());
    }
}
