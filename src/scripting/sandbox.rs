//! Pre-request and post-request script execution

use std::time::Instant;

use serde::Serialize;

use super::context::{ScriptContext, ScriptMode, VariableMap, VariableScopes};
use super::interpreter::{Interpreter, SandboxState, ScriptLimits};
use super::parser;
use crate::http::HttpRequest;

/// Result of one script run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Request after `pm.request.update()`, pre-request scripts only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_request: Option<HttpRequest>,
    /// Variable maps as the script left them
    pub variables: VariableScopes,
    pub logs: Vec<String>,
}

/// Runs scripts against a request/response context
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: ScriptLimits,
}

impl ScriptSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ScriptLimits {
        self.limits
    }

    /// Run `script` with a fresh copy of `environment`.
    ///
    /// The caller's request is never touched; updates land in
    /// `updated_request`. Any failure is reported through `success`/`error`.
    pub fn execute_script(
        &self,
        script: &str,
        context: &ScriptContext,
        environment: &VariableMap,
    ) -> ScriptOutcome {
        let variables = VariableScopes::with_environment(environment.clone());
        if script.trim().is_empty() {
            return ScriptOutcome {
                success: true,
                variables,
                ..ScriptOutcome::default()
            };
        }

        let mode = context.mode();
        let state = SandboxState {
            mode: Some(mode),
            request: context.request().clone(),
            response: context.response().cloned(),
            response_time_ms: context.response_time().as_secs_f64() * 1000.0,
            variables,
            ..SandboxState::default()
        };

        let start = Instant::now();
        let (result, state) = run(script, state, self.limits);
        tracing::debug!(
            mode = ?mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "script finished"
        );

        match result {
            Ok(()) => ScriptOutcome {
                success: true,
                error: None,
                updated_request: (mode == ScriptMode::PreRequest).then_some(state.request),
                variables: state.variables,
                logs: state.logs,
            },
            Err(err) => ScriptOutcome {
                success: false,
                error: Some(err.message()),
                updated_request: None,
                variables: state.variables,
                logs: state.logs,
            },
        }
    }
}

/// Parse and evaluate, handing back whatever state the script produced
pub(super) fn run(
    script: &str,
    state: SandboxState,
    limits: ScriptLimits,
) -> (Result<(), super::ScriptError>, SandboxState) {
    let program = match parser::parse(script) {
        Ok(program) => program,
        Err(err) => return (Err(err), state),
    };
    let mut interpreter = Interpreter::new(state, limits);
    let result = interpreter.run(&program);
    (result, interpreter.take_state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use serde_json::json;
    use std::time::Duration;

    fn env() -> VariableMap {
        let mut env = VariableMap::new();
        env.insert("token".into(), json!("abc"));
        env
    }

    fn request() -> HttpRequest {
        HttpRequest::get("https://api.example.com/users").with_header("Accept", "application/json")
    }

    #[test]
    fn test_empty_script_succeeds() {
        let outcome = ScriptSandbox::new().execute_script("   ", &ScriptContext::pre_request(request()), &env());
        assert!(outcome.success);
        assert!(outcome.updated_request.is_none());
        assert_eq!(outcome.variables.environment["token"], "abc");
    }

    #[test]
    fn test_update_merges_into_shadow_request() {
        let original = request();
        let script = r#"
            pm.request.update({
                url: pm.request.url + '?page=2',
                method: 'post',
                headers: { Authorization: 'Bearer ' + pm.environment.get('token') },
                body: { name: 'x' }
            });
        "#;
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(original.clone()), &env());

        assert!(outcome.success, "{:?}", outcome.error);
        let updated = outcome.updated_request.unwrap();
        assert_eq!(updated.url, "https://api.example.com/users?page=2");
        assert_eq!(updated.method, "POST");
        assert_eq!(updated.headers["Accept"], "application/json");
        assert_eq!(updated.headers["Authorization"], "Bearer abc");
        assert_eq!(updated.body.as_deref(), Some(r#"{"name":"x"}"#));
        assert_eq!(original, request());
    }

    #[test]
    fn test_update_is_ignored_after_response() {
        let ctx = ScriptContext::post_request(request(), HttpResponse::new(200, "{}"), Duration::from_millis(5));
        let outcome = ScriptSandbox::new().execute_script("pm.request.update({ url: 'http://other' });", &ctx, &env());
        assert!(outcome.success);
        assert!(outcome.updated_request.is_none());
    }

    #[test]
    fn test_post_script_reads_response() {
        let ctx = ScriptContext::post_request(
            request(),
            HttpResponse::new(201, r#"{"id": 42, "tags": ["a", "b"]}"#),
            Duration::from_millis(5),
        );
        let script = r#"
            const body = pm.response.json();
            pm.environment.set('userId', body.id);
            console.log(pm.response.code, body.tags.join('|'), pm.response.text().length > 0);
        "#;
        let outcome = ScriptSandbox::new().execute_script(script, &ctx, &env());
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.variables.environment["userId"], 42);
        assert_eq!(outcome.logs, vec!["201 a|b true"]);
    }

    #[test]
    fn test_variable_scopes() {
        let script = r#"
            pm.globals.set('g', 1);
            pm.collectionVariables.set('c', [1, 2]);
            pm.environment.unset('token');
            console.log(pm.environment.has('token'), pm.globals.get('g'), pm.environment.get('missing'));
        "#;
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(outcome.success);
        assert!(outcome.variables.environment.is_empty());
        assert_eq!(outcome.variables.globals["g"], 1);
        assert_eq!(outcome.variables.collection_variables["c"], json!([1, 2]));
        assert_eq!(outcome.logs, vec!["false 1 null"]);
    }

    #[test]
    fn test_failures_become_outcomes() {
        let sandbox = ScriptSandbox::new();
        let ctx = ScriptContext::pre_request(request());

        let outcome = sandbox.execute_script("let = ;", &ctx, &env());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("SyntaxError"));

        let outcome = sandbox.execute_script("throw new Error('nope');", &ctx, &env());
        assert_eq!(outcome.error.as_deref(), Some("nope"));

        let outcome = sandbox.execute_script("pm.expect(1).to.equal(2);", &ctx, &env());
        assert_eq!(outcome.error.as_deref(), Some("Expected 1 to equal 2"));
    }

    #[test]
    fn test_no_ambient_capabilities() {
        let ctx = ScriptContext::pre_request(request());
        for script in ["require('fs')", "process.exit(1)", "fetch('http://x')", "setTimeout(() => 1, 10)"] {
            let outcome = ScriptSandbox::new().execute_script(script, &ctx, &env());
            assert!(!outcome.success, "{} should fail", script);
            assert!(outcome.error.unwrap().starts_with("ReferenceError"));
        }
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let sandbox = ScriptSandbox::with_limits(ScriptLimits {
            max_steps: 500,
            max_call_depth: 16,
            ..ScriptLimits::default()
        });
        let script = "const f = (n) => f(n + 1); f(0);";
        let outcome = sandbox.execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_circular_object_fails_to_stringify() {
        let ctx = ScriptContext::pre_request(request());
        for script in [
            "const a = {}; a.x = a; a.y = a; JSON.stringify(a);",
            "const a = {}; a.self = a; pm.environment.set('loop', a);",
            "const a = {}; a.self = a; pm.request.update({ body: a });",
        ] {
            let outcome = ScriptSandbox::new().execute_script(script, &ctx, &env());
            assert!(!outcome.success, "{} should fail", script);
            assert!(outcome.error.unwrap().contains("circular structure"));
        }
    }

    #[test]
    fn test_circular_values_in_messages_and_assertions() {
        let script = r#"
            const a = {}; a.x = a; a.y = a;
            console.log(a);
            pm.expect(a).to.eql(a);
        "#;
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.logs, vec!["[object Object]"]);
    }

    #[test]
    fn test_shared_structure_is_bounded() {
        let script = "const f = (o, n) => n == 0 ? o : f({ l: o, r: o }, n - 1); JSON.stringify(f({}, 30));";
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("nodes"));
    }

    #[test]
    fn test_self_containing_array_renders_empty() {
        let script = "const a = [1]; a.push(a); const s = '' + a; console.log(s, String(a), a.join('|'));";
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.logs, vec!["1, 1, 1|"]);
    }

    #[test]
    fn test_string_doubling_is_stopped() {
        let script = "const f = (s, n) => n == 0 ? s : f(s + s, n - 1); f('x', 31);";
        let outcome = ScriptSandbox::new().execute_script(script, &ScriptContext::pre_request(request()), &env());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Invalid string length"));
    }
}
