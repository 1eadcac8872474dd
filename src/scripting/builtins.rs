//! Globals and native functions
//!
//! Everything a script can reach is installed here: `pm`, `console`, `JSON`,
//! a handful of conversions and `Math` helpers, plus the allow-listed string,
//! array and number methods. Nothing else exists in the global scope.

use std::rc::Rc;
use std::time::Instant;

use regex::Regex;

use super::context::{ScriptMode, VarScope};
use super::interpreter::{Interpreter, SandboxState, Scope, ScriptLimits};
use super::test_engine::TestResult;
use super::value::{format_number, ArrayRef, Value};
use super::ScriptError;
use crate::http::{self, Headers};

#[derive(Debug, Clone)]
pub enum Builtin {
    RequestUpdate,
    VarGet(VarScope),
    VarSet(VarScope),
    VarHas(VarScope),
    VarUnset(VarScope),
    VarToObject(VarScope),
    ResponseJson,
    ResponseText,
    Test,
    Expect,
    Log,
    JsonParse,
    JsonStringify,
    ErrorCtor,
    StringCtor,
    NumberCtor,
    BooleanCtor,
    ParseInt,
    ParseFloat,
    IsArray,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    Math(MathFn),
    DateNow,
    Assert(Rc<Expectation>, Assertion),
}

#[derive(Debug, Clone, Copy)]
pub enum MathFn {
    Floor,
    Ceil,
    Round,
    Abs,
    Min,
    Max,
}

/// State of one `pm.expect(value)` chain
#[derive(Debug, Clone)]
pub struct Expectation {
    pub actual: Value,
    pub negated: bool,
    pub deep: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assertion {
    Equal,
    Eql,
    Above,
    Below,
    AtLeast,
    AtMost,
    OneOf,
    Type,
    Property,
    Length,
    Include,
    Match,
    Status,
    Header,
}

/// Chain words that only improve readability
const FILLER_WORDS: &[&str] = &[
    "to", "be", "been", "is", "that", "which", "and", "has", "have", "with", "at", "of", "same",
    "does", "but", "also", "still",
];

fn native(builtin: Builtin) -> Value {
    Value::Native(builtin)
}

fn object(entries: Vec<(&str, Value)>) -> Value {
    Value::object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

fn headers_object(headers: &Headers) -> Value {
    Value::object(
        headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::str(v.as_str())))
            .collect(),
    )
}

fn variables_object(scope: VarScope) -> Value {
    object(vec![
        ("get", native(Builtin::VarGet(scope))),
        ("set", native(Builtin::VarSet(scope))),
        ("has", native(Builtin::VarHas(scope))),
        ("unset", native(Builtin::VarUnset(scope))),
        ("toObject", native(Builtin::VarToObject(scope))),
    ])
}

/// Populate the global scope for a run
pub fn install_globals(globals: &Rc<Scope>, state: &SandboxState) {
    let request = &state.request;
    let pm_request = object(vec![
        ("url", Value::str(request.url.as_str())),
        ("method", Value::str(request.method.as_str())),
        ("headers", headers_object(&request.headers)),
        (
            "body",
            request
                .body
                .as_ref()
                .map(|b| Value::str(b.as_str()))
                .unwrap_or(Value::Null),
        ),
        ("update", native(Builtin::RequestUpdate)),
    ]);

    let mut pm = vec![
        ("request", pm_request),
        ("environment", variables_object(VarScope::Environment)),
        ("globals", variables_object(VarScope::Globals)),
        ("collectionVariables", variables_object(VarScope::CollectionVariables)),
        ("expect", native(Builtin::Expect)),
    ];

    if let Some(response) = &state.response {
        let fields = vec![
            ("code", Value::Number(f64::from(response.status))),
            ("status", Value::str(response.status_text.as_str())),
            ("headers", headers_object(&response.headers)),
            ("json", native(Builtin::ResponseJson)),
            ("text", native(Builtin::ResponseText)),
            ("responseTime", Value::Number(state.response_time_ms)),
        ];
        // The expectation holds a copy without `to` so the object does not contain itself
        let snapshot = object(fields.clone());
        let mut fields = fields;
        fields.push((
            "to",
            Value::Expectation(Rc::new(Expectation {
                actual: snapshot,
                negated: false,
                deep: false,
            })),
        ));
        pm.push(("response", object(fields)));
    }

    if state.mode() == ScriptMode::Test {
        pm.push(("test", native(Builtin::Test)));
    }

    globals.define("pm", object(pm), true);
    globals.define("console", object(vec![("log", native(Builtin::Log))]), true);
    globals.define(
        "JSON",
        object(vec![
            ("parse", native(Builtin::JsonParse)),
            ("stringify", native(Builtin::JsonStringify)),
        ]),
        true,
    );
    globals.define("Error", native(Builtin::ErrorCtor), true);
    globals.define("String", native(Builtin::StringCtor), true);
    globals.define("Number", native(Builtin::NumberCtor), true);
    globals.define("Boolean", native(Builtin::BooleanCtor), true);
    globals.define("parseInt", native(Builtin::ParseInt), true);
    globals.define("parseFloat", native(Builtin::ParseFloat), true);
    globals.define("Array", object(vec![("isArray", native(Builtin::IsArray))]), true);
    globals.define(
        "Object",
        object(vec![
            ("keys", native(Builtin::ObjectKeys)),
            ("values", native(Builtin::ObjectValues)),
            ("entries", native(Builtin::ObjectEntries)),
        ]),
        true,
    );
    globals.define(
        "Math",
        object(vec![
            ("floor", native(Builtin::Math(MathFn::Floor))),
            ("ceil", native(Builtin::Math(MathFn::Ceil))),
            ("round", native(Builtin::Math(MathFn::Round))),
            ("abs", native(Builtin::Math(MathFn::Abs))),
            ("min", native(Builtin::Math(MathFn::Min))),
            ("max", native(Builtin::Math(MathFn::Max))),
        ]),
        true,
    );
    globals.define("Date", object(vec![("now", native(Builtin::DateNow))]), true);
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn key_arg(args: &[Value]) -> String {
    arg(args, 0).to_display()
}

impl Interpreter {
    pub(super) fn call_builtin(&mut self, builtin: &Builtin, args: Vec<Value>) -> Result<Value, ScriptError> {
        match builtin {
            Builtin::RequestUpdate => {
                self.update_request(&arg(&args, 0))?;
                Ok(Value::Undefined)
            }
            Builtin::VarGet(scope) => Ok(self
                .state
                .variables
                .get(*scope)
                .get(&key_arg(&args))
                .map(Value::from_json)
                .unwrap_or(Value::Null)),
            Builtin::VarSet(scope) => {
                let value = arg(&args, 1).try_to_json()?.unwrap_or(serde_json::Value::Null);
                self.state.variables.get_mut(*scope).insert(key_arg(&args), value);
                Ok(Value::Undefined)
            }
            Builtin::VarHas(scope) => Ok(Value::Bool(
                self.state.variables.get(*scope).contains_key(&key_arg(&args)),
            )),
            Builtin::VarUnset(scope) => {
                self.state.variables.get_mut(*scope).shift_remove(&key_arg(&args));
                Ok(Value::Undefined)
            }
            Builtin::VarToObject(scope) => Ok(Value::object(
                self.state
                    .variables
                    .get(*scope)
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
            Builtin::ResponseJson => Ok(self
                .state
                .response
                .as_ref()
                .and_then(|r| r.json())
                .map(|j| Value::from_json(&j))
                .unwrap_or(Value::Null)),
            Builtin::ResponseText => Ok(self
                .state
                .response
                .as_ref()
                .map(|r| Value::str(r.body.as_str()))
                .unwrap_or_else(|| Value::str(""))),
            Builtin::Test => self.run_test(&args),
            Builtin::Expect => Ok(Value::Expectation(Rc::new(Expectation {
                actual: arg(&args, 0),
                negated: false,
                deep: false,
            }))),
            Builtin::Log => {
                let line = args.iter().map(Value::describe).collect::<Vec<_>>().join(" ");
                tracing::debug!(target: "pulsechain::script", "{}", line);
                self.state.logs.push(line);
                Ok(Value::Undefined)
            }
            Builtin::JsonParse => {
                let text = key_arg(&args);
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(|j| Value::from_json(&j))
                    .map_err(|e| ScriptError::Thrown(format!("Invalid JSON: {}", e)))
            }
            Builtin::JsonStringify => {
                let value = arg(&args, 0);
                let pretty = match arg(&args, 2) {
                    Value::Number(n) => n > 0.0,
                    Value::Str(s) => !s.is_empty(),
                    _ => false,
                };
                Ok(match value.try_to_json()? {
                    Some(json) => {
                        let text = if pretty {
                            serde_json::to_string_pretty(&json)
                        } else {
                            serde_json::to_string(&json)
                        };
                        Value::Str(text.map_err(|e| ScriptError::Type(e.to_string()))?)
                    }
                    None => Value::Undefined,
                })
            }
            Builtin::ErrorCtor => Ok(object(vec![
                ("name", Value::str("Error")),
                (
                    "message",
                    match arg(&args, 0) {
                        Value::Undefined => Value::str(""),
                        other => Value::Str(other.to_display()),
                    },
                ),
            ])),
            Builtin::StringCtor => Ok(Value::Str(arg(&args, 0).to_display())),
            Builtin::NumberCtor => Ok(Value::Number(arg(&args, 0).to_number())),
            Builtin::BooleanCtor => Ok(Value::Bool(arg(&args, 0).truthy())),
            Builtin::ParseInt => Ok(Value::Number(parse_int(&key_arg(&args), &arg(&args, 1)))),
            Builtin::ParseFloat => Ok(Value::Number(parse_float(&key_arg(&args)))),
            Builtin::IsArray => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
            Builtin::ObjectKeys | Builtin::ObjectValues | Builtin::ObjectEntries => {
                let entries: Vec<(String, Value)> = match arg(&args, 0) {
                    Value::Object(map) => map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    Value::Array(items) => items
                        .borrow()
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v.clone()))
                        .collect(),
                    Value::Undefined | Value::Null => {
                        return Err(ScriptError::Type("Cannot convert undefined or null to object".into()))
                    }
                    _ => Vec::new(),
                };
                Ok(Value::array(
                    entries
                        .into_iter()
                        .map(|(k, v)| match builtin {
                            Builtin::ObjectKeys => Value::Str(k),
                            Builtin::ObjectValues => v,
                            _ => Value::array(vec![Value::Str(k), v]),
                        })
                        .collect(),
                ))
            }
            Builtin::Math(f) => {
                let x = arg(&args, 0).to_number();
                Ok(Value::Number(match f {
                    MathFn::Floor => x.floor(),
                    MathFn::Ceil => x.ceil(),
                    MathFn::Round => (x + 0.5).floor(),
                    MathFn::Abs => x.abs(),
                    MathFn::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
                    MathFn::Max => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, f64::max),
                }))
            }
            Builtin::DateNow => Ok(Value::Number(crate::cache::now_millis() as f64)),
            Builtin::Assert(expectation, assertion) => {
                self.assert(expectation, *assertion, &args)?;
                Ok(Value::Expectation(Rc::clone(expectation)))
            }
        }
    }

    /// `pm.request.update({...})`: merge into the shadow request, pre-request only
    fn update_request(&mut self, updates: &Value) -> Result<(), ScriptError> {
        if self.state.mode() != ScriptMode::PreRequest {
            return Ok(());
        }
        let Value::Object(map) = updates else {
            return Err(ScriptError::Type("pm.request.update expects an object".into()));
        };
        let map = map.borrow();

        if let Some(url) = map.get("url").filter(|v| v.truthy()) {
            self.state.request.url = url.to_display();
        }
        if let Some(verb) = map.get("method").filter(|v| v.truthy()) {
            let normalized = http::normalize(&verb.to_display());
            if !http::is_valid_token(&normalized) {
                return Err(ScriptError::Type(format!("Invalid HTTP method '{}'", verb.to_display())));
            }
            self.state.request.method = normalized;
        }
        if let Some(Value::Object(headers)) = map.get("headers") {
            for (name, value) in headers.borrow().iter() {
                self.state.request.headers.insert(name.clone(), value.to_display());
            }
        }
        match map.get("body") {
            None | Some(Value::Undefined) => {}
            Some(Value::Null) => self.state.request.body = None,
            Some(Value::Str(text)) => self.state.request.body = Some(text.clone()),
            Some(other) => {
                self.state.request.body = other.try_to_json()?.map(|j| j.to_string());
            }
        }
        Ok(())
    }

    /// `pm.test(name, fn)`: run `fn`, record the outcome, never fail the script
    fn run_test(&mut self, args: &[Value]) -> Result<Value, ScriptError> {
        let name = key_arg(args);
        let function = arg(args, 1);
        let start = Instant::now();
        let outcome = self.call_value(&function, Vec::new());
        let duration = Some(start.elapsed().as_secs_f64() * 1000.0);

        let result = match outcome {
            Ok(_) => TestResult {
                name,
                passed: true,
                message: None,
                duration,
            },
            // Budget violations end the whole run
            Err(e @ ScriptError::Limit(_)) => return Err(e),
            Err(e) => TestResult {
                name,
                passed: false,
                message: Some(e.message()),
                duration,
            },
        };
        self.state.tests.push(result);
        Ok(Value::Undefined)
    }

    pub(super) fn expectation_property(
        &mut self,
        expectation: &Rc<Expectation>,
        name: &str,
    ) -> Result<Value, ScriptError> {
        if FILLER_WORDS.contains(&name) {
            return Ok(Value::Expectation(Rc::clone(expectation)));
        }

        let derived = |negated: bool, deep: bool| {
            Value::Expectation(Rc::new(Expectation {
                actual: expectation.actual.clone(),
                negated,
                deep,
            }))
        };
        let assertion = |kind: Assertion| -> Result<Value, ScriptError> {
            Ok(native(Builtin::Assert(Rc::clone(expectation), kind)))
        };

        match name {
            "not" => Ok(derived(!expectation.negated, expectation.deep)),
            "deep" => Ok(derived(expectation.negated, true)),
            "ok" | "true" | "false" | "null" | "undefined" | "empty" | "exist" => {
                self.check_flag(expectation, name)?;
                Ok(Value::Expectation(Rc::clone(expectation)))
            }
            "equal" | "equals" | "eq" => {
                assertion(if expectation.deep { Assertion::Eql } else { Assertion::Equal })
            }
            "eql" | "eqls" => assertion(Assertion::Eql),
            "above" | "gt" | "greaterThan" => assertion(Assertion::Above),
            "below" | "lt" | "lessThan" => assertion(Assertion::Below),
            "least" | "gte" => assertion(Assertion::AtLeast),
            "most" | "lte" => assertion(Assertion::AtMost),
            "oneOf" => assertion(Assertion::OneOf),
            "a" | "an" => assertion(Assertion::Type),
            "property" => assertion(Assertion::Property),
            "length" | "lengthOf" => assertion(Assertion::Length),
            "include" | "includes" | "contain" | "contains" => assertion(Assertion::Include),
            "match" => assertion(Assertion::Match),
            "status" => assertion(Assertion::Status),
            "header" => assertion(Assertion::Header),
            other => Err(ScriptError::Type(format!("Unknown assertion '{}'", other))),
        }
    }

    /// Property-style assertions such as `.to.be.true`
    fn check_flag(&self, expectation: &Expectation, flag: &str) -> Result<(), ScriptError> {
        let actual = &expectation.actual;
        let shown = actual.describe();
        let (pass, what) = match flag {
            "ok" => (actual.truthy(), "truthy".to_string()),
            "true" => (matches!(actual, Value::Bool(true)), "true".to_string()),
            "false" => (matches!(actual, Value::Bool(false)), "false".to_string()),
            "null" => (matches!(actual, Value::Null), "null".to_string()),
            "undefined" => (matches!(actual, Value::Undefined), "undefined".to_string()),
            "exist" => (!actual.is_nullish(), "defined".to_string()),
            _ => (size_of(actual) == Some(0), "empty".to_string()),
        };
        check(
            pass,
            expectation.negated,
            format!("Expected {} to be {}", shown, what),
            format!("Expected {} to not be {}", shown, what),
        )
    }

    fn assert(&mut self, expectation: &Expectation, kind: Assertion, args: &[Value]) -> Result<(), ScriptError> {
        let actual = &expectation.actual;
        let expected = arg(args, 0);
        let a = actual.describe();
        let e = expected.describe();

        let (pass, positive, negative) = match kind {
            Assertion::Equal => (
                actual.strict_equals(&expected),
                format!("Expected {} to equal {}", a, e),
                format!("Expected {} to not equal {}", a, e),
            ),
            Assertion::Eql => (
                actual.deep_equals(&expected),
                format!("Expected {} to deeply equal {}", a, e),
                format!("Expected {} to not deeply equal {}", a, e),
            ),
            Assertion::Above => (
                actual.to_number() > expected.to_number(),
                format!("Expected {} to be above {}", a, e),
                format!("Expected {} to be at most {}", a, e),
            ),
            Assertion::Below => (
                actual.to_number() < expected.to_number(),
                format!("Expected {} to be below {}", a, e),
                format!("Expected {} to be at least {}", a, e),
            ),
            Assertion::AtLeast => (
                actual.to_number() >= expected.to_number(),
                format!("Expected {} to be at least {}", a, e),
                format!("Expected {} to be below {}", a, e),
            ),
            Assertion::AtMost => (
                actual.to_number() <= expected.to_number(),
                format!("Expected {} to be at most {}", a, e),
                format!("Expected {} to be above {}", a, e),
            ),
            Assertion::OneOf => {
                let options: Vec<Value> = match &expected {
                    Value::Array(items) => items.borrow().clone(),
                    other => vec![other.clone()],
                };
                let list = options.iter().map(Value::to_display).collect::<Vec<_>>().join(", ");
                (
                    options.iter().any(|o| o.strict_equals(actual)),
                    format!("Expected {} to be one of {}", a, list),
                    format!("Expected {} to not be one of {}", a, list),
                )
            }
            Assertion::Type => {
                let wanted = expected.to_display().to_lowercase();
                let got = actual.type_name();
                (
                    got == wanted,
                    format!("Expected type {}, got {}", wanted, got),
                    format!("Expected type to not be {}", wanted),
                )
            }
            Assertion::Property => {
                let name = expected.to_display();
                let found = match actual {
                    Value::Object(map) => map.borrow().get(&name).cloned(),
                    Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.borrow().get(i).cloned()),
                    _ => None,
                };
                match (found, args.get(1)) {
                    (Some(value), Some(wanted)) => (
                        value.strict_equals(wanted),
                        format!(
                            "Expected property {} to equal {}, got {}",
                            name,
                            wanted.describe(),
                            value.describe()
                        ),
                        format!("Expected property {} to not equal {}", name, wanted.describe()),
                    ),
                    (found, _) => (
                        found.is_some(),
                        format!("Expected object to have property {}", name),
                        format!("Expected object to not have property {}", name),
                    ),
                }
            }
            Assertion::Length => {
                let wanted = expected.to_number();
                let size = size_of(actual);
                let shown = size.map(|n| n.to_string()).unwrap_or_else(|| "undefined".into());
                (
                    size.is_some_and(|n| n as f64 == wanted),
                    format!("Expected length {}, got {}", format_number(wanted), shown),
                    format!("Expected length to not be {}", format_number(wanted)),
                )
            }
            Assertion::Include => {
                let found = match actual {
                    Value::Array(items) => items.borrow().iter().any(|item| {
                        if expectation.deep {
                            item.deep_equals(&expected)
                        } else {
                            item.strict_equals(&expected)
                        }
                    }),
                    Value::Object(map) => match &expected {
                        Value::Object(subset) => subset.borrow().iter().all(|(k, v)| {
                            map.borrow().get(k).is_some_and(|have| have.deep_equals(v))
                        }),
                        other => map.borrow().contains_key(&other.to_display()),
                    },
                    other => other.to_display().contains(&expected.to_display()),
                };
                (
                    found,
                    format!("Expected {} to include {}", a, e),
                    format!("Expected {} to not include {}", a, e),
                )
            }
            Assertion::Match => {
                let pattern = expected.to_display();
                let re = Regex::new(&pattern)
                    .map_err(|err| ScriptError::Type(format!("Invalid pattern '{}': {}", pattern, err)))?;
                (
                    re.is_match(&actual.to_display()),
                    format!("Expected {} to match {}", a, pattern),
                    format!("Expected {} to not match {}", a, pattern),
                )
            }
            Assertion::Status => {
                let code = self.get_property(actual, "code")?;
                (
                    code.to_number() == expected.to_number(),
                    format!(
                        "Expected response to have status code {} but got {}",
                        e,
                        code.describe()
                    ),
                    format!("Expected response to not have status code {}", e),
                )
            }
            Assertion::Header => {
                let headers = self.get_property(actual, "headers")?;
                let found = match &headers {
                    Value::Object(map) => map
                        .borrow()
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(&e))
                        .map(|(_, v)| v.clone()),
                    _ => None,
                };
                match (found, args.get(1)) {
                    (Some(value), Some(wanted)) => (
                        value.to_display() == wanted.to_display(),
                        format!(
                            "Expected header {} to be {}, got {}",
                            e,
                            wanted.describe(),
                            value.describe()
                        ),
                        format!("Expected header {} to not be {}", e, wanted.describe()),
                    ),
                    (found, _) => (
                        found.is_some(),
                        format!("Expected response to have header {}", e),
                        format!("Expected response to not have header {}", e),
                    ),
                }
            }
        };

        check(pass, expectation.negated, positive, negative)
    }

    /// Allow-listed array methods. `None` means the method does not exist.
    pub(super) fn array_method(
        &mut self,
        items: &ArrayRef,
        name: &str,
        args: &[Value],
    ) -> Option<Result<Value, ScriptError>> {
        let snapshot = || items.borrow().clone();
        let result = match name {
            "push" => {
                let mut items = items.borrow_mut();
                if let Err(err) = self.limits().check_array_len(items.len() + args.len()) {
                    return Some(Err(err));
                }
                items.extend(args.iter().cloned());
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "includes" => Ok(Value::Bool(
                items.borrow().iter().any(|item| item.strict_equals(&arg(args, 0))),
            )),
            "indexOf" => Ok(Value::Number(
                items
                    .borrow()
                    .iter()
                    .position(|item| item.strict_equals(&arg(args, 0)))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )),
            "join" => {
                let sep = match arg(args, 0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_display(),
                };
                self.join(items, &sep)
            }
            "slice" => {
                let all = snapshot();
                let (start, end) = slice_bounds(all.len(), &arg(args, 0), &arg(args, 1));
                Ok(Value::array(all[start..end].to_vec()))
            }
            "concat" => {
                let extra: usize = args
                    .iter()
                    .map(|v| match v {
                        Value::Array(more) => more.borrow().len(),
                        _ => 1,
                    })
                    .sum();
                if let Err(err) = self.limits().check_array_len(items.borrow().len() + extra) {
                    return Some(Err(err));
                }
                let mut all = snapshot();
                for extra in args {
                    match extra {
                        Value::Array(more) => all.extend(more.borrow().iter().cloned()),
                        other => all.push(other.clone()),
                    }
                }
                Ok(Value::array(all))
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Ok(Value::Array(Rc::clone(items)))
            }
            "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" => {
                self.iterate(&snapshot(), name, &arg(args, 0))
            }
            "reduce" => self.reduce(&snapshot(), &arg(args, 0), args.get(1).cloned()),
            _ => return None,
        };
        Some(result)
    }

    /// `join`, failing once the result passes the string limit
    fn join(&self, items: &ArrayRef, sep: &str) -> Result<Value, ScriptError> {
        let mut out = String::new();
        for (i, item) in items.borrow().iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            if !item.is_nullish() {
                out.push_str(&item.to_display_within(items));
            }
            self.limits().check_string_len(out.len())?;
        }
        Ok(Value::Str(out))
    }

    fn iterate(&mut self, items: &[Value], name: &str, callback: &Value) -> Result<Value, ScriptError> {
        let mut mapped = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let out = self.call_value(callback, vec![item.clone(), Value::Number(i as f64)])?;
            match name {
                "map" => mapped.push(out),
                "filter" if out.truthy() => mapped.push(item.clone()),
                "find" if out.truthy() => return Ok(item.clone()),
                "findIndex" if out.truthy() => return Ok(Value::Number(i as f64)),
                "some" if out.truthy() => return Ok(Value::Bool(true)),
                "every" if !out.truthy() => return Ok(Value::Bool(false)),
                _ => {}
            }
        }
        Ok(match name {
            "map" | "filter" => Value::array(mapped),
            "find" | "forEach" => Value::Undefined,
            "findIndex" => Value::Number(-1.0),
            "some" => Value::Bool(false),
            _ => Value::Bool(true),
        })
    }

    fn reduce(&mut self, items: &[Value], callback: &Value, initial: Option<Value>) -> Result<Value, ScriptError> {
        let mut iter = items.iter().cloned().enumerate();
        let mut acc = match initial {
            Some(value) => value,
            None => match iter.next() {
                Some((_, first)) => first,
                None => return Err(ScriptError::Type("Reduce of empty array with no initial value".into())),
            },
        };
        for (i, item) in iter {
            acc = self.call_value(callback, vec![acc, item, Value::Number(i as f64)])?;
        }
        Ok(acc)
    }
}

fn check(pass: bool, negated: bool, positive: String, negative: String) -> Result<(), ScriptError> {
    match (pass, negated) {
        (true, false) | (false, true) => Ok(()),
        (false, false) => Err(ScriptError::Assertion(positive)),
        (true, true) => Err(ScriptError::Assertion(negative)),
    }
}

fn size_of(value: &Value) -> Option<usize> {
    match value {
        Value::Str(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.borrow().len()),
        Value::Object(map) => Some(map.borrow().len()),
        _ => None,
    }
}

fn parse_int(text: &str, radix: &Value) -> f64 {
    let radix = match radix {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let t = text.trim();
    let (sign, digits) = match t.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, t.strip_prefix('+').unwrap_or(t)),
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    i64::from_str_radix(&valid, radix)
        .map(|n| sign * n as f64)
        .unwrap_or(f64::NAN)
}

fn parse_float(text: &str) -> f64 {
    let t = text.trim();
    // Longest prefix that parses
    (1..=t.len())
        .rev()
        .filter(|&end| t.is_char_boundary(end))
        .find_map(|end| t[..end].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Resolve `slice(start, end)` arguments against a length
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |v: &Value, default: usize| -> usize {
        match v {
            Value::Undefined => default,
            other => {
                let n = other.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

/// Allow-listed string methods. `None` means the method does not exist.
pub fn string_method(s: &str, name: &str, args: &[Value], limits: &ScriptLimits) -> Option<Result<Value, ScriptError>> {
    match string_method_unchecked(s, name, args, limits) {
        Some(Ok(value)) => Some(limits.check_size(value)),
        other => other,
    }
}

fn string_method_unchecked(
    s: &str,
    name: &str,
    args: &[Value],
    limits: &ScriptLimits,
) -> Option<Result<Value, ScriptError>> {
    let text_arg = |i: usize| arg(args, i).to_display();
    let chars: Vec<char> = s.chars().collect();
    let value = match name {
        "includes" => Value::Bool(s.contains(&text_arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&text_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&text_arg(0))),
        "indexOf" => Value::Number(
            s.find(&text_arg(0))
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0),
        ),
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "toString" => Value::str(s),
        "charAt" => Value::Str(
            chars
                .get(arg(args, 0).to_number().max(0.0) as usize)
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ),
        "slice" | "substring" => {
            let (start, end) = if name == "substring" {
                let clamp = |v: &Value, default: usize| match v {
                    Value::Undefined => default,
                    other => other.to_number().max(0.0).min(chars.len() as f64) as usize,
                };
                let (a, b) = (clamp(&arg(args, 0), 0), clamp(&arg(args, 1), chars.len()));
                (a.min(b), a.max(b))
            } else {
                slice_bounds(chars.len(), &arg(args, 0), &arg(args, 1))
            };
            Value::Str(chars[start..end].iter().collect())
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::str(s)],
                sep => {
                    let sep = sep.to_display();
                    let count = if sep.is_empty() { chars.len() } else { s.matches(sep.as_str()).count() + 1 };
                    if let Err(err) = limits.check_array_len(count) {
                        return Some(Err(err));
                    }
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "replace" => Value::Str(s.replacen(&text_arg(0), &text_arg(1), 1)),
        "replaceAll" => {
            let (from, to) = (text_arg(0), text_arg(1));
            // An empty pattern matches between every character
            let matches = if from.is_empty() { chars.len() + 1 } else { s.matches(from.as_str()).count() };
            let projected = s.len().saturating_add(matches.saturating_mul(to.len()));
            if let Err(err) = limits.check_string_len(projected) {
                return Some(Err(err));
            }
            Value::Str(s.replace(&from, &to))
        }
        "concat" => {
            let mut out = s.to_string();
            for value in args {
                out.push_str(&value.to_display());
                if let Err(err) = limits.check_string_len(out.len()) {
                    return Some(Err(err));
                }
            }
            Value::Str(out)
        }
        _ => return None,
    };
    Some(Ok(value))
}

/// Allow-listed number methods
pub fn number_method(n: f64, name: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 20.0) as usize };
            Some(Ok(Value::Str(format!("{:.*}", digits, n))))
        }
        "toString" => Some(Ok(Value::Str(format_number(n)))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_parse_int_and_float() {
        assert_eq!(parse_int("42px", &Value::Undefined), 42.0);
        assert_eq!(parse_int("-ff", &Value::Number(16.0)), -255.0);
        assert!(parse_int("abc", &Value::Undefined).is_nan());
        assert_eq!(parse_float("3.5kg"), 3.5);
    }

    #[test]
    fn test_string_methods() {
        let call = |name: &str, args: Vec<Value>| {
            string_method("Hello World", name, &args, &ScriptLimits::default())
                .unwrap()
                .unwrap()
                .describe()
        };
        assert_eq!(call("toUpperCase", vec![]), "HELLO WORLD");
        assert_eq!(call("indexOf", vec![Value::str("World")]), "6");
        assert_eq!(call("slice", vec![Value::Number(-5.0)]), "World");
        assert_eq!(call("split", vec![Value::str(" ")]), r#"["Hello","World"]"#);
        assert!(string_method("x", "constructor", &[], &ScriptLimits::default()).is_none());
    }

    #[test]
    fn test_string_methods_respect_size_limits() {
        let limits = ScriptLimits {
            max_string_bytes: 16,
            max_array_len: 4,
            ..ScriptLimits::default()
        };
        let call = |name: &str, args: Vec<Value>| string_method("abcdef", name, &args, &limits).unwrap();
        assert!(matches!(
            call("replaceAll", vec![Value::str(""), Value::str("--")]),
            Err(ScriptError::Limit(_))
        ));
        assert!(matches!(call("split", vec![Value::str("")]), Err(ScriptError::Limit(_))));
        assert!(matches!(
            call("concat", vec![Value::str("0123456789"), Value::str("!")]),
            Err(ScriptError::Limit(_))
        ));
        assert_eq!(call("replaceAll", vec![Value::str("c"), Value::str("C")]).unwrap().describe(), "abCdef");
    }

    #[test]
    fn test_slice_bounds() {
        assert_eq!(slice_bounds(5, &Value::Number(1.0), &Value::Number(3.0)), (1, 3));
        assert_eq!(slice_bounds(5, &Value::Number(-2.0), &Value::Undefined), (3, 5));
        assert_eq!(slice_bounds(5, &Value::Number(4.0), &Value::Number(2.0)), (4, 4));
    }

    #[test]
    fn test_negated_check_messages() {
        assert!(check(true, false, "p".into(), "n".into()).is_ok());
        assert_eq!(
            check(true, true, "p".into(), "n".into()),
            Err(ScriptError::Assertion("n".into()))
        );
    }

    #[test]
    fn test_headers_object_keeps_names() {
        let mut headers = Headers::new();
        headers.insert("X-Id".into(), "7".into());
        let value = headers_object(&headers);
        assert_eq!(value.describe(), r#"{"X-Id":"7"}"#);
    }

    #[test]
    fn test_object_helper() {
        let value = object(vec![("a", Value::Number(1.0))]);
        let map: IndexMap<String, Value> = match value {
            Value::Object(map) => map.borrow().clone(),
            _ => unreachable!(),
        };
        assert!(map.contains_key("a"));
    }
}
