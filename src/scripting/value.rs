//! Runtime values

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::ast::FunctionDef;
use super::builtins::{Builtin, Expectation};
use super::interpreter::Scope;
use super::ScriptError;

/// Nodes one JSON conversion may visit
pub const MAX_JSON_NODES: usize = 100_000;

/// Text one JSON or display rendering may produce
pub const MAX_RENDERED_BYTES: usize = 16 * 1024 * 1024;

/// Container nesting a conversion follows
const MAX_NESTING: usize = 256;

pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Builtin),
    /// Chain returned by `pm.expect`
    Expectation(Rc<Expectation>),
}

/// User function with the scope it was defined in
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Rc<Scope>,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The scope may reach back to this closure
        f.debug_struct("Closure")
            .field("params", &self.def.params)
            .finish_non_exhaustive()
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON form. `None` for values JSON cannot hold (undefined, functions).
    ///
    /// Lossy: circular or oversized structures also give `None`.
    pub fn to_json(&self) -> Option<JsonValue> {
        self.try_to_json().ok().flatten()
    }

    /// `JSON.stringify` conversion. Fails on a reference cycle and once the
    /// walk passes [`MAX_JSON_NODES`] nodes or [`MAX_RENDERED_BYTES`] of text.
    pub fn try_to_json(&self) -> Result<Option<JsonValue>, ScriptError> {
        self.json_node(&mut Walk::default())
    }

    fn json_node(&self, walk: &mut Walk) -> Result<Option<JsonValue>, ScriptError> {
        walk.nodes += 1;
        if walk.nodes > MAX_JSON_NODES {
            return Err(ScriptError::Limit(format!(
                "Value has more than {} nodes and cannot be converted to JSON",
                MAX_JSON_NODES
            )));
        }
        Ok(match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) | Value::Expectation(_) => None,
            Value::Null => Some(JsonValue::Null),
            Value::Bool(b) => Some(JsonValue::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::Str(s) => {
                walk.charge(s.len())?;
                Some(JsonValue::String(s.clone()))
            }
            Value::Array(items) => {
                walk.enter(Rc::as_ptr(items) as *const ())?;
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.json_node(walk)?.unwrap_or(JsonValue::Null));
                }
                walk.path.pop();
                Some(JsonValue::Array(out))
            }
            Value::Object(map) => {
                walk.enter(Rc::as_ptr(map) as *const ())?;
                let mut out = serde_json::Map::new();
                for (key, item) in map.borrow().iter() {
                    if let Some(json) = item.json_node(walk)? {
                        walk.charge(key.len())?;
                        out.insert(key.clone(), json);
                    }
                }
                walk.path.pop();
                Some(JsonValue::Object(out))
            }
        })
    }

    /// `typeof`, except that arrays and null get their own names
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) | Value::Expectation(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Null | Value::Array(_) => "object",
            other => other.type_name(),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `String(value)`
    pub fn to_display(&self) -> String {
        let mut out = String::new();
        self.write_display(&mut out, &mut Vec::new());
        out
    }

    /// `String(value)` for an element of `parent`, which renders empty if reached again
    pub fn to_display_within(&self, parent: &ArrayRef) -> String {
        let mut out = String::new();
        self.write_display(&mut out, &mut vec![Rc::as_ptr(parent) as *const ()]);
        out
    }

    fn write_display(&self, out: &mut String, path: &mut Vec<*const ()>) {
        match self {
            Value::Undefined => out.push_str("undefined"),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&format_number(*n)),
            Value::Str(s) => out.push_str(s),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                // Arrays already on the path render empty, as in JavaScript
                if path.contains(&ptr) || path.len() >= MAX_NESTING {
                    return;
                }
                path.push(ptr);
                for (i, item) in items.borrow().iter().enumerate() {
                    if out.len() > MAX_RENDERED_BYTES {
                        break;
                    }
                    if i > 0 {
                        out.push(',');
                    }
                    if !item.is_nullish() {
                        item.write_display(out, path);
                    }
                }
                path.pop();
            }
            Value::Object(_) | Value::Expectation(_) => out.push_str("[object Object]"),
            Value::Function(_) | Value::Native(_) => out.push_str("function"),
        }
    }

    /// Readable form for messages: JSON for containers, display otherwise
    pub fn describe(&self) -> String {
        match self {
            Value::Array(_) | Value::Object(_) => self
                .to_json()
                .map(|j| j.to_string())
                .unwrap_or_else(|| self.to_display()),
            Value::Str(s) => s.clone(),
            other => other.to_display(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!((self, other), (Value::Object(_), _) | (_, Value::Object(_))) {
                    return false;
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structural equality, used by `eql`
    pub fn deep_equals(&self, other: &Value) -> bool {
        match (self.to_json(), other.to_json()) {
            (Some(a), Some(b)) => a == b,
            _ => self.strict_equals(other),
        }
    }
}

/// Containers on the current conversion path plus running totals
#[derive(Default)]
struct Walk {
    path: Vec<*const ()>,
    nodes: usize,
    bytes: usize,
}

impl Walk {
    fn enter(&mut self, ptr: *const ()) -> Result<(), ScriptError> {
        if self.path.contains(&ptr) {
            return Err(ScriptError::Type("Converting circular structure to JSON".into()));
        }
        if self.path.len() >= MAX_NESTING {
            return Err(ScriptError::Limit(format!(
                "Value is nested more than {} levels deep",
                MAX_NESTING
            )));
        }
        self.path.push(ptr);
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ScriptError> {
        self.bytes += bytes;
        if self.bytes > MAX_RENDERED_BYTES {
            return Err(ScriptError::Limit(format!(
                "Value is larger than {} bytes when converted to JSON",
                MAX_RENDERED_BYTES
            )));
        }
        Ok(())
    }
}

/// JavaScript-style number formatting: integers without a fraction
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if !n.is_finite() {
        JsonValue::Null
    } else if n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}
