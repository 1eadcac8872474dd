//! Tree-walking evaluator
//!
//! Every statement and expression costs one step; a run that exceeds the step
//! budget or the call depth limit is aborted with [`ScriptError::Limit`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::*;
use super::builtins;
use super::context::{ScriptMode, VariableScopes};
use super::test_engine::TestResult;
use super::value::{Closure, Value};
use super::ScriptError;
use crate::http::{HttpRequest, HttpResponse};

/// Evaluation budget for one script run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Longest string a script may build
    pub max_string_bytes: usize,
    pub max_array_len: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_call_depth: 32,
            max_string_bytes: 8 * 1024 * 1024,
            max_array_len: 1_000_000,
        }
    }
}

impl ScriptLimits {
    pub(super) fn check_string_len(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.max_string_bytes {
            return Err(ScriptError::Limit(format!(
                "Invalid string length: exceeds {} bytes",
                self.max_string_bytes
            )));
        }
        Ok(())
    }

    pub(super) fn check_array_len(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.max_array_len {
            return Err(ScriptError::Limit(format!(
                "Invalid array length: exceeds {} elements",
                self.max_array_len
            )));
        }
        Ok(())
    }

    /// Reject strings and arrays past the allocation limits
    pub(super) fn check_size(&self, value: Value) -> Result<Value, ScriptError> {
        match &value {
            Value::Str(s) => self.check_string_len(s.len())?,
            Value::Array(items) => self.check_array_len(items.borrow().len())?,
            _ => {}
        }
        Ok(value)
    }
}

/// Host-side state a script reads and writes through `pm`
#[derive(Debug, Default)]
pub struct SandboxState {
    pub mode: Option<ScriptMode>,
    /// Shadow copy that `pm.request.update()` writes to
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub response_time_ms: f64,
    pub variables: VariableScopes,
    pub logs: Vec<String>,
    pub tests: Vec<TestResult>,
}

impl SandboxState {
    pub fn mode(&self) -> ScriptMode {
        self.mode.unwrap_or(ScriptMode::PreRequest)
    }
}

#[derive(Debug)]
struct Binding {
    value: Value,
    constant: bool,
}

/// Lexical scope
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub(super) fn define(&self, name: &str, value: Value, constant: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, constant });
    }

    fn declare(&self, name: &str, value: Value, constant: bool) -> Result<(), ScriptError> {
        if let Some(existing) = self.vars.borrow().get(name) {
            if existing.constant {
                return Err(ScriptError::Type(format!(
                    "Identifier '{}' has already been declared",
                    name
                )));
            }
        }
        self.define(name, value, constant);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if binding.constant {
                return Err(ScriptError::Type("Assignment to constant variable.".into()));
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(ScriptError::Reference(format!("{} is not defined", name))),
        }
    }

    fn clear(&self) {
        self.vars.borrow_mut().clear();
    }
}

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    pub(super) state: SandboxState,
    globals: Rc<Scope>,
    /// Scopes captured by closures, cleared on drop to break cycles
    captured: Vec<Rc<Scope>>,
    limits: ScriptLimits,
    steps: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(state: SandboxState, limits: ScriptLimits) -> Self {
        let globals = Rc::new(Scope::default());
        builtins::install_globals(&globals, &state);
        Self {
            state,
            globals,
            captured: Vec::new(),
            limits,
            steps: 0,
            depth: 0,
        }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        let scope = Rc::clone(&self.globals);
        match self.exec_block(program, &scope)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
        }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    pub fn state(&self) -> &SandboxState {
        &self.state
    }

    pub fn take_state(&mut self) -> SandboxState {
        std::mem::take(&mut self.state)
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::Limit(format!(
                "Script exceeded the limit of {} evaluation steps",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    // Statements

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, ScriptError> {
        // Function declarations are visible to the whole block
        for stmt in stmts {
            if let Stmt::Function { name, def } = stmt {
                let closure = self.make_closure(def, scope);
                scope.declare(name, closure, false)?;
            }
        }
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(stmt, scope)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Declare { bindings, constant } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    scope.declare(name, value, *constant)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then, otherwise } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec_nested(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_nested(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => {
                let inner = Scope::child(scope);
                self.exec_block(body, &inner)
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(ScriptError::Thrown(thrown_message(&value)))
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            // Hoisted by exec_block
            Stmt::Function { .. } | Stmt::Empty => Ok(Flow::Normal),
        }
    }

    /// Branch of an `if`: a lone statement gets its own scope like a block
    fn exec_nested(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Block(_) => self.exec_stmt(stmt, scope),
            other => {
                let inner = Scope::child(scope);
                self.exec_block(std::slice::from_ref(other), &inner)
            }
        }
    }

    // Expressions

    pub(super) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr, scope)?.to_display()),
                    }
                    self.limits.check_string_len(out.len())?;
                }
                Ok(Value::Str(out))
            }
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| ScriptError::Reference(format!("{} is not defined", name))),
            Expr::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Element::Item(expr) => items.push(self.eval(expr, scope)?),
                        Element::Spread(expr) => {
                            let value = self.eval(expr, scope)?;
                            items.extend(spread_items(&value)?);
                        }
                    }
                    self.limits.check_array_len(items.len())?;
                }
                Ok(Value::array(items))
            }
            Expr::Object(props) => {
                let mut map = IndexMap::with_capacity(props.len());
                for prop in props {
                    match prop {
                        Property::Pair(key, expr) => {
                            let value = self.eval(expr, scope)?;
                            map.insert(key.clone(), value);
                        }
                        Property::Spread(expr) => match self.eval(expr, scope)? {
                            Value::Object(other) => {
                                for (k, v) in other.borrow().iter() {
                                    map.insert(k.clone(), v.clone());
                                }
                            }
                            Value::Array(items) => {
                                for (i, v) in items.borrow().iter().enumerate() {
                                    map.insert(i.to_string(), v.clone());
                                }
                            }
                            _ => {}
                        },
                    }
                }
                Ok(Value::object(map))
            }
            Expr::Member { object, property, optional } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                self.get_index(&target, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, scope),
            Expr::Unary { op, operand } => {
                if *op == UnaryOp::TypeOf {
                    // typeof on an undeclared name is not an error
                    if let Expr::Ident(name) = operand.as_ref() {
                        if scope.lookup(name).is_none() {
                            return Ok(Value::str("undefined"));
                        }
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.limits.check_size(binary(*op, &left, &right)?)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional { cond, then, otherwise } => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { target, op, value } => self.eval_assign(target, *op, value, scope),
            Expr::Function(def) => Ok(self.make_closure(def, scope)),
        }
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Value {
        if !self.captured.iter().any(|s| Rc::ptr_eq(s, scope)) {
            self.captured.push(Rc::clone(scope));
        }
        Value::Function(Rc::new(Closure {
            def: Rc::clone(def),
            scope: Rc::clone(scope),
        }))
    }

    fn eval_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<Value, ScriptError> {
        let rhs = self.eval(value, scope)?;
        let new_value = match op {
            AssignOp::Set => rhs,
            AssignOp::Add | AssignOp::Sub => {
                let current = self.eval(target, scope)?;
                let bin = if op == AssignOp::Add { BinaryOp::Add } else { BinaryOp::Sub };
                self.limits.check_size(binary(bin, &current, &rhs)?)?
            }
        };

        match target {
            Expr::Ident(name) => scope.assign(name, new_value.clone())?,
            Expr::Member { object, property, .. } => {
                let object = self.eval(object, scope)?;
                set_property(&object, property, new_value.clone())?;
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                match (&object, &key) {
                    (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                        let idx = *n as usize;
                        let mut items = items.borrow_mut();
                        if idx > items.len() + 1024 {
                            return Err(ScriptError::Type(format!("Array index {} is out of range", idx)));
                        }
                        if idx >= items.len() {
                            items.resize(idx + 1, Value::Undefined);
                        }
                        items[idx] = new_value.clone();
                    }
                    _ => set_property(&object, &key.to_display(), new_value.clone())?,
                }
            }
            _ => return Err(ScriptError::Type("Invalid assignment target".into())),
        }
        Ok(new_value)
    }

    pub(super) fn get_property(&mut self, target: &Value, name: &str) -> Result<Value, ScriptError> {
        match target {
            Value::Undefined | Value::Null => Err(ScriptError::Type(format!(
                "Cannot read properties of {} (reading '{}')",
                target.to_display(),
                name
            ))),
            Value::Str(s) => Ok(match name {
                "length" => Value::Number(s.chars().count() as f64),
                _ => Value::Undefined,
            }),
            Value::Array(items) => {
                let items = items.borrow();
                Ok(match name {
                    "length" => Value::Number(items.len() as f64),
                    _ => name
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Undefined),
                })
            }
            Value::Object(map) => Ok(map.borrow().get(name).cloned().unwrap_or(Value::Undefined)),
            Value::Expectation(expectation) => self.expectation_property(expectation, name),
            _ => Ok(Value::Undefined),
        }
    }

    fn get_index(&mut self, target: &Value, key: &Value) -> Result<Value, ScriptError> {
        match (target, key) {
            (Value::Array(items), Value::Number(n)) => Ok(if *n >= 0.0 && n.fract() == 0.0 {
                items.borrow().get(*n as usize).cloned().unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }),
            (Value::Str(s), Value::Number(n)) => Ok(if *n >= 0.0 && n.fract() == 0.0 {
                s.chars()
                    .nth(*n as usize)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }),
            _ => self.get_property(target, &key.to_display()),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &Rc<Scope>) -> Result<Value, ScriptError> {
        if let Expr::Member { object, property, optional } = callee {
            let receiver = self.eval(object, scope)?;
            if *optional && receiver.is_nullish() {
                return Ok(Value::Undefined);
            }
            let args = self.eval_args(args, scope)?;
            return match &receiver {
                Value::Str(s) => builtins::string_method(s, property, &args, &self.limits)
                    .unwrap_or_else(|| Err(not_a_function(callee))),
                Value::Array(items) => {
                    let items = Rc::clone(items);
                    match self.array_method(&items, property, &args) {
                        Some(result) => result,
                        None => Err(not_a_function(callee)),
                    }
                }
                Value::Number(n) => builtins::number_method(*n, property, &args)
                    .unwrap_or_else(|| Err(not_a_function(callee))),
                _ => {
                    let function = self.get_property(&receiver, property)?;
                    self.call_as(&function, args, callee)
                }
            };
        }

        let function = self.eval(callee, scope)?;
        let args = self.eval_args(args, scope)?;
        self.call_as(&function, args, callee)
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, ScriptError> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    fn call_as(&mut self, function: &Value, args: Vec<Value>, callee: &Expr) -> Result<Value, ScriptError> {
        match function {
            Value::Function(_) | Value::Native(_) => self.call_value(function, args),
            _ => Err(not_a_function(callee)),
        }
    }

    pub(super) fn call_value(&mut self, function: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        match function {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(builtin) => {
                let value = self.call_builtin(builtin, args)?;
                self.limits.check_size(value)
            }
            other => Err(ScriptError::Type(format!("{} is not a function", other.describe()))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, ScriptError> {
        if self.depth >= self.limits.max_call_depth {
            return Err(ScriptError::Limit("Maximum call stack size exceeded".into()));
        }
        self.depth += 1;

        let scope = Scope::child(&closure.scope);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            scope.define(param, args.next().unwrap_or(Value::Undefined), false);
        }

        let result = match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => self.exec_block(body, &scope).map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal => Value::Undefined,
            }),
        };

        self.depth -= 1;
        result
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        for scope in self.captured.drain(..) {
            scope.clear();
        }
        self.globals.clear();
    }
}

fn not_a_function(callee: &Expr) -> ScriptError {
    ScriptError::Type(format!("{} is not a function", callee_name(callee)))
}

/// Dotted source form of a callee for error messages
fn callee_name(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", callee_name(object), property),
        Expr::Index { object, .. } => format!("{}[...]", callee_name(object)),
        Expr::Call { callee, .. } => format!("{}(...)", callee_name(callee)),
        _ => "expression".into(),
    }
}

/// Message carried by a thrown value: `message` of error objects, text otherwise
fn thrown_message(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(message) = map.borrow().get("message") {
            return message.to_display();
        }
    }
    value.describe()
}

fn spread_items(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(ScriptError::Type(format!("{} is not iterable", other.describe()))),
    }
}

fn set_property(target: &Value, name: &str, value: Value) -> Result<(), ScriptError> {
    match target {
        Value::Object(map) => {
            map.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(ScriptError::Type(format!(
            "Cannot set properties of {} (setting '{}')",
            target.to_display(),
            name
        ))),
        // Writes to primitives are silently ignored
        _ => Ok(()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    use BinaryOp::*;
    Ok(match op {
        Add => {
            let is_textual = |v: &Value| matches!(v, Value::Str(_) | Value::Array(_) | Value::Object(_));
            if is_textual(left) || is_textual(right) {
                Value::Str(format!("{}{}", left.to_display(), right.to_display()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        Sub => Value::Number(left.to_number() - right.to_number()),
        Mul => Value::Number(left.to_number() * right.to_number()),
        Div => Value::Number(left.to_number() / right.to_number()),
        Rem => Value::Number(left.to_number() % right.to_number()),
        Eq => Value::Bool(left.loose_equals(right)),
        NotEq => Value::Bool(!left.loose_equals(right)),
        StrictEq => Value::Bool(left.strict_equals(right)),
        StrictNotEq => Value::Bool(!left.strict_equals(right)),
        Lt | Gt | LtEq | GtEq => Value::Bool(compare(op, left, right)),
        In => {
            let key = left.to_display();
            match right {
                Value::Object(map) => Value::Bool(map.borrow().contains_key(&key)),
                Value::Array(items) => Value::Bool(
                    key == "length" || key.parse::<usize>().is_ok_and(|i| i < items.borrow().len()),
                ),
                other => {
                    return Err(ScriptError::Type(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        other.describe()
                    )))
                }
            }
        }
    })
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::LtEq => a <= b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::LtEq => a <= b,
        _ => a >= b,
    }
}
