//! Script sandbox for pulsechain
//!
//! Pre-request, post-request and test scripts are written in a small
//! JavaScript-like language. Source is tokenized by [`lexer`], parsed into the
//! [`ast`] by [`parser`] and evaluated by the tree-walking [`interpreter`].
//!
//! Scripts only see what [`builtins`] installs: the `pm` object, `console`,
//! `JSON` and a short list of value helpers. There is no module system, no
//! filesystem, no timers and no loops. Every run is bounded by a step budget
//! and a call depth limit.
//!
//! - [`ScriptSandbox`] runs pre/post-request scripts and returns a [`ScriptOutcome`]
//! - [`TestEngine`] runs test scripts and returns [`TestResult`]s

pub mod ast;
pub mod builtins;
pub mod context;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod sandbox;
pub mod test_engine;
pub mod value;

pub use context::{ScriptContext, ScriptMode, VarScope, VariableMap, VariableScopes};
pub use interpreter::ScriptLimits;
pub use sandbox::{ScriptOutcome, ScriptSandbox};
pub use test_engine::{TestEngine, TestResult, TEST_EXECUTION_ERROR};

use thiserror::Error;

/// Failure raised while parsing or running a script
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    /// Value thrown by the script itself
    #[error("{0}")]
    Thrown(String),

    #[error("AssertionError: {0}")]
    Assertion(String),

    /// Step budget or call depth exhausted
    #[error("{0}")]
    Limit(String),
}

impl ScriptError {
    /// Message as reported in outcomes and test results
    pub fn message(&self) -> String {
        match self {
            ScriptError::Assertion(msg) | ScriptError::Thrown(msg) | ScriptError::Limit(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_limit(&self) -> bool {
        matches!(self, ScriptError::Limit(_))
    }
}

impl From<ScriptError> for crate::errors::PulsechainError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Assertion(msg) => crate::errors::PulsechainError::Assertion(msg),
            other => crate::errors::PulsechainError::Script(other.message()),
        }
    }
}
