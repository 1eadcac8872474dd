//! Request chaining
//!
//! A chain is an ordered list of [`ChainStep`]s sharing one variable pool.
//! Values extracted from one response are available to every later step
//! through `{{name}}` templates.

pub mod chain;
pub mod condition;
pub mod extract;
pub mod report;
pub mod runner;
pub mod template;

pub use chain::{
    load_chain, ChainDefinition, ChainStep, Condition, ConditionKind, DataExtractor, ExtractSource,
};
pub use report::{render_report, ChainSummary, ReportFormat};
pub use runner::{ChainExecutionResult, ChainExecutor, ChainOptions, FailurePolicy};

/// Process exit code when a chain step or test failed
pub const EXIT_CHAIN_FAILED: i32 = 10;
