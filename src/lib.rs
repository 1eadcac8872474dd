//! pulsechain library interface
//!
//! The request-execution engine behind an API client: it sends requests,
//! caches responses, retries failures, chains requests with data flowing
//! between them and runs sandboxed scripts and tests.
//!
//! # Module Organization
//!
//! - [`cache`] - Two-tier TTL response cache (ResponseCache, FileStore)
//! - [`retry`] - Bounded retry with backoff (retry, RetryOptions)
//! - [`client`] - Request execution (RequestExecutor, Transport)
//! - [`scripting`] - Script sandbox and test engine
//! - [`pipeline`] - Request chains (ChainExecutor, load_chain)
//! - [`errors`] - Error types (PulsechainError, Result)
//! - [`config`] - Config file handling
//! - [`logging`] - tracing subscriber setup for the binary

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod scripting;

pub use errors::{PulsechainError, Result};
