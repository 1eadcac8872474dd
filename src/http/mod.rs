//! HTTP request and response records
//!
//! The values that flow between the executor, the chain runner, the cache and
//! the script sandbox.

mod message;
mod method;

pub use message::{canonical_reason, Headers, HttpRequest, HttpResponse};
pub use method::*;
