//! HTTP client functionality

pub mod executor;
pub mod metrics;
pub mod security;
pub mod transport;

// Re-exports
pub use executor::{RequestExecutor, DEFAULT_TIMEOUT};
pub use metrics::{Metric, PerformanceMonitor};
pub use security::{is_local_host, SecurityValidator, SecurityVerdict, UrlSecurityPolicy};
pub use transport::{ReqwestTransport, Transport, USER_AGENT_STRING};
