//! Wire transport
//!
//! The executor never talks to reqwest directly; it goes through [`Transport`]
//! so tests and embedders can swap the network out.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use url::Url;

use super::security::is_local_host;
use crate::errors::{PulsechainError, Result};
use crate::http::{canonical_reason, Headers, HttpRequest, HttpResponse};

pub const USER_AGENT_STRING: &str = concat!("pulsechain/", env!("CARGO_PKG_VERSION"));

/// Shown when a local server refuses the connection
pub const LOCAL_SERVER_HINT: &str = "Make sure the mock server is running and the route is configured.";

/// Sends one request and returns whatever the server answered
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT_STRING)
            .build()
            .map_err(|e| PulsechainError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn build_headers(headers: &Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| PulsechainError::Validation(format!("Invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| PulsechainError::Validation(format!("Invalid value for header '{}'", name)))?;
        map.append(name, value);
    }
    Ok(map)
}

fn map_send_error(url: &str, error: reqwest::Error) -> PulsechainError {
    if error.is_connect() {
        let local = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(is_local_host))
            .unwrap_or(false);
        PulsechainError::ConnectionRefused {
            url: url.to_string(),
            hint: local.then(|| LOCAL_SERVER_HINT.to_string()),
        }
    } else {
        PulsechainError::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| PulsechainError::Validation(format!("Invalid HTTP method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(build_headers(&request.headers)?);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(&request.url, e))?;

        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        let body = response
            .text()
            .await
            .map_err(|e| PulsechainError::Network(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status
                .canonical_reason()
                .unwrap_or_else(|| canonical_reason(status.as_u16()))
                .to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers_rejects_bad_names() {
        let mut headers = Headers::new();
        headers.insert("X-Ok".into(), "1".into());
        assert_eq!(build_headers(&headers).unwrap().len(), 1);

        headers.insert("bad name".into(), "1".into());
        assert!(build_headers(&headers).is_err());
    }
}
