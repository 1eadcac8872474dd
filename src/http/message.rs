//! Request and response values

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::method;
use crate::errors::{PulsechainError, Result};

/// Ordered header map. Names keep the case they were given.
pub type Headers = IndexMap<String, String>;

/// One HTTP request. Built once per call and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpRequest {
    /// Create a request, rejecting methods that are not valid HTTP tokens.
    pub fn new(method: &str, url: impl Into<String>) -> Result<Self> {
        let normalized = method::normalize(method);
        if !method::is_valid_token(&normalized) {
            return Err(PulsechainError::Validation(format!(
                "Invalid HTTP method '{}'",
                method
            )));
        }
        Ok(Self {
            method: normalized,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        })
    }

    /// Shorthand for a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: method::GET.to_string(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case(method::GET)
    }

    /// Body parsed as JSON, or the raw text as a JSON string
    pub fn body_value(&self) -> JsonValue {
        match &self.body {
            Some(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| JsonValue::String(text.clone())),
            None => JsonValue::Null,
        }
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::get("")
    }
}

/// One HTTP response as received from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Check if status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if status is client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if status is server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Get a header value, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<JsonValue> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Reason phrase for common status codes
pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validates_method() {
        let req = HttpRequest::new("post", "https://api.example.com/users").unwrap();
        assert_eq!(req.method, "POST");
        assert!(HttpRequest::new("NOT A METHOD", "https://api.example.com").is_err());
    }

    #[test]
    fn test_request_body_value() {
        let req = HttpRequest::get("http://x").with_body(r#"{"name":"test"}"#);
        assert_eq!(req.body_value()["name"], "test");

        let req = HttpRequest::get("http://x").with_body("plain");
        assert_eq!(req.body_value(), JsonValue::String("plain".into()));
    }

    #[test]
    fn test_response_helpers() {
        let mut resp = HttpResponse::new(200, r#"{"id": 1}"#);
        resp.headers.insert("Content-Type".into(), "application/json".into());

        assert!(resp.is_success());
        assert!(!resp.is_client_error());
        assert_eq!(resp.status_text, "OK");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.json().unwrap()["id"], 1);
        assert!(HttpResponse::new(502, "").is_server_error());
    }

    #[test]
    fn test_response_serde_round_trip_keeps_header_order() {
        let mut resp = HttpResponse::new(404, "missing");
        resp.headers.insert("b".into(), "2".into());
        resp.headers.insert("a".into(), "1".into());

        let text = serde_json::to_string(&resp).unwrap();
        let back: HttpResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back, resp);
        assert_eq!(back.headers.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
