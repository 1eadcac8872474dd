//! Cache key construction
//!
//! Response keys and collection keys live in separate namespaces so that an
//! aggregate can never shadow a response.

use crate::http::{self, HttpRequest};

pub const RESPONSE_PREFIX: &str = "response:";
pub const COLLECTION_PREFIX: &str = "collection:";

/// Key for a response: `response:{METHOD}:{URL}:{BODY}`.
///
/// Headers are not part of the key.
pub fn request_key(method: &str, url: &str, body: Option<&str>) -> String {
    format!(
        "{}{}:{}:{}",
        RESPONSE_PREFIX,
        http::normalize(method),
        url,
        body.unwrap_or("")
    )
}

/// Key for a request value
pub fn key_for(request: &HttpRequest) -> String {
    request_key(&request.method, &request.url, request.body.as_deref())
}

/// Key for a cached collection
pub fn collection_key(collection_id: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, collection_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_format() {
        assert_eq!(
            request_key("get", "https://api.example.com/users", None),
            "response:GET:https://api.example.com/users:"
        );
        assert_eq!(
            request_key("POST", "http://x/y", Some("{\"a\":1}")),
            "response:POST:http://x/y:{\"a\":1}"
        );
    }

    #[test]
    fn test_headers_do_not_change_key() {
        let a = HttpRequest::get("http://x/y");
        let b = HttpRequest::get("http://x/y").with_header("Accept", "text/plain");
        assert_eq!(key_for(&a), key_for(&b));
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        assert!(!collection_key("response").starts_with(RESPONSE_PREFIX));
    }
}
