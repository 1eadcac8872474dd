//! HTTP method constants and validation

/// HTTP GET method
pub const GET: &str = "GET";

/// HTTP POST method
pub const POST: &str = "POST";

/// HTTP PUT method
pub const PUT: &str = "PUT";

/// HTTP PATCH method
pub const PATCH: &str = "PATCH";

/// HTTP DELETE method
pub const DELETE: &str = "DELETE";

/// HTTP HEAD method
pub const HEAD: &str = "HEAD";

/// HTTP OPTIONS method
pub const OPTIONS: &str = "OPTIONS";

/// All standard HTTP methods
pub const STANDARD_METHODS: &[&str] = &[GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS];

/// Check if a string is a standard HTTP method
pub fn is_standard(method: &str) -> bool {
    STANDARD_METHODS.iter().any(|&m| m.eq_ignore_ascii_case(method))
}

/// Check that a method is a valid RFC 7230 token (custom methods are allowed)
pub fn is_valid_token(method: &str) -> bool {
    !method.is_empty()
        && method.len() <= 32
        && method.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Normalize a method for comparison and cache keys
pub fn normalize(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_standard() {
        assert!(is_standard("GET"));
        assert!(is_standard("get"));
        assert!(is_standard("Post"));
        assert!(!is_standard("INVALID"));
    }

    #[test]
    fn test_token_validation() {
        assert!(is_valid_token("GET"));
        assert!(is_valid_token("PROPFIND"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("GE T"));
        assert!(!is_valid_token("GET\n"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" get "), "GET");
    }
}
