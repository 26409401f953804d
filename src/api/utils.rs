//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from
//! services.rs so they can be unit tested.

use axum::http::{HeaderMap, header};

use crate::api::error::ApiError;

/// Header carrying the authenticated user name
pub const USER_HEADER: &str = "X-Folio-User";

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// User named by the request, `None` for anonymous requests
pub fn request_user(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(USER_HEADER) else {
        return Ok(None);
    };
    let user = value
        .to_str()
        .map_err(|_| ApiError::InvalidPayload(format!("{USER_HEADER} must be visible ASCII")))?
        .trim();
    Ok((!user.is_empty()).then(|| user.to_owned()))
}

/// Whether an `If-None-Match` header already names `etag`
pub fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag || candidate.strip_prefix("W/") == Some(etag))
}

/// Query flags arrive as `1`/`0` or `true`/`false`
pub fn truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_validate_body_size_ok() {
        let data = vec![0u8; 1000];
        assert!(validate_body_size(&data, 1000).is_ok());
        assert!(validate_body_size(&data, 2000).is_ok());
        assert!(validate_body_size(&[], 100).is_ok());
    }

    #[test]
    fn test_validate_body_size_too_large() {
        let data = vec![0u8; 1000];
        match validate_body_size(&data, 999) {
            Err(ApiError::PayloadTooLarge(size)) => assert_eq!(size, 1000),
            _ => panic!("Expected PayloadTooLarge error"),
        }
    }

    #[test]
    fn test_request_user() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_user(&headers).unwrap(), None);

        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(request_user(&headers).unwrap(), None);

        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(request_user(&headers).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_etag_matches() {
        let etag = "\"abc\"";
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"zzz\", \"abc\""));
        assert!(etag_matches(&headers, etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("W/\"abc\""));
        assert!(etag_matches(&headers, etag));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"zzz\""));
        assert!(!etag_matches(&headers, etag));
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(Some("1")));
        assert!(truthy(Some("True")));
        assert!(!truthy(Some("0")));
        assert!(!truthy(Some("")));
        assert!(!truthy(None));
    }
}
