//! Defensive headers and basic request-shape validation for the HTTP
//! router. The persistent channel carries its own message framing and
//! does not route through this layer.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

pub async fn security_headers_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    validate_request_shape(&request)?;
    let mut response = next.run(request).await;
    add_security_headers(&mut response);
    Ok(response)
}

fn validate_request_shape(request: &Request) -> Result<(), StatusCode> {
    let uri = request.uri();
    let path = uri.path();
    let query = uri.query().unwrap_or("");

    if contains_path_traversal(path) || contains_path_traversal(query) {
        warn!(path, query, "rejected path-traversal attempt");
        return Err(StatusCode::BAD_REQUEST);
    }

    for (name, value) in request.headers().iter() {
        if value.len() > 8192 {
            warn!(header = %name, size = value.len(), "rejected oversized header");
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    Ok(())
}

fn contains_path_traversal(input: &str) -> bool {
    const PATTERNS: &[&str] = &["../", "..\\", "..%2f", "..%5c", "%2e%2e%2f", "%2e%2e%5c", "/proc/", "/sys/", "%00"];
    let lower = input.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

fn add_security_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_path_traversal() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("%2e%2e%2fconfig"));
        assert!(!contains_path_traversal("normal/path"));
    }
}
