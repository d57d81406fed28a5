//! Request-id stamping and structured request/response logging, applied
//! to the HTTP router only — the persistent channel is message-typed and
//! has no request/response cycle to wrap.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;

pub async fn request_logging_middleware(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = extract_client_ip(request.headers());
    let request_id = Uuid::new_v4();

    request
        .headers_mut()
        .insert(HeaderName::from_static("x-request-id"), request_id.to_string().parse().unwrap());

    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.metrics.record_http_request();

    if status.is_server_error() {
        error!(request_id = %request_id, %method, %uri, client_ip, %status, duration_ms = duration.as_millis(), "request failed");
    } else if status.is_client_error() {
        warn!(request_id = %request_id, %method, %uri, client_ip, %status, duration_ms = duration.as_millis(), "request rejected");
    } else {
        info!(request_id = %request_id, %method, %uri, client_ip, %status, duration_ms = duration.as_millis(), "request completed");
    }

    response
}

fn extract_client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(s) = forwarded_for.to_str() {
            if let Some(first) = s.split(',').next() {
                return first.trim().to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(s) = real_ip.to_str() {
            return s.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_forwarded_for_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "192.168.1.1, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "192.168.1.1");
    }

    #[test]
    fn falls_back_to_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), "unknown");
    }
}
