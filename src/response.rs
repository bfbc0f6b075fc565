use crate::error::ErrorResponse;
use crate::rate_limiter::Decision;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use humantime_serde::re::humantime;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const CLIENT_ID: HeaderName = HeaderName::from_static("client-id");

/// RFC 3339 timestamp, seconds precision, UTC.
pub fn format_reset_at(reset_at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(reset_at).to_string()
}

impl Decision {
    /// Attach quota metadata. `Retry-After` is only sent on rejection.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.capacity));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));

        if let Ok(reset) = HeaderValue::from_str(&format_reset_at(self.reset_at)) {
            headers.insert(X_RATELIMIT_RESET, reset);
        }

        match HeaderValue::from_str(self.identity.as_str()) {
            Ok(client_id) => {
                headers.insert(CLIENT_ID, client_id);
            }
            Err(_) => {
                tracing::warn!("Client identity is not a valid header value; omitting Client-Id");
            }
        }

        if !self.admitted {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        }
    }

    pub fn rejection_body(&self) -> ErrorResponse {
        ErrorResponse::new(
            "rate_limit_exceeded",
            &format!(
                "You can make another request after {}",
                format_reset_at(self.reset_at)
            ),
            429,
        )
    }
}

/// 429 with the quota headers and a JSON body naming the reset time.
pub fn rejection_response(decision: &Decision) -> Response {
    let mut response = decision.rejection_body().into_response();
    decision.apply_headers(response.headers_mut());
    response
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub stores: Vec<StoreStatus>,
}

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub name: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn new(stores: Vec<StoreStatus>) -> Self {
        let status = if stores.iter().all(|store| store.error.is_none()) {
            "healthy"
        } else {
            "unhealthy"
        };

        Self {
            status: status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stores,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClientIdentity;
    use axum::http::StatusCode;
    use std::time::Duration;

    fn decision(admitted: bool) -> Decision {
        Decision {
            admitted,
            identity: ClientIdentity::from("127.0.0.1"),
            capacity: 5,
            total_after_charge: if admitted { 3 } else { 6 },
            remaining: if admitted { 2 } else { 0 },
            reset_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            retry_after_secs: 42,
            degraded: false,
        }
    }

    #[test]
    fn test_format_reset_at() {
        let reset = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(format_reset_at(reset), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_admitted_headers_omit_retry_after() {
        let mut headers = HeaderMap::new();
        decision(true).apply_headers(&mut headers);

        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "2");
        assert_eq!(headers[X_RATELIMIT_RESET], "2023-11-14T22:13:20Z");
        assert_eq!(headers[CLIENT_ID], "127.0.0.1");
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_rejection_response() {
        let response = rejection_response(&decision(false));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

        let body = decision(false).rejection_body();
        assert_eq!(body.error, "rate_limit_exceeded");
        assert!(body.description.contains("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_health_response_status() {
        let healthy = HealthResponse::new(vec![StoreStatus {
            name: "public".into(),
            status: "healthy".into(),
            response_time_ms: 1,
            error: None,
        }]);
        assert!(healthy.is_healthy());

        let unhealthy = HealthResponse::new(vec![StoreStatus {
            name: "private".into(),
            status: "unavailable".into(),
            response_time_ms: 1,
            error: Some("connection refused".into()),
        }]);
        assert!(!unhealthy.is_healthy());
    }
}
