use crate::error::ErrorResponse;
use crate::rate_limiter::CostedLimit;
use crate::response::rejection_response;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Admission check for one route.
///
/// ```ignore
/// let app = Router::new()
///     .route("/public", get(handler))
///     .route_layer(middleware::from_fn_with_state(limiter.limit(1), enforce_rate_limit));
/// ```
///
/// Quota headers are attached to admitted and rejected responses alike.
/// Evaluation errors short-circuit with the error's status and JSON body.
pub async fn enforce_rate_limit(
    State(limit): State<CostedLimit>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let decision = match limit.limiter().evaluate(&parts, limit.cost()).await {
        Ok(decision) => decision,
        Err(err) => return err.into_response(),
    };

    if !decision.admitted {
        info!(
            target: "quota_throttler::middleware",
            identity = %decision.identity,
            uri = %parts.uri,
            total = decision.total_after_charge,
            retry_after = decision.retry_after_secs,
            "Request rejected: quota exhausted"
        );
        return rejection_response(&decision);
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    decision.apply_headers(response.headers_mut());
    response
}

/// Access tokens accepted by [`require_auth`].
#[derive(Debug, Clone, Default)]
pub struct KnownTokens(Arc<HashSet<String>>);

impl KnownTokens {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self(Arc::new(tokens.into_iter().collect()))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

pub async fn require_auth(
    State(tokens): State<KnownTokens>,
    request: Request,
    next: Next,
) -> Response {
    let Some(value) = request.headers().get(AUTHORIZATION) else {
        return ErrorResponse::new("no_auth", "Missing Authorization header", 401).into_response();
    };

    match value.to_str() {
        Ok(token) if tokens.contains(token) => next.run(request).await,
        _ => ErrorResponse::new("no_auth_match", "Unknown access token", 401).into_response(),
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    info!(
        target: "quota_throttler::middleware",
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "quota_throttler::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
