//! Client identity resolution.
//!
//! Every request is attributed to a [`ClientIdentity`] before it is charged.
//! Resolution fails closed: a request whose identity cannot be determined is
//! rejected rather than lumped into a shared bucket.

use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::request::Parts;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Opaque key identifying a quota holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientIdentity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Maps a request to the client it is charged against.
///
/// Implementations may perform I/O (a token lookup, for instance). Any error
/// is reported to the caller as `IdentityResolutionFailed`.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, request: &Parts) -> ThrottlerResult<ClientIdentity>;
}

/// Identifies clients by their network address.
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    trust_forwarded_headers: bool,
}

impl ClientIpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer `X-Forwarded-For` / `X-Real-IP` over the socket address.
    /// Only enable this behind a proxy that overwrites those headers.
    pub fn trust_forwarded_headers(mut self) -> Self {
        self.trust_forwarded_headers = true;
        self
    }

    fn forwarded_ip(request: &Parts) -> Option<String> {
        if let Some(forwarded) = request.headers.get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    let first_ip = first_ip.trim();
                    if !first_ip.is_empty() {
                        return Some(first_ip.to_string());
                    }
                }
            }
        }

        request
            .headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    }

    fn socket_ip(request: &Parts) -> Option<String> {
        if let Some(ConnectInfo(addr)) = request.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Some(addr.ip().to_string());
        }
        request
            .extensions
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }
}

#[async_trait]
impl IdentityResolver for ClientIpResolver {
    async fn resolve(&self, request: &Parts) -> ThrottlerResult<ClientIdentity> {
        let forwarded = if self.trust_forwarded_headers {
            Self::forwarded_ip(request)
        } else {
            None
        };

        forwarded
            .or_else(|| Self::socket_ip(request))
            .map(ClientIdentity::from)
            .ok_or_else(|| {
                ThrottlerError::IdentityResolutionFailed("Client address unavailable".into())
            })
    }
}

/// Identifies clients by the value of a request header, such as an API token.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    header: HeaderName,
}

impl HeaderResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn authorization() -> Self {
        Self::new(AUTHORIZATION)
    }
}

#[async_trait]
impl IdentityResolver for HeaderResolver {
    async fn resolve(&self, request: &Parts) -> ThrottlerResult<ClientIdentity> {
        let value = request.headers.get(&self.header).ok_or_else(|| {
            ThrottlerError::IdentityResolutionFailed(format!("Missing '{}' header", self.header))
        })?;

        let value = value.to_str().map_err(|_| {
            ThrottlerError::IdentityResolutionFailed(format!(
                "Header '{}' is not valid ASCII",
                self.header
            ))
        })?;

        let value = value.trim();
        if value.is_empty() {
            return Err(ThrottlerError::IdentityResolutionFailed(format!(
                "Header '{}' is empty",
                self.header
            )));
        }

        Ok(ClientIdentity::new(value))
    }
}
