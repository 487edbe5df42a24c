//! Authentication middleware for the REST API
//!
//! Every protected request is resolved to an [`Identity`] by a
//! [`SessionValidator`]. The token is read from, in order:
//! - `Authorization: Bearer <token>`
//! - `X-Api-Key: <token>`
//! - the `token` query parameter (browsers cannot set headers on plain
//!   download links or `EventSource` connections)
//!
//! Requests the validator rejects receive 401 Unauthorized.

use crate::api::AppState;
use crate::error::Error;
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};

/// The caller a request was authenticated as
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable name of the caller ("anonymous" when authentication is off)
    pub subject: String,
}

impl Identity {
    /// Identity given to every caller when no credentials are required
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
        }
    }
}

/// Resolves request credentials to an identity
///
/// Implement this to plug an external session or account service into the
/// API; [`ApiKeyValidator`] is the built-in implementation.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Return the caller's identity, or `None` to reject the request
    async fn validate(
        &self,
        token: Option<&str>,
        client_ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> Option<Identity>;
}

/// Accepts requests presenting the configured API key
///
/// With no key configured every request is accepted as
/// [`Identity::anonymous`].
#[derive(Clone, Debug, Default)]
pub struct ApiKeyValidator {
    api_key: Option<String>,
}

impl ApiKeyValidator {
    /// Validator for `api_key` (`None` disables authentication)
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl SessionValidator for ApiKeyValidator {
    async fn validate(
        &self,
        token: Option<&str>,
        _client_ip: Option<IpAddr>,
        _user_agent: Option<&str>,
    ) -> Option<Identity> {
        let Some(expected) = &self.api_key else {
            return Some(Identity::anonymous());
        };
        match token {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
                Some(Identity {
                    subject: "api-key".to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Middleware resolving the caller through [`AppState::sessions`]
///
/// On success the [`Identity`] is stored in the request extensions for
/// handlers to extract.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request_token(request.headers(), request.uri().query());
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let identity = state
        .sessions
        .validate(token.as_deref(), client_ip, user_agent.as_deref())
        .await;

    match identity {
        Some(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        None => {
            tracing::debug!(
                path = %request.uri().path(),
                client_ip = ?client_ip,
                has_token = token.is_some(),
                "Rejected unauthenticated request"
            );
            let message = if token.is_some() {
                "Invalid credentials"
            } else {
                "Missing credentials"
            };
            Error::Unauthorized(message.to_string()).into_response()
        }
    }
}

/// Token from the Authorization header, the X-Api-Key header or the query
pub fn request_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned())
    })
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
/// Always compares all bytes regardless of where the first mismatch occurs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
