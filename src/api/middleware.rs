//! Basic-auth check for the loopback service.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::Credential;

/// Reject requests whose basic-auth pair does not match `expected`.
/// With no credential configured every request passes.
pub async fn auth_middleware(
    State(expected): State<Option<Credential>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = expected else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(parse_basic) {
        Some(ref given) if *given == expected => Ok(next.run(request).await),
        Some(given) => {
            tracing::warn!(username = %given.username, "invalid credential provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Decode `Basic <base64(user:password)>`.
fn parse_basic(header: &str) -> Option<Credential> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (username, password) = pair.split_once(':')?;
    Some(Credential::new(username, password))
}
