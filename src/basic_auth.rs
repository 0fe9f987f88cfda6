use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{
    config::{AppConfig, BasicAuthConfig},
    error::AppError,
};

/// check_basic_credentials
///
/// Validates `Authorization: Basic <base64(user:pass)>` against the static admin pair.
/// Every failure mode is the same challenge-bearing rejection. Only the first colon
/// splits, so the password may itself contain colons.
pub fn check_basic_credentials(headers: &HeaderMap, expected: &BasicAuthConfig) -> Result<(), AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::BasicChallenge)?;

    let parts: Vec<&str> = auth_header.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Basic" {
        return Err(AppError::BasicChallenge);
    }

    let decoded = STANDARD.decode(parts[1]).map_err(|_| AppError::BasicChallenge)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AppError::BasicChallenge)?;

    let (username, password) = decoded.split_once(':').ok_or(AppError::BasicChallenge)?;

    // Both halves are always compared.
    let user_ok = constant_time_eq(username.as_bytes(), expected.username.as_bytes());
    let pass_ok = constant_time_eq(password.as_bytes(), expected.password.as_bytes());
    if !(user_ok & pass_ok) {
        return Err(AppError::BasicChallenge);
    }

    Ok(())
}

/// Constant-time byte comparison. Length mismatch returns early; content never does.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// require_basic_auth
///
/// Route-layer guard for `/admin`. This is a service-level credential, so no
/// identity is attached to the request.
pub async fn require_basic_auth(
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_basic_credentials(request.headers(), &config.basic_auth)?;
    Ok(next.run(request).await)
}
