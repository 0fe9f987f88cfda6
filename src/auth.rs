use std::{sync::Arc, time::Duration};

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{AppState, config::TokenConfig, error::AppError, models::User, resolver::UserResolver};

/// Claims
///
/// The payload signed into every bearer session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the numeric identity ID, carried as a string.
    pub sub: String,
    /// Issued At (iat), Unix seconds.
    pub iat: i64,
    /// Expiration Time (exp), Unix seconds. Checked against the verifier's clock.
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// JwtAuthenticator
///
/// Stateless HS256 signer/verifier. Holds only the keys and the expected
/// issuer/audience, so it is safe to share across any number of concurrent requests.
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

pub type AuthenticatorState = Arc<JwtAuthenticator>;

impl JwtAuthenticator {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        // Expiry is exact: no grace period past `exp`.
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(&config.secret, &config.issuer, &config.audience, config.ttl)
    }

    /// Claims for a fresh session: issued now, expiring after the configured lifetime.
    pub fn claims_for(&self, user_id: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        }
    }

    pub fn generate_token(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("sign session token: {e}")))
    }

    /// validate_token
    ///
    /// Signature mismatch, expiry and issuer/audience mismatch all collapse into
    /// the same `Unauthenticated`; which check failed is only visible in debug logs.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(kind = ?e.kind(), "session token rejected");
                AppError::Unauthenticated
            })
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Handlers that need the caller
/// take it as an argument, so the dependency is visible in every signature.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// authenticate_bearer
///
/// The full bearer pipeline: header → token → subject → identity. Every failure,
/// including a vanished user or a store error, is reported as `Unauthenticated`.
pub async fn authenticate_bearer(
    headers: &HeaderMap,
    authenticator: &JwtAuthenticator,
    resolver: &UserResolver,
) -> Result<User, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthenticated)?;

    let parts: Vec<&str> = auth_header.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return Err(AppError::Unauthenticated);
    }

    let claims = authenticator.validate_token(parts[1])?;

    let user_id: i64 = claims.sub.parse().map_err(|_| AppError::Unauthenticated)?;

    resolver.resolve(user_id).await.map_err(|e| {
        tracing::debug!(user_id, error = %e, "identity resolution failed during authentication");
        AppError::Unauthenticated
    })
}

/// AuthUser Extractor Implementation
///
/// Reuses the identity already attached by `require_bearer` when present; otherwise
/// runs the bearer pipeline itself, so the extractor is safe outside the guarded router too.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthenticatorState: FromRef<S>,
    UserResolver: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let authenticator = AuthenticatorState::from_ref(state);
        let resolver = UserResolver::from_ref(state);

        let user = authenticate_bearer(&parts.headers, &authenticator, &resolver).await?;
        Ok(AuthUser(user))
    }
}

/// require_bearer
///
/// Route-layer guard for the authenticated router. On success the resolved identity
/// travels with the request as a typed `AuthUser` for the handler to extract.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate_bearer(request.headers(), &state.authenticator, &state.resolver).await?;
    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}
