use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Public Router Module
///
/// Endpoints reachable without any credential. These are the gateway into the
/// identity lifecycle: register → activate → exchange credentials for a token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers; also reports env and version.
        .route("/health", get(handlers::health_check))
        // POST /authentication/user
        // Registration. Persists an inactive identity plus a hashed invitation and
        // sends the activation email. Responds 201 with the plaintext token.
        .route("/authentication/user", post(handlers::register_user))
        // POST /authentication/token
        // Exchanges email + password of an activated identity for a signed session token.
        .route("/authentication/token", post(handlers::create_token))
        // PUT /users/activate/{token}
        // Redeems an invitation, marking the identity active.
        .route("/users/activate/{token}", put(handlers::activate_user))
}
