use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Nested under `/admin` and wrapped in `require_basic_auth`. Callers present the
/// static operator credential, never a user session; a failed check answers 401
/// with a `WWW-Authenticate: Basic` challenge.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/debug/vars
        // Runtime snapshot: version, env, cache switch and token lifetimes.
        .route("/debug/vars", get(handlers::debug_vars))
}
