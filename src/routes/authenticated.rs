use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Every handler here runs after `require_bearer`, so an `AuthUser` is always
/// available. Mutations on posts additionally go through `RoleAuthorizer`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /users/me
        .route("/users/me", get(handlers::get_me))
        // GET /users/{id}
        // Resolved through the identity cache.
        .route("/users/{id}", get(handlers::get_user))
        // POST /posts
        .route("/posts", post(handlers::create_post))
        // GET/PATCH/DELETE /posts/{id}
        // PATCH: owner or moderator+. DELETE: owner or admin.
        .route(
            "/posts/{id}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
}
