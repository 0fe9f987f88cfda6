use crate::{
    error::AppError,
    models::User,
    repository::RepositoryState,
};

/// RoleAuthorizer
///
/// Decides whether an identity may mutate a resource it may or may not own.
/// Ownership always suffices; otherwise the actor's role level must be at least
/// the level of the required role (ties allowed).
#[derive(Clone)]
pub struct RoleAuthorizer {
    repo: RepositoryState,
}

impl RoleAuthorizer {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    /// check_role_precedence
    ///
    /// Roles are read from the store on every call, never from the identity cache.
    /// Any lookup failure (including an unknown role name) is an internal error.
    pub async fn check_role_precedence(&self, actor: &User, role_name: &str) -> Result<bool, AppError> {
        let required = self
            .repo
            .get_role_by_name(role_name)
            .await
            .map_err(|e| AppError::internal(format!("load role '{role_name}': {e}")))?;

        Ok(actor.role.level >= required.level)
    }

    /// authorize
    ///
    /// `Ok(())` when allowed, `Forbidden` when the precedence check says no.
    pub async fn authorize(&self, actor: &User, owner_id: i64, required_role: &str) -> Result<(), AppError> {
        if actor.id == owner_id {
            return Ok(());
        }

        if self.check_role_precedence(actor, required_role).await? {
            return Ok(());
        }

        tracing::info!(
            user_id = actor.id,
            role = %actor.role.name,
            required_role,
            "role precedence check denied"
        );
        Err(AppError::Forbidden)
    }
}
