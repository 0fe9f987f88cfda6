/// Router Module Index
///
/// Routes are grouped by the guard in front of them; the guard itself is attached
/// in `create_router`, once per group.

/// Anonymous routes: health, registration, token issuance, activation.
pub mod public;

/// Routes behind the bearer-session guard.
pub mod authenticated;

/// Operational routes behind the static Basic credential.
pub mod admin;
