use axum::Router;

use crate::{auth, state::AppState, users};

pub mod health;
mod test;

/// Mounts every router under its prefix. `/auth` aliases `/api/auth`.
///
/// `/api/groups`, `/api/contacts` and `/api/invites` belong to routers that
/// live outside this crate; until they are mounted here their paths fall
/// through to the 404 handler.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", axum::routing::get(health::healthz))
        .nest("/api/auth", auth::router())
        .nest("/auth", auth::router())
        .nest("/api/test", test::router())
        .nest("/api/users", users::router())
}
