use axum::Router;

use crate::state::AppState;

pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod repo;

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
