use crate::state::AppState;
use axum::Router;

pub mod handlers;
mod password;

pub(crate) use handlers::is_valid_email;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
