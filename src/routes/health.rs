use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub env: String,
    /// 0 disconnected, 1 connected, 2 connecting, 3 disconnecting, 4 unauthorized.
    pub db: u8,
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.store_status.borrow().code();
    Json(HealthResponse {
        ok: true,
        env: state.env.to_string(),
        db,
    })
}
