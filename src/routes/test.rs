use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ping", get(ping))
}

async fn ping() -> Json<Value> {
    Json(json!({ "ok": true }))
}
