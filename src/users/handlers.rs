use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::get,
    Json, Router,
};
use bson::Bson;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::model::{normalize_email, redact, UserView};
use crate::{auth::is_valid_email, error::AppError, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    /// Comma-separated field projection, e.g. `username,email`.
    pub fields: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmailRequest {
    #[serde(default)]
    pub email: Option<String>,
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(find_by_email))
        .route("/:username", get(get_user).patch(update_email))
}

/// `GET /api/users?email=..`, matched case-insensitively.
#[instrument(skip(state, query))]
pub async fn find_by_email(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Json<UserView>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let user = state
        .users
        .find_by_email(&query.email)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(user.to_view()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Value>, AppError> {
    if let Some(fields) = query.fields {
        let fields: Vec<String> = fields
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        let doc = state
            .users
            .find_projection(&username, &fields)
            .await?
            .ok_or(AppError::NotFound)?;
        return Ok(Json(Bson::Document(redact(doc)).into_relaxed_extjson()));
    }

    let user = state
        .users
        .find_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;
    let view: UserView = user.to_view();
    Ok(Json(serde_json::to_value(view).map_err(AppError::internal)?))
}

#[instrument(skip(state, payload))]
pub async fn update_email(
    State(state): State<AppState>,
    Path(username): Path<String>,
    payload: Result<Json<UpdateEmailRequest>, JsonRejection>,
) -> Result<Json<UserView>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let email = normalize_email(payload.email.as_deref());
    if email.as_deref().is_some_and(|e| !is_valid_email(e)) {
        return Err(AppError::BadRequest("Invalid email".into()));
    }

    let user = match state
        .users
        .set_email(&username, email.as_deref())
        .await
    {
        Ok(Some(u)) => u,
        Ok(None) => return Err(AppError::NotFound),
        Err(e) => {
            warn!(error = %e, %username, "email update rejected");
            return Err(e.into());
        }
    };

    info!(username = %user.username, "user email updated");
    Ok(Json(user.to_view()))
}
