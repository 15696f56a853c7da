use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use super::password::hash_password;
use crate::{
    error::AppError,
    state::AppState,
    store::StoreError,
    users::model::{normalize_email, NewUser, UserView},
};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/register", post(register))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let email = normalize_email(payload.email.as_deref());
    if let Some(email) = &email {
        if !is_valid_email(email) {
            warn!(%email, "invalid email");
            return Err(AppError::BadRequest("Invalid email".into()));
        }
    }

    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::BadRequest("Password too short".into()));
    }

    let hashed_password = hash_password(&payload.password).map_err(AppError::internal)?;

    let candidate = NewUser {
        username: payload.username,
        email,
        hashed_password,
    };
    let user = match state.users.create(candidate).await {
        Ok(u) => u,
        Err(StoreError::DuplicateKey { field }) => {
            warn!(field, "registration collided with an existing user");
            return Err(AppError::Conflict { field });
        }
        Err(StoreError::Validation(msg)) => return Err(AppError::BadRequest(msg)),
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(e.into());
        }
    };

    info!(user_id = ?user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user.to_view())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a b@x.com"));
    }
}
