use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::StoreError;

pub const USERS_COLLECTION: &str = "users";
pub const PASSWORD_FIELD: &str = "hashedPassword";

/// User document as stored. Never serialize this toward a client; use [`UserView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    // Omitted rather than null so the sparse index skips it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub hashed_password: String,
    #[serde(with = "bson::serde_helpers::time_0_3_offsetdatetime_as_bson_datetime")]
    pub created_at: OffsetDateTime,
    #[serde(with = "bson::serde_helpers::time_0_3_offsetdatetime_as_bson_datetime")]
    pub updated_at: OffsetDateTime,
}

/// Registration candidate, before normalization.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub hashed_password: String,
}

/// Client-facing user shape. Has no password field at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Option<String>,
    pub username: String,
    pub email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_string()
}

/// Trimmed and lower-cased; blank means absent.
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    raw.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty())
}

impl NewUser {
    pub fn into_record(self, now: OffsetDateTime) -> Result<User, StoreError> {
        let username = normalize_username(&self.username);
        if username.is_empty() {
            return Err(StoreError::Validation("username is required".into()));
        }
        if self.hashed_password.is_empty() {
            return Err(StoreError::Validation("hashedPassword is required".into()));
        }
        Ok(User {
            id: None,
            username,
            email: normalize_email(self.email.as_deref()),
            hashed_password: self.hashed_password,
            created_at: now,
            updated_at: now,
        })
    }
}

impl User {
    pub fn to_view(&self) -> UserView {
        UserView::from(self)
    }
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.map(|id| id.to_hex()),
            username: user.username.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Strips the password hash from any user document, projections included.
pub fn redact(mut doc: Document) -> Document {
    doc.remove(PASSWORD_FIELD);
    doc
}
