use std::sync::Mutex;

use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use time::OffsetDateTime;

use super::{
    model::{normalize_email, normalize_username, NewUser, User},
    repo::UserRepository,
};
use crate::store::StoreError;

/// Same uniqueness rules as the Mongo indexes: absolute on username,
/// sparse on email.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_email(
        users: &[User],
        email: Option<&str>,
        skip: Option<ObjectId>,
    ) -> Result<(), StoreError> {
        if let Some(email) = email {
            if users
                .iter()
                .any(|u| u.id != skip && u.email.as_deref() == Some(email))
            {
                return Err(StoreError::DuplicateKey { field: "email" });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, candidate: NewUser) -> Result<User, StoreError> {
        let mut user = candidate.into_record(OffsetDateTime::now_utc())?;
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::DuplicateKey { field: "username" });
        }
        Self::check_email(&users, user.email.as_deref(), None)?;
        user.id = Some(ObjectId::new());
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = normalize_username(username);
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let Some(email) = normalize_email(Some(email)) else {
            return Ok(None);
        };
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| u.email.as_deref() == Some(email.as_str()))
            .cloned())
    }

    async fn find_projection(
        &self,
        username: &str,
        fields: &[String],
    ) -> Result<Option<Document>, StoreError> {
        let Some(user) = self.find_by_username(username).await? else {
            return Ok(None);
        };
        let mut doc = bson::to_document(&user).expect("user serializes to bson");
        if !fields.is_empty() {
            doc = doc
                .into_iter()
                .filter(|(key, _)| key == "_id" || fields.iter().any(|f| f == key))
                .collect();
        }
        Ok(Some(doc))
    }

    async fn set_email(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let username = normalize_username(username);
        let email = normalize_email(email);
        let mut users = self.users.lock().unwrap();
        let Some(pos) = users.iter().position(|u| u.username == username) else {
            return Ok(None);
        };
        Self::check_email(&users, email.as_deref(), users[pos].id)?;
        let user = &mut users[pos];
        user.email = email;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(username: &str, email: Option<&str>) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.map(str::to_string),
            hashed_password: "h".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let repo = MemoryUserRepository::new();
        repo.create(candidate("alice", None)).await.unwrap();
        let err = repo.create(candidate(" alice ", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { field: "username" }));
    }

    #[tokio::test]
    async fn absent_emails_do_not_collide() {
        let repo = MemoryUserRepository::new();
        repo.create(candidate("alice", None)).await.unwrap();
        repo.create(candidate("bob", None)).await.unwrap();
        repo.create(candidate("carol", Some("  "))).await.unwrap();
    }

    #[tokio::test]
    async fn present_emails_are_unique_case_insensitively() {
        let repo = MemoryUserRepository::new();
        repo.create(candidate("alice", Some("a@x.com"))).await.unwrap();
        let err = repo
            .create(candidate("bob", Some("A@X.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { field: "email" }));
    }

    #[tokio::test]
    async fn set_email_respects_sparse_uniqueness() {
        let repo = MemoryUserRepository::new();
        repo.create(candidate("alice", Some("a@x.com"))).await.unwrap();
        let bob = repo.create(candidate("bob", None)).await.unwrap();

        let err = repo.set_email("bob", Some("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { field: "email" }));

        // Re-setting your own email is fine.
        repo.set_email("alice", Some("A@x.com")).await.unwrap();

        let cleared = repo.set_email("alice", None).await.unwrap().unwrap();
        assert_eq!(cleared.email, None);
        let updated = repo.set_email("bob", Some("a@x.com")).await.unwrap().unwrap();
        assert_eq!(updated.email.as_deref(), Some("a@x.com"));
        assert!(updated.updated_at >= bob.updated_at);

        assert!(repo.set_email("nobody", None).await.unwrap().is_none());
        assert_eq!(
            repo.find_by_email("A@X.COM").await.unwrap().unwrap().username,
            "bob"
        );
    }
}
