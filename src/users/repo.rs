use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use mongodb::{
    options::{FindOneAndUpdateOptions, FindOneOptions, IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use time::OffsetDateTime;
use tracing::debug;

use super::model::{normalize_email, normalize_username, NewUser, User, USERS_COLLECTION};
use crate::store::StoreError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `DuplicateKey` on a taken username or a taken present email.
    async fn create(&self, candidate: NewUser) -> Result<User, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Raw projected document. Callers must pass it through `redact` before
    /// it leaves the process.
    async fn find_projection(
        &self,
        username: &str,
        fields: &[String],
    ) -> Result<Option<Document>, StoreError>;

    /// Sets or clears the email and refreshes `updatedAt`.
    async fn set_email(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    async fn ensure_indexes(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct MongoUserRepository {
    users: Collection<User>,
}

impl MongoUserRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            users: db.collection(USERS_COLLECTION),
        }
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn create(&self, candidate: NewUser) -> Result<User, StoreError> {
        let mut user = candidate.into_record(OffsetDateTime::now_utc())?;
        let inserted = self.users.insert_one(&user, None).await?;
        user.id = inserted.inserted_id.as_object_id();
        debug!(username = %user.username, "user inserted");
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = normalize_username(username);
        Ok(self
            .users
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let Some(email) = normalize_email(Some(email)) else {
            return Ok(None);
        };
        Ok(self.users.find_one(doc! { "email": email }, None).await?)
    }

    async fn find_projection(
        &self,
        username: &str,
        fields: &[String],
    ) -> Result<Option<Document>, StoreError> {
        let projection = (!fields.is_empty()).then(|| {
            fields
                .iter()
                .map(|f| (f.clone(), bson::Bson::Int32(1)))
                .collect::<Document>()
        });
        let options = FindOneOptions::builder().projection(projection).build();
        Ok(self
            .users
            .clone_with_type::<Document>()
            .find_one(doc! { "username": normalize_username(username) }, options)
            .await?)
    }

    async fn set_email(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let now = DateTime::from_time_0_3(OffsetDateTime::now_utc());
        let update = match normalize_email(email) {
            Some(email) => doc! { "$set": { "email": email, "updatedAt": now } },
            None => doc! { "$set": { "updatedAt": now }, "$unset": { "email": "" } },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .users
            .find_one_and_update(
                doc! { "username": normalize_username(username) },
                update,
                options,
            )
            .await?)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let username = IndexModel::builder()
            .keys(doc! { "username": 1 })
            .options(
                IndexOptions::builder()
                    .name("username_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name("email_unique_sparse".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();
        self.users.create_indexes([username, email], None).await?;
        Ok(())
    }
}
