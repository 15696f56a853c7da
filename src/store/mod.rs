use async_trait::async_trait;
use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

mod mongo;

pub use mongo::MongoStore;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field} already exists")]
    DuplicateKey { field: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error("store authentication failed: {0}")]
    Unauthorized(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Driver(mongodb::error::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE => {
                Self::DuplicateKey {
                    field: duplicate_field(&write.message),
                }
            }
            // findAndModify reports E11000 as a command error, not a write error.
            ErrorKind::Command(cmd) if cmd.code == DUPLICATE_KEY_CODE => Self::DuplicateKey {
                field: duplicate_field(&cmd.message),
            },
            ErrorKind::Authentication { message, .. } => Self::Unauthorized(message.clone()),
            ErrorKind::ServerSelection { message, .. } => Self::Unavailable(message.clone()),
            _ => Self::Driver(err),
        }
    }
}

/// Picks the offending field out of an E11000 message by index name.
fn duplicate_field(message: &str) -> &'static str {
    if message.contains("index: email") {
        "email"
    } else {
        "username"
    }
}

/// The external document store as seen by the connection lifecycle.
#[async_trait]
pub trait Store: Send + Sync {
    /// Handshake; succeeds once a server answers.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Non-forced close: in-flight operations are allowed to finish.
    async fn close(&self);
}
