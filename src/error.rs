use thiserror::Error;

use crate::role::Role;
use crate::user::User;

/// Entity carried by an `AlreadyExists` error.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    User(User),
    Role(Role),
}

impl Entity {
    pub fn uid(&self) -> &str {
        match self {
            Entity::User(u) => &u.uid,
            Entity::Role(r) => &r.uid,
        }
    }
}

/// Errors returned by every store and connection operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query returned zero matches.
    #[error("not found")]
    NotFound,

    /// Uniqueness violation on email, username or role name.
    #[error("already exists (uid {})", .0.uid())]
    AlreadyExists(Box<Entity>),

    /// Update or delete target is absent.
    #[error("record does not exist")]
    DoesNotExist,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("role {0} not found")]
    RoleNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A write succeeded but the engine reported no identifier for it.
    #[error("uid not returned by the database")]
    MissingUid,

    /// The engine aborted the transaction at commit because of a conflicting write.
    #[error("transaction aborted by a conflicting write")]
    TxnAborted,

    #[error("transaction already committed or discarded")]
    TxnFinished,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Error envelope returned by the database itself.
    #[error("database error: {0}")]
    Server(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{op}: {source}")]
    Internal {
        op: &'static str,
        #[source]
        source: Box<StoreError>,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Wrap an error with the name of the failing operation.
    pub fn internal(op: &'static str, source: StoreError) -> Self {
        StoreError::Internal {
            op,
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through `Internal` wrappers.
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::Internal { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StoreError::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Informational conditions the caller can report and move on from.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StoreError::NotFound
                | StoreError::AlreadyExists(_)
                | StoreError::DoesNotExist
                | StoreError::PasswordMismatch
                | StoreError::RoleNotFound(_)
                | StoreError::InvalidInput(_)
        )
    }

    /// Existing user carried by an `AlreadyExists` error.
    pub fn existing_user(&self) -> Option<&User> {
        match self {
            StoreError::AlreadyExists(entity) => match entity.as_ref() {
                Entity::User(u) => Some(u),
                Entity::Role(_) => None,
            },
            _ => None,
        }
    }

    /// Existing role carried by an `AlreadyExists` error.
    pub fn existing_role(&self) -> Option<&Role> {
        match self {
            StoreError::AlreadyExists(entity) => match entity.as_ref() {
                Entity::Role(r) => Some(r),
                Entity::User(_) => None,
            },
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}
