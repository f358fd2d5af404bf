use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::role::Role;

/// Role reference embedded on a user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub uid: String,
    #[serde(rename = "role_name", default)]
    pub name: String,
}

impl From<&Role> for RoleRef {
    fn from(r: &Role) -> Self {
        Self {
            uid: r.uid.clone(),
            name: r.name.clone(),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uid: String,
    pub name: String,
    pub user_name: String,
    pub email: String,
    pub pass_hash: String, // argon2 PHC string
    #[serde(default)]
    pub role: Vec<RoleRef>,
    #[serde(with = "time::serde::rfc3339")]
    pub date_created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
}

impl User {
    pub fn has_role(&self, name: &str) -> bool {
        self.role.iter().any(|r| r.name == name)
    }
}

/// Holds the details supplied during user creation.
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub user_name: String,
    pub pass: String,
    pub email: String,
    pub role: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("user_name", &self.user_name)
            .field("pass", &"<redacted>")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish()
    }
}

/// Result window for queries that would otherwise return everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub first: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(first: u32, offset: u32) -> Self {
        Self { first, offset }
    }

    /// DQL pagination arguments, e.g. `, first: 20, offset: 40`.
    pub(crate) fn args(page: Option<Page>) -> String {
        match page {
            Some(p) => format!(", first: {}, offset: {}", p.first, p.offset),
            None => String::new(),
        }
    }
}
