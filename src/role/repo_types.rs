use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Role node used for access control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub uid: String,
    #[serde(rename = "role_name")]
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date_created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
}

impl Role {
    pub fn new(name: &str, now: OffsetDateTime) -> Self {
        Self {
            uid: String::new(),
            name: name.to_string(),
            date_created: now,
            last_seen: now,
            last_modified: now,
        }
    }
}
