//! Data-access layer for a user/role directory stored in Dgraph.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod password;
pub mod role;
pub mod schema;
pub mod user;

#[cfg(test)]
mod testing;

pub use context::Context;
pub use db::{open, Dgraph, Teardown};
pub use error::{Entity, Result, StoreError};
pub use role::{Role, RoleStore};
pub use schema::Schema;
pub use user::{NewUser, Page, RoleRef, User, UserStore};
