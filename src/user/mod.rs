mod queries;
mod repo;
mod repo_types;

pub use repo::UserStore;
pub use repo_types::{NewUser, Page, RoleRef, User};
