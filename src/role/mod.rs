mod repo;
mod repo_types;

pub(crate) use repo::get_role_by_name_in;
pub use repo::RoleStore;
pub use repo_types::Role;

/// Roles seeded at bootstrap, also the scope of `UserStore::get_all_users`.
pub const DEFAULT_ROLES: [&str; 2] = ["admin", "user"];
