//! DQL templates for user lookups. Every template names its result block
//! `query` so one decoder serves them all.

use super::repo_types::Page;

/// Edit distance used by the fuzzy `match` templates.
pub(crate) const FUZZY_DISTANCE: u32 = 25;

const USER_FIELDS: &str = r#"
            uid
            name
            user_name
            email
            role {
                uid
                role_name
            }
            pass_hash
            date_created
            last_modified
            last_seen
"#;

/// Searchable user predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Name,
    UserName,
    Email,
}

impl Field {
    pub(crate) fn pred(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::UserName => "user_name",
            Field::Email => "email",
        }
    }

    pub(crate) fn var(self) -> &'static str {
        match self {
            Field::Name => "$name",
            Field::UserName => "$user_name",
            Field::Email => "$email",
        }
    }
}

/// Exact (`eq`) or fuzzy (`match`) lookup on one predicate.
pub(crate) fn by_field(field: Field, exact: bool, page: Option<Page>) -> String {
    let (pred, var) = (field.pred(), field.var());
    let func = if exact {
        format!("eq({pred}, {var})")
    } else {
        format!("match({pred}, {var}, {FUZZY_DISTANCE})")
    };
    format!(
        "query query({var}: string) {{\n    query(func: {func}{page}) {{{USER_FIELDS}    }}\n}}",
        page = Page::args(page),
    )
}

pub(crate) fn by_uid() -> String {
    format!(
        "query query($uid: string) {{\n    query(func: uid($uid)) @filter(has(user_name)) {{{USER_FIELDS}    }}\n}}"
    )
}

/// Users reachable from the named role over the reverse `role` edge.
pub(crate) fn by_role(page: Option<Page>) -> String {
    format!(
        "query query($role: string) {{\n    var(func: eq(role_name, $role)) {{\n        members as ~role\n    }}\n    query(func: uid(members){page}) {{{USER_FIELDS}    }}\n}}",
        page = Page::args(page),
    )
}

/// Users holding any of `roles`. Each user appears once.
pub(crate) fn by_roles(roles: &[&str], page: Option<Page>) -> String {
    let list = roles
        .iter()
        .map(|r| format!("{r:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{{\n    var(func: eq(role_name, [{list}])) {{\n        members as ~role\n    }}\n    query(func: uid(members){page}) {{{USER_FIELDS}    }}\n}}",
        page = Page::args(page),
    )
}

/// Upsert block selecting `uid` only if it is a user; binds it to `t`.
pub(crate) fn target_user(uid: &str) -> String {
    format!("{{ target(func: uid({uid})) @filter(has(user_name)) {{ t as uid }} }}")
}
