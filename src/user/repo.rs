use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::queries::{self, Field};
use super::repo_types::{NewUser, Page, RoleRef, User};
use crate::context::Context;
use crate::db::{node_json, vars, Dgraph, Mutation, Txn, Vars};
use crate::error::{Entity, Result, StoreError};
use crate::password;
use crate::role::{get_role_by_name_in, DEFAULT_ROLES};

const BLANK: &str = "_:user";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Normalise a caller-supplied uid. Only `0x`-prefixed hex is accepted,
/// since uids are spliced into upsert blocks verbatim.
pub(crate) fn parse_uid(uid: &str) -> Result<String> {
    lazy_static! {
        static ref UID_RE: Regex = Regex::new(r"^(?i)0x[0-9a-f]+$").unwrap();
    }
    if uid.is_empty() {
        return Err(StoreError::InvalidInput("missing uid".into()));
    }
    if !UID_RE.is_match(uid) {
        return Err(StoreError::InvalidInput(format!("malformed uid {uid:?}")));
    }
    Ok(uid.to_ascii_lowercase())
}

fn validate(nu: &NewUser) -> Result<()> {
    let required = [
        ("name", &nu.name),
        ("user_name", &nu.user_name),
        ("pass", &nu.pass),
        ("email", &nu.email),
        ("role", &nu.role),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(StoreError::InvalidInput(format!("{field} is required")));
    }
    if !is_valid_email(&nu.email) {
        return Err(StoreError::InvalidInput(format!("invalid email {:?}", nu.email)));
    }
    Ok(())
}

/// User lookups, creation, update and removal.
#[derive(Clone)]
pub struct UserStore {
    dgo: Dgraph,
}

impl UserStore {
    pub fn new(dgo: Dgraph) -> Self {
        Self { dgo }
    }

    /// Create a user. Email and username must both be unused; the password
    /// is stored as an argon2 hash and the named role must already exist.
    ///
    /// The uniqueness checks and the write share one transaction, so a
    /// concurrent add of the same email or username makes one of the two
    /// commits fail with `TxnAborted`.
    #[instrument(skip(self, ctx, nu), fields(user_name = %nu.user_name, trace_id = %ctx.trace_id()))]
    pub async fn add(&self, ctx: &Context, nu: &NewUser, now: OffsetDateTime) -> Result<User> {
        validate(nu)?;

        let mut txn = self.dgo.new_txn();
        let user = match add_in(ctx, &mut txn, nu, now).await {
            Ok(user) => user,
            Err(e) => {
                let _ = txn.discard(ctx).await;
                return Err(e);
            }
        };

        match txn.commit(ctx).await {
            Ok(()) => {
                info!(uid = %user.uid, "user added");
                Ok(user)
            }
            Err(StoreError::TxnAborted) => {
                warn!("user add lost a write conflict");
                Err(StoreError::TxnAborted)
            }
            Err(e) => Err(StoreError::internal("commit user", e)),
        }
    }

    pub async fn get_users_by_name(
        &self,
        ctx: &Context,
        name: &str,
        exact: bool,
        page: Option<Page>,
    ) -> Result<Vec<User>> {
        self.search(ctx, Field::Name, name, exact, page).await
    }

    pub async fn get_users_by_username(
        &self,
        ctx: &Context,
        user_name: &str,
        exact: bool,
        page: Option<Page>,
    ) -> Result<Vec<User>> {
        self.search(ctx, Field::UserName, user_name, exact, page).await
    }

    pub async fn get_users_by_email(
        &self,
        ctx: &Context,
        email: &str,
        exact: bool,
        page: Option<Page>,
    ) -> Result<Vec<User>> {
        self.search(ctx, Field::Email, email, exact, page).await
    }

    /// Fetch one user by uid. Nodes that are not users are reported as
    /// `NotFound`.
    pub async fn get_user_by_uid(&self, ctx: &Context, uid: &str) -> Result<User> {
        let uid = parse_uid(uid)?;
        let mut txn = self.dgo.new_read_only_txn();
        let users = query_users(
            ctx,
            &mut txn,
            &queries::by_uid(),
            &vars([("$uid", uid.as_str())]),
        )
        .await?;
        users.into_iter().next().ok_or(StoreError::NotFound)
    }

    /// Users holding `role`.
    pub async fn get_users_by_role(
        &self,
        ctx: &Context,
        role: &str,
        page: Option<Page>,
    ) -> Result<Vec<User>> {
        let mut txn = self.dgo.new_read_only_txn();
        query_users(ctx, &mut txn, &queries::by_role(page), &vars([("$role", role)])).await
    }

    /// Every user holding one of the built-in roles.
    pub async fn get_all_users(&self, ctx: &Context, page: Option<Page>) -> Result<Vec<User>> {
        let mut txn = self.dgo.new_read_only_txn();
        let q = queries::by_roles(&DEFAULT_ROLES, page);
        query_users(ctx, &mut txn, &q, &Vars::new()).await
    }

    /// Overwrite a stored user with `usr`.
    #[instrument(skip(self, ctx, usr), fields(uid = %usr.uid, trace_id = %ctx.trace_id()))]
    pub async fn update(&self, ctx: &Context, usr: &User) -> Result<()> {
        let uid = self.ensure_exists(ctx, &usr.uid).await?;

        let doc = node_json("uid(t)", "User", usr)?;
        let mu = Mutation::set(doc)
            .with_query(queries::target_user(&uid))
            .with_cond("@if(eq(len(t), 1))")
            .commit_now();
        self.apply_one(ctx, mu, "update user").await?;
        info!("user updated");
        Ok(())
    }

    /// Remove a stored user.
    #[instrument(skip(self, ctx, usr), fields(uid = %usr.uid, trace_id = %ctx.trace_id()))]
    pub async fn delete(&self, ctx: &Context, usr: &User) -> Result<()> {
        let uid = self.ensure_exists(ctx, &usr.uid).await?;

        let mu = Mutation::delete(json!({ "uid": "uid(t)" }))
            .with_query(queries::target_user(&uid))
            .with_cond("@if(eq(len(t), 1))")
            .commit_now();
        self.apply_one(ctx, mu, "delete user").await?;
        info!("user deleted");
        Ok(())
    }

    /// Check `plain` against the stored hash of user `uid`.
    pub async fn verify_password(&self, ctx: &Context, uid: &str, plain: &str) -> Result<User> {
        let user = self.get_user_by_uid(ctx, uid).await?;
        match password::verify_password(plain, &user.pass_hash) {
            Ok(true) => Ok(user),
            Ok(false) => {
                debug!(uid = %user.uid, "password mismatch");
                Err(StoreError::PasswordMismatch)
            }
            Err(e) => Err(StoreError::internal("verify password", e)),
        }
    }

    async fn search(
        &self,
        ctx: &Context,
        field: Field,
        value: &str,
        exact: bool,
        page: Option<Page>,
    ) -> Result<Vec<User>> {
        let mut txn = self.dgo.new_read_only_txn();
        find_in(ctx, &mut txn, field, value, exact, page).await
    }

    async fn ensure_exists(&self, ctx: &Context, uid: &str) -> Result<String> {
        let uid = parse_uid(uid)?;
        match self.get_user_by_uid(ctx, &uid).await {
            Ok(_) => Ok(uid),
            Err(e) if e.is_not_found() => Err(StoreError::DoesNotExist),
            Err(e) => Err(StoreError::internal("fetch user", e)),
        }
    }

    /// Run a conditional upsert that must hit exactly one node.
    async fn apply_one(&self, ctx: &Context, mu: Mutation, op: &'static str) -> Result<()> {
        let mut txn = self.dgo.new_txn();
        let resp = txn
            .mutate(ctx, mu)
            .await
            .map_err(|e| StoreError::internal(op, e))?;
        match resp.matched("target") {
            1 => Ok(()),
            n => Err(StoreError::internal(
                op,
                StoreError::Server(format!("expected 1 affected uid, got {n}")),
            )),
        }
    }
}

async fn add_in(ctx: &Context, txn: &mut Txn, nu: &NewUser, now: OffsetDateTime) -> Result<User> {
    for (field, value, op) in [
        (Field::Email, &nu.email, "check email"),
        (Field::UserName, &nu.user_name, "check user name"),
    ] {
        match find_in(ctx, txn, field, value, true, None).await {
            Ok(users) => {
                let taken = users.into_iter().find(|u| match field {
                    Field::Email => u.email == *value,
                    _ => u.user_name == *value,
                });
                if let Some(existing) = taken {
                    info!(field = field.pred(), uid = %existing.uid, "user already exists");
                    return Err(StoreError::AlreadyExists(Box::new(Entity::User(existing))));
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(StoreError::internal(op, e)),
        }
    }

    let pass_hash =
        password::hash_password(&nu.pass).map_err(|e| StoreError::internal("hash password", e))?;

    let role = match get_role_by_name_in(ctx, txn, &nu.role).await {
        Ok(role) => role,
        Err(e) if e.is_not_found() => return Err(StoreError::RoleNotFound(nu.role.clone())),
        Err(e) => return Err(StoreError::internal("resolve role", e)),
    };

    let mut user = User {
        uid: String::new(),
        name: nu.name.clone(),
        user_name: nu.user_name.clone(),
        email: nu.email.clone(),
        pass_hash,
        role: vec![RoleRef::from(&role)],
        date_created: now,
        last_seen: now,
        last_modified: now,
    };

    let doc = node_json(BLANK, "User", &user)?;
    debug!(user_name = %user.user_name, role = %role.name, "request to add user");
    let resp = txn
        .mutate(ctx, Mutation::set(doc))
        .await
        .map_err(|e| StoreError::internal("add user", e))?;
    user.uid = resp
        .uids
        .get(&BLANK[2..])
        .cloned()
        .ok_or(StoreError::MissingUid)?;
    Ok(user)
}

async fn find_in(
    ctx: &Context,
    txn: &mut Txn,
    field: Field,
    value: &str,
    exact: bool,
    page: Option<Page>,
) -> Result<Vec<User>> {
    let q = queries::by_field(field, exact, page);
    query_users(ctx, txn, &q, &vars([(field.var(), value)])).await
}

async fn query_users(ctx: &Context, txn: &mut Txn, q: &str, vars: &Vars) -> Result<Vec<User>> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(rename = "query", default)]
        users: Vec<User>,
    }

    let json = txn.query_with_vars(ctx, q, vars).await?;
    let r: Response = serde_json::from_value(json)?;
    if r.users.is_empty() {
        return Err(StoreError::NotFound);
    }
    debug!(count = r.users.len(), "users found");
    Ok(r.users)
}
