use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::repo_types::Role;
use crate::context::Context;
use crate::db::{node_json, vars, Dgraph, Mutation, Txn, Vars};
use crate::error::{Entity, Result, StoreError};

// every query names its root block "query"; see `decode_roles`
const Q_ROLE_BY_NAME: &str = r#"
    query query($role_name: string) {
        query(func: eq(role_name, $role_name)) {
            uid
            role_name
            date_created
            last_modified
            last_seen
        }
    }
"#;

const BLANK: &str = "_:role";

/// Role lookups and creation.
#[derive(Clone)]
pub struct RoleStore {
    dgo: Dgraph,
}

impl RoleStore {
    pub fn new(dgo: Dgraph) -> Self {
        Self { dgo }
    }

    /// Add a new role. If a role with this name exists the call fails with
    /// `AlreadyExists` carrying it.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn add(&self, ctx: &Context, name: &str, now: OffsetDateTime) -> Result<Role> {
        match self.get_role_by_name(ctx, name).await {
            Ok(existing) => {
                info!(role = %name, uid = %existing.uid, "role already exists");
                return Err(StoreError::AlreadyExists(Box::new(Entity::Role(existing))));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(StoreError::internal("check role name", e)),
        }

        let mut txn = self.dgo.new_txn();
        let role = insert(ctx, &mut txn, Role::new(name, now), true).await?;
        info!(role = %role.name, uid = %role.uid, "role added");
        Ok(role)
    }

    /// Find a role by exact name.
    pub async fn get_role_by_name(&self, ctx: &Context, name: &str) -> Result<Role> {
        let mut txn = self.dgo.new_read_only_txn();
        get_role_by_name_in(ctx, &mut txn, name).await
    }

    /// Lookup-or-create inside `txn`. Nothing is committed; the caller owns
    /// the transaction.
    pub async fn upsert_in(
        &self,
        ctx: &Context,
        txn: &mut Txn,
        name: &str,
        now: OffsetDateTime,
    ) -> Result<Role> {
        match get_role_by_name_in(ctx, txn, name).await {
            Ok(existing) => {
                debug!(role = %name, uid = %existing.uid, "reusing role");
                Ok(existing)
            }
            Err(e) if e.is_not_found() => insert(ctx, txn, Role::new(name, now), false).await,
            Err(e) => Err(StoreError::internal("lookup role", e)),
        }
    }
}

/// Exact-name lookup inside an existing transaction.
pub(crate) async fn get_role_by_name_in(ctx: &Context, txn: &mut Txn, name: &str) -> Result<Role> {
    let roles = query(ctx, txn, Q_ROLE_BY_NAME, &vars([("$role_name", name)])).await?;
    // names are unique; the first match is the role
    roles.into_iter().next().ok_or(StoreError::NotFound)
}

async fn insert(ctx: &Context, txn: &mut Txn, mut role: Role, commit_now: bool) -> Result<Role> {
    let doc = node_json(BLANK, "Role", &role)?;
    let mut mu = Mutation::set(doc);
    if commit_now {
        mu = mu.commit_now();
    }

    debug!(role = %role.name, "request to add role");
    let resp = txn
        .mutate(ctx, mu)
        .await
        .map_err(|e| StoreError::internal("add role", e))?;

    role.uid = resp
        .uids
        .get(&BLANK[2..])
        .cloned()
        .ok_or(StoreError::MissingUid)?;
    Ok(role)
}

async fn query(ctx: &Context, txn: &mut Txn, q: &str, vars: &Vars) -> Result<Vec<Role>> {
    let json = txn.query_with_vars(ctx, q, vars).await?;
    let roles = decode_roles(json)?;
    if roles.is_empty() {
        return Err(StoreError::NotFound);
    }
    debug!(count = roles.len(), "roles found");
    Ok(roles)
}

fn decode_roles(json: serde_json::Value) -> Result<Vec<Role>> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(rename = "query", default)]
        roles: Vec<Role>,
    }
    let r: Response = serde_json::from_value(json)?;
    Ok(r.roles)
}
