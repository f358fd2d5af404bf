//! Schema bootstrap and destructive resets.

use std::collections::HashMap;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::context::Context;
use crate::db::{Dgraph, Operation};
use crate::error::{Result, StoreError};
use crate::role::{Role, RoleStore, DEFAULT_ROLES};

const TEMPLATE: &str = include_str!("schema.dgraph");

/// Rendered schema document bound to a database handle.
#[derive(Clone)]
pub struct Schema {
    dgo: Dgraph,
    doc: String,
}

impl Schema {
    pub fn new(dgo: Dgraph) -> Result<Self> {
        Self::from_template(dgo, TEMPLATE)
    }

    pub(crate) fn from_template(dgo: Dgraph, template: &str) -> Result<Self> {
        let doc = render(template, &HashMap::new())?;
        Ok(Self { dgo, doc })
    }

    pub fn document(&self) -> &str {
        &self.doc
    }

    /// Apply the schema document. Safe to repeat.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn init_schema(&self, ctx: &Context) -> Result<()> {
        self.dgo
            .alter(ctx, Operation::Schema(self.doc.clone()))
            .await
            .map_err(|e| StoreError::internal("init schema", e))?;
        info!("schema applied");
        Ok(())
    }

    /// Make sure every default role exists, creating the missing ones in a
    /// single transaction. Existing roles are reused.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn init_roles(&self, ctx: &Context, now: OffsetDateTime) -> Result<Vec<Role>> {
        let rs = RoleStore::new(self.dgo.clone());
        let mut txn = self.dgo.new_txn();

        let mut roles = Vec::with_capacity(DEFAULT_ROLES.len());
        for name in DEFAULT_ROLES {
            match rs.upsert_in(ctx, &mut txn, name, now).await {
                Ok(role) => roles.push(role),
                Err(e) => {
                    let _ = txn.discard(ctx).await;
                    return Err(StoreError::internal("init roles", e));
                }
            }
        }

        txn.commit(ctx)
            .await
            .map_err(|e| StoreError::internal("commit roles", e))?;
        info!(count = roles.len(), "default roles ready");
        Ok(roles)
    }

    /// Remove all data, keeping the schema.
    pub async fn drop_data(&self, ctx: &Context) -> Result<()> {
        warn!(trace_id = %ctx.trace_id(), "dropping all data");
        self.dgo
            .alter(ctx, Operation::DropData)
            .await
            .map_err(|e| StoreError::internal("drop data", e))
    }

    /// Remove all data and the schema.
    pub async fn drop_all(&self, ctx: &Context) -> Result<()> {
        warn!(trace_id = %ctx.trace_id(), "dropping all data and schema");
        self.dgo
            .alter(ctx, Operation::DropAll)
            .await
            .map_err(|e| StoreError::internal("drop all", e))
    }
}

/// Substitute `{{ name }}` placeholders from `vars`.
fn render(template: &str, vars: &HashMap<&str, &str>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            let at = template.len() - rest.len() + start;
            StoreError::Schema(format!("unterminated placeholder at byte {at}"))
        })?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| StoreError::Schema(format!("unknown variable {name:?}")))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
