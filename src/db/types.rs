use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named query variables, keyed with their `$` prefix.
pub type Vars = HashMap<String, String>;

/// Build a `Vars` map from `("$name", value)` pairs.
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> Vars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Serialize `value` as a node document with the given uid (a concrete uid,
/// a `_:blank` node or a `uid(var)` reference) and `dgraph.type`.
pub fn node_json<T: Serialize>(uid: &str, kind: &str, value: &T) -> serde_json::Result<Value> {
    let mut doc = serde_json::to_value(value)?;
    if let Value::Object(obj) = &mut doc {
        obj.insert("uid".into(), Value::String(uid.to_string()));
        obj.insert("dgraph.type".into(), Value::String(kind.to_string()));
    }
    Ok(doc)
}

/// Transaction bookkeeping returned in the `extensions.txn` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnContext {
    #[serde(default)]
    pub start_ts: u64,
    #[serde(default)]
    pub commit_ts: u64,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub preds: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
    pub vars: &'a Vars,
    pub start_ts: u64,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub json: Value,
    pub txn: TxnContext,
}

/// JSON set/delete document, optionally conditioned by an upsert query.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
    pub set_json: Option<Value>,
    pub delete_json: Option<Value>,
    /// Upsert block query; its variables may be referenced as `uid(v)`.
    pub query: Option<String>,
    /// Condition on the upsert query, e.g. `@if(eq(len(v), 1))`.
    pub cond: Option<String>,
    pub commit_now: bool,
}

impl Mutation {
    pub fn set(doc: Value) -> Self {
        Self {
            set_json: Some(doc),
            ..Default::default()
        }
    }

    pub fn delete(doc: Value) -> Self {
        Self {
            delete_json: Some(doc),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_cond(mut self, cond: impl Into<String>) -> Self {
        self.cond = Some(cond.into());
        self
    }

    pub fn commit_now(mut self) -> Self {
        self.commit_now = true;
        self
    }

    pub(crate) fn body(&self) -> Value {
        let mut body = serde_json::Map::new();
        if let Some(set) = &self.set_json {
            body.insert("set".into(), set.clone());
        }
        if let Some(del) = &self.delete_json {
            body.insert("delete".into(), del.clone());
        }
        if let Some(q) = &self.query {
            body.insert("query".into(), Value::String(q.clone()));
        }
        if let Some(c) = &self.cond {
            body.insert("cond".into(), Value::String(c.clone()));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutationResponse {
    /// Blank node name (without `_:`) to assigned uid.
    pub uids: HashMap<String, String>,
    /// Results of the upsert block query, keyed by query block name.
    pub queries: Value,
    pub txn: TxnContext,
}

impl MutationResponse {
    /// Number of nodes matched by upsert block `name`.
    pub fn matched(&self, name: &str) -> usize {
        self.queries
            .get(name)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// Schema alteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Schema(String),
    DropData,
    DropAll,
}
