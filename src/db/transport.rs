use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{
    Mutation, MutationResponse, Operation, QueryRequest, QueryResponse, TxnContext,
};
use crate::error::{Result, StoreError};

/// Wire-level access to a Dgraph alpha.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn query(&self, req: QueryRequest<'_>) -> Result<QueryResponse>;
    async fn mutate(&self, start_ts: u64, mu: &Mutation) -> Result<MutationResponse>;
    async fn commit(&self, txn: &TxnContext) -> Result<TxnContext>;
    async fn abort(&self, start_ts: u64) -> Result<()>;
    async fn alter(&self, op: &Operation) -> Result<()>;
    /// Release the connection. Calls after this fail.
    fn close(&self);
}

/// Transport over the Dgraph HTTP API.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(addr: &str, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: normalize_addr(addr),
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Transport("connection closed".into()));
        }
        Ok(format!("{}{}", self.base_url, path))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Transport(format!("{}: {e}", self.base_url)))?;
        let status = resp.status();
        let body = resp.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => Ok(v),
            Err(_) if !status.is_success() => Err(StoreError::Server(format!("{status}: {body}"))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn query(&self, req: QueryRequest<'_>) -> Result<QueryResponse> {
        let mut url = self.url("/query")?;
        let mut params = Vec::new();
        if req.start_ts != 0 {
            params.push(format!("startTs={}", req.start_ts));
        }
        if req.read_only {
            params.push("ro=true".to_string());
        }
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }

        let body = json!({ "query": req.query, "variables": req.vars });
        let raw = self.send(self.http.post(&url).json(&body)).await?;
        let (data, txn) = decode_envelope(raw)?;
        Ok(QueryResponse { json: data, txn })
    }

    async fn mutate(&self, start_ts: u64, mu: &Mutation) -> Result<MutationResponse> {
        let mut url = self.url("/mutate")?;
        let mut params = Vec::new();
        if start_ts != 0 {
            params.push(format!("startTs={start_ts}"));
        }
        if mu.commit_now {
            params.push("commitNow=true".to_string());
        }
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }

        let raw = self.send(self.http.post(&url).json(&mu.body())).await?;
        decode_mutation(raw)
    }

    async fn commit(&self, txn: &TxnContext) -> Result<TxnContext> {
        let url = self.url(&format!("/commit?startTs={}", txn.start_ts))?;
        let body = json!({ "keys": txn.keys, "preds": txn.preds });
        let raw = self.send(self.http.post(&url).json(&body)).await?;
        let (_, ctx) = decode_envelope(raw)?;
        if ctx.aborted {
            return Err(StoreError::TxnAborted);
        }
        Ok(ctx)
    }

    async fn abort(&self, start_ts: u64) -> Result<()> {
        let url = self.url(&format!("/commit?startTs={start_ts}&abort=true"))?;
        let raw = self.send(self.http.post(&url)).await?;
        decode_envelope(raw).map(|_| ())
    }

    async fn alter(&self, op: &Operation) -> Result<()> {
        let url = self.url("/alter")?;
        let req = match op {
            Operation::Schema(schema) => self.http.post(&url).body(schema.clone()),
            Operation::DropData => self.http.post(&url).json(&json!({ "drop_op": "DATA" })),
            Operation::DropAll => self.http.post(&url).json(&json!({ "drop_all": true })),
        };
        let raw = self.send(req).await?;
        decode_envelope(raw).map(|_| ())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(addr = %self.base_url, "dgraph transport closed");
        }
    }
}

fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<ServerError>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Extensions {
    #[serde(default)]
    txn: TxnContext,
}

/// Split a response into its `data` block and transaction context, turning
/// an `errors` block into an error.
pub(crate) fn decode_envelope(raw: Value) -> Result<(Value, TxnContext)> {
    let env: Envelope = serde_json::from_value(raw)?;
    if !env.errors.is_empty() {
        let msg = env
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if msg.to_lowercase().contains("aborted") {
            return Err(StoreError::TxnAborted);
        }
        return Err(StoreError::Server(msg));
    }
    let txn = env.extensions.map(|e| e.txn).unwrap_or_default();
    Ok((env.data, txn))
}

pub(crate) fn decode_mutation(raw: Value) -> Result<MutationResponse> {
    let (data, txn) = decode_envelope(raw)?;
    let uids = match data.get("uids") {
        Some(v) if !v.is_null() => serde_json::from_value::<HashMap<String, String>>(v.clone())?,
        _ => HashMap::new(),
    };
    let queries = data.get("queries").cloned().unwrap_or(Value::Null);
    Ok(MutationResponse { uids, queries, txn })
}
