use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::transport::Transport;
use super::types::{Mutation, MutationResponse, QueryRequest, TxnContext, Vars};
use crate::context::Context;
use crate::error::{Result, StoreError};

/// A Dgraph transaction. Reads see a snapshot at the start timestamp handed
/// out by the first response; writes become visible on `commit`.
///
/// A transaction that is dropped with pending writes is aborted in the
/// background.
pub struct Txn {
    transport: Arc<dyn Transport>,
    ctx: TxnContext,
    read_only: bool,
    mutated: bool,
    finished: bool,
}

impl Txn {
    pub(crate) fn new(transport: Arc<dyn Transport>, read_only: bool) -> Self {
        Self {
            transport,
            ctx: TxnContext::default(),
            read_only,
            mutated: false,
            finished: false,
        }
    }

    pub fn start_ts(&self) -> u64 {
        self.ctx.start_ts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn query(&mut self, ctx: &Context, q: &str) -> Result<Value> {
        self.query_with_vars(ctx, q, &Vars::new()).await
    }

    pub async fn query_with_vars(&mut self, ctx: &Context, q: &str, vars: &Vars) -> Result<Value> {
        if self.finished {
            return Err(StoreError::TxnFinished);
        }
        let req = QueryRequest {
            query: q,
            vars,
            start_ts: self.ctx.start_ts,
            read_only: self.read_only,
        };
        let resp = ctx.run(self.transport.query(req)).await?;
        self.merge(&resp.txn)?;
        Ok(resp.json)
    }

    pub async fn mutate(&mut self, ctx: &Context, mu: Mutation) -> Result<MutationResponse> {
        if self.finished {
            return Err(StoreError::TxnFinished);
        }
        if self.read_only {
            return Err(StoreError::InvalidInput(
                "mutation in a read-only transaction".into(),
            ));
        }
        self.mutated = true;
        let commit_now = mu.commit_now;
        let resp = match ctx.run(self.transport.mutate(self.ctx.start_ts, &mu)).await {
            Ok(resp) => resp,
            Err(e) => {
                // the server-side transaction may still hold our writes
                let _ = self.discard(ctx).await;
                return Err(e);
            }
        };
        if commit_now {
            self.finished = true;
        }
        self.merge(&resp.txn)?;
        Ok(resp)
    }

    pub async fn commit(&mut self, ctx: &Context) -> Result<()> {
        if self.finished {
            return Err(StoreError::TxnFinished);
        }
        self.finished = true;
        if !self.mutated {
            return Ok(());
        }
        match ctx.run(self.transport.commit(&self.ctx)).await {
            Ok(done) => {
                debug!(start_ts = self.ctx.start_ts, commit_ts = done.commit_ts, "txn committed");
                Ok(())
            }
            Err(e) => {
                warn!(start_ts = self.ctx.start_ts, error = %e, "txn commit failed");
                Err(e)
            }
        }
    }

    /// Abort the transaction. A no-op once committed or discarded.
    pub async fn discard(&mut self, ctx: &Context) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.mutated || self.ctx.start_ts == 0 {
            return Ok(());
        }
        match ctx.run(self.transport.abort(self.ctx.start_ts)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // the caller's context is spent; the server still holds our writes
                self.spawn_abort();
                Err(e)
            }
        }
    }

    /// Abort on a detached task, independent of any caller context.
    fn spawn_abort(&self) {
        let transport = Arc::clone(&self.transport);
        let start_ts = self.ctx.start_ts;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = transport.abort(start_ts).await {
                    warn!(start_ts, error = %e, "background abort failed");
                }
            });
        }
    }

    fn merge(&mut self, src: &TxnContext) -> Result<()> {
        if src.start_ts == 0 {
            return Ok(());
        }
        if self.ctx.start_ts == 0 {
            self.ctx.start_ts = src.start_ts;
        } else if self.ctx.start_ts != src.start_ts {
            return Err(StoreError::Server(format!(
                "start timestamp mismatch: {} != {}",
                self.ctx.start_ts, src.start_ts
            )));
        }
        for k in &src.keys {
            if !self.ctx.keys.contains(k) {
                self.ctx.keys.push(k.clone());
            }
        }
        for p in &src.preds {
            if !self.ctx.preds.contains(p) {
                self.ctx.preds.push(p.clone());
            }
        }
        Ok(())
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.finished || !self.mutated || self.ctx.start_ts == 0 {
            return;
        }
        self.spawn_abort();
    }
}
