//! Connection to the Dgraph database: transport, transactions and the
//! startup health check.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};

use crate::config::DbConfig;
use crate::context::Context;
use crate::error::{Result, StoreError};

mod transport;
mod txn;
mod types;

pub use transport::{HttpTransport, Transport};
pub use txn::Txn;
pub use types::{
    node_json, vars, Mutation, MutationResponse, Operation, QueryRequest, QueryResponse, TxnContext,
    Vars,
};

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);
const PING_QUERY: &str = r#"
    {
        result(func: has(dgraph.type), first: 1) {
            uid
        }
    }
"#;

/// Shared handle to the database. Cheap to clone; every clone uses the same
/// pooled transport.
#[derive(Clone)]
pub struct Dgraph {
    transport: Arc<dyn Transport>,
}

impl Dgraph {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn new_txn(&self) -> Txn {
        Txn::new(Arc::clone(&self.transport), false)
    }

    pub fn new_read_only_txn(&self) -> Txn {
        Txn::new(Arc::clone(&self.transport), true)
    }

    pub async fn alter(&self, ctx: &Context, op: Operation) -> Result<()> {
        ctx.run(self.transport.alter(&op)).await
    }

    /// Block until the database answers a trivial query, retrying every
    /// `retry_interval`. Fails once `ctx` is cancelled or past its deadline.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn health_check(&self, ctx: &Context, retry_interval: Duration) -> Result<()> {
        // a zero period would panic in the ticker; retry right away instead
        let retry_interval = retry_interval.max(MIN_RETRY_INTERVAL);
        let mut ticker = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.ping(ctx).await {
                Ok(()) => {
                    info!(attempt, "database is up");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "database not ready"),
            }

            if let Some(err) = ctx.err() {
                return Err(StoreError::internal("health check timed out", err));
            }

            let ticker = ticker.get_or_insert_with(|| {
                let mut t = interval_at(Instant::now() + retry_interval, retry_interval);
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                t
            });

            tokio::select! {
                err = ctx.done() => {
                    return Err(StoreError::internal("health check timed out", err));
                }
                _ = ticker.tick() => {}
            }
        }
    }

    async fn ping(&self, ctx: &Context) -> Result<()> {
        let ctx = ctx.with_timeout(PING_TIMEOUT);
        let mut txn = self.new_read_only_txn();
        txn.query(&ctx, PING_QUERY).await.map(|_| ())
    }
}

/// Releases the transport exactly once, either through `close` or on drop.
pub struct Teardown {
    transport: Option<Arc<dyn Transport>>,
}

impl Teardown {
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(t) = self.transport.take() {
            t.close();
            info!("dgraph connection closed");
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open a connection to the configured Dgraph alpha.
pub fn open(cfg: &DbConfig) -> Result<(Dgraph, Teardown)> {
    let transport = HttpTransport::new(&cfg.addr, cfg.connect_timeout, cfg.request_timeout)?;
    info!(addr = %transport.base_url(), "dgraph connection opened");
    Ok(with_transport(Arc::new(transport)))
}

/// Wrap an existing transport in a handle and its teardown guard.
pub fn with_transport(transport: Arc<dyn Transport>) -> (Dgraph, Teardown) {
    let teardown = Teardown {
        transport: Some(Arc::clone(&transport)),
    };
    (Dgraph::new(transport), teardown)
}
