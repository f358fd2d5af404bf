use anyhow::Context as _;
use time::OffsetDateTime;

use userdir::config::AppConfig;
use userdir::{db, Context, Schema};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "userdir=debug,reqwest=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load config")?;
    tracing::info!(
        dgraph = %config.db.addr,
        api = %config.api.addr,
        "starting"
    );

    let (dgraph, teardown) = db::open(&config.db).context("open dgraph connection")?;

    let ctx = Context::background();
    let health = ctx.with_timeout(config.db.health_timeout);
    dgraph
        .health_check(&health, config.db.retry_interval)
        .await
        .context("wait for dgraph")?;

    let schema = Schema::new(dgraph.clone()).context("render schema")?;
    schema.init_schema(&ctx).await.context("apply schema")?;
    let roles = schema
        .init_roles(&ctx, OffsetDateTime::now_utc())
        .await
        .context("seed roles")?;
    for role in &roles {
        tracing::info!(role = %role.name, uid = %role.uid, "role ready");
    }

    teardown.close();
    Ok(())
}
