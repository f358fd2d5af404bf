use std::time::Duration;

/// Upper bound for every `*_SECS` setting (one day).
const MAX_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    pub retry_interval: Duration,
}

/// Timeouts for an HTTP facade in front of the stores.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub addr: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| -> anyhow::Result<Duration> {
            match get(key) {
                Some(v) => {
                    let n = v
                        .trim()
                        .parse::<u64>()
                        .map_err(|e| anyhow::anyhow!("{key}={v}: {e}"))?;
                    anyhow::ensure!(n <= MAX_SECS, "{key}={n} exceeds {MAX_SECS}");
                    Ok(Duration::from_secs(n))
                }
                None => Ok(Duration::from_secs(default)),
            }
        };

        let db = DbConfig {
            addr: get("DGRAPH_ADDR").unwrap_or_else(|| "http://localhost:8080".into()),
            connect_timeout: secs("DGRAPH_CONNECT_TIMEOUT_SECS", 5)?,
            request_timeout: secs("DGRAPH_REQUEST_TIMEOUT_SECS", 30)?,
            health_timeout: secs("DGRAPH_HEALTH_TIMEOUT_SECS", 30)?,
            retry_interval: secs("DGRAPH_RETRY_INTERVAL_SECS", 5)?,
        };
        anyhow::ensure!(!db.addr.trim().is_empty(), "DGRAPH_ADDR is empty");
        anyhow::ensure!(
            !db.retry_interval.is_zero(),
            "DGRAPH_RETRY_INTERVAL_SECS must be at least 1"
        );

        let api = ApiConfig {
            addr: get("API_ADDR").unwrap_or_else(|| "0.0.0.0:8081".into()),
            read_timeout: secs("API_READ_TIMEOUT_SECS", 5)?,
            write_timeout: secs("API_WRITE_TIMEOUT_SECS", 10)?,
            idle_timeout: secs("API_IDLE_TIMEOUT_SECS", 120)?,
        };

        Ok(Self { db, api })
    }
}
