use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Background sweep cadence and batch sizing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub reconcile_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub usage_interval_secs: u64,
    pub reconcile_batch_size: i64,
    /// Orders are re-queried no sooner than this after their last check.
    pub recheck_after_secs: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 300,
            retry_interval_secs: 600,
            usage_interval_secs: 3600,
            reconcile_batch_size: 50,
            recheck_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub workers: WorkerConfig,
    /// Wait before retry attempt N, in minutes. The last entry repeats.
    pub retry_backoff_minutes: Vec<i64>,
    pub provider_cache_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?;

        let mut server = ServerConfig::default();
        if let Ok(host) = std::env::var("HOST") {
            server.host = host;
        }
        server.port = env_parse("PORT", server.port)?;

        let database = DatabaseConfig {
            url: database_url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 20)?,
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 5)?,
            connection_timeout_secs: env_parse("DATABASE_CONNECTION_TIMEOUT_SECONDS", 30)?,
            idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT_SECONDS", 600)?,
        };

        let mut workers = WorkerConfig::default();
        workers.reconcile_interval_secs =
            env_parse("RECONCILE_INTERVAL_SECONDS", workers.reconcile_interval_secs)?;
        workers.retry_interval_secs =
            env_parse("RETRY_INTERVAL_SECONDS", workers.retry_interval_secs)?;
        workers.usage_interval_secs =
            env_parse("USAGE_SYNC_INTERVAL_SECONDS", workers.usage_interval_secs)?;
        workers.reconcile_batch_size =
            env_parse("RECONCILE_BATCH_SIZE", workers.reconcile_batch_size)?;
        workers.recheck_after_secs =
            env_parse("RECONCILE_RECHECK_AFTER_SECONDS", workers.recheck_after_secs)?;

        Ok(Self {
            server,
            database,
            workers,
            retry_backoff_minutes: parse_backoff_minutes(
                std::env::var("RETRY_BACKOFF_MINUTES").ok().as_deref(),
            )?,
            provider_cache_ttl_secs: env_parse("PROVIDER_CACHE_TTL_SECONDS", 60)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

fn parse_backoff_minutes(raw: Option<&str>) -> Result<Vec<i64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(vec![5, 15, 60]);
    };
    let windows = raw
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::InvalidValue {
            var: "RETRY_BACKOFF_MINUTES",
            value: raw.to_string(),
        })?;
    if windows.is_empty() || windows.iter().any(|w| *w < 0) {
        return Err(ConfigError::InvalidValue {
            var: "RETRY_BACKOFF_MINUTES",
            value: raw.to_string(),
        });
    }
    Ok(windows)
}
