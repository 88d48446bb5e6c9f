use std::time::Duration;

/// Immutable application configuration, loaded once at startup and passed
/// explicitly into the services that need it.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Route prefix for token and record routes (e.g. `/api`).
    pub api_prefix: String,
    pub environment: String,
    pub mongodb_uri: String,
    pub mongodb_username: Option<String>,
    pub mongodb_password: Option<String>,
    /// Default database scope used for administrator requests that carry no
    /// explicit `X-Database-Name` override.
    pub default_database: Option<String>,
    pub timeseries_collection: String,
    pub max_pool_size: u32,
    /// Time-series `timeField` for provisioned collections.
    pub time_field: String,
    /// Time-series `metaField`; `None` disables it.
    pub meta_field: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Static administrator secret. Compared in constant time; never logged.
    pub api_admin_token: String,
    /// Whether `POST /tokens` is registered at all.
    pub enable_token_creation_route: bool,
    pub tokens_collection: String,
    /// Minimum interval between lazy sweeps of expired time-series
    /// documents. Zero means sweep on every collection access.
    pub cleanup_interval_seconds: u64,
}

impl Config {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

const INSECURE_ADMIN_PLACEHOLDER: &str = "CHANGE_ME_ADMIN_TOKEN";

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

    let api_admin_token = std::env::var("API_ADMIN_TOKEN")
        .unwrap_or_else(|_| INSECURE_ADMIN_PLACEHOLDER.into());

    if api_admin_token == INSECURE_ADMIN_PLACEHOLDER {
        if environment == "production" {
            anyhow::bail!(
                "API_ADMIN_TOKEN is still the insecure placeholder. \
                 Set a proper administrator secret before running in production."
            );
        }
        eprintln!("⚠️  API_ADMIN_TOKEN is not set — using insecure placeholder. Set a real secret for production.");
    }

    Ok(Config {
        port: std::env::var("TSGATE_PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .unwrap_or(8000),
        api_prefix: std::env::var("API_PREFIX").unwrap_or_else(|_| "/api".into()),
        environment,
        mongodb_uri: std::env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".into()),
        mongodb_username: std::env::var("MONGODB_USERNAME").ok().filter(|s| !s.is_empty()),
        mongodb_password: std::env::var("MONGODB_PASSWORD").ok().filter(|s| !s.is_empty()),
        default_database: std::env::var("MONGODB_DATABASE").ok().filter(|s| !s.is_empty()),
        timeseries_collection: std::env::var("MONGODB_COLLECTION")
            .unwrap_or_else(|_| "measurements".into()),
        max_pool_size: std::env::var("MONGODB_MAX_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        time_field: std::env::var("TIMESERIES_TIME_FIELD")
            .unwrap_or_else(|_| "timestamp".into()),
        meta_field: match std::env::var("TIMESERIES_META_FIELD") {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(value),
            Err(_) => Some("metadata".into()),
        },
        allowed_origins: std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        api_admin_token,
        enable_token_creation_route: std::env::var("ENABLE_TOKEN_CREATION_ROUTE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false),
        tokens_collection: std::env::var("API_TOKENS_COLLECTION")
            .unwrap_or_else(|_| "api_tokens".into()),
        cleanup_interval_seconds: std::env::var("EXPIRATION_CLEANUP_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    })
}
