use std::time::Duration;

use regex::Regex;
use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CLIENT_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_DB_NAME: &str = "crm";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MONGO_URI is not set")]
    MissingMongoUri,
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Normalized exact-match origins, `CLIENT_ORIGIN` first.
    pub allowed_origins: Vec<String>,
    /// Hostname pattern, compiled once here.
    pub origin_pattern: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    /// Explicit database name; falls back to the one in the URI.
    pub database: Option<String>,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: None,
            max_pool_size: 10,
            server_selection_timeout: Duration::from_secs(15),
        }
    }

    /// `MONGO_DB`, else the database named in the URI, else `crm`.
    pub fn database_name<'a>(&'a self, from_uri: Option<&'a str>) -> &'a str {
        self.database
            .as_deref()
            .or(from_uri)
            .unwrap_or(DEFAULT_DB_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
    pub cors: CorsConfig,
    pub drain_timeout: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let uri = var("MONGO_URI").ok_or(ConfigError::MissingMongoUri)?;
        let mut store = StoreConfig::new(uri.trim());
        store.database = var("MONGO_DB");

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let drain_timeout = var("DRAIN_TIMEOUT_SECS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| ConfigError::Invalid {
                        name: "DRAIN_TIMEOUT_SECS",
                        reason: e.to_string(),
                    })
            })
            .transpose()?;

        let client_origin =
            var("CLIENT_ORIGIN").unwrap_or_else(|| DEFAULT_CLIENT_ORIGIN.to_string());
        let extra_origins = var("CORS_ORIGINS").unwrap_or_default();
        let allowed_origins = parse_origin_list(
            std::iter::once(client_origin.as_str()).chain(extra_origins.split(',')),
        );

        let origin_pattern = var("CORS_ORIGIN_REGEX")
            .map(|raw| {
                Regex::new(raw.trim()).map_err(|e| ConfigError::Invalid {
                    name: "CORS_ORIGIN_REGEX",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            env: var("APP_ENV").unwrap_or_else(|| "development".into()),
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            store,
            cors: CorsConfig {
                allowed_origins,
                origin_pattern,
            },
            drain_timeout,
        })
    }
}

/// Trims each entry, strips trailing slashes, drops empties and repeats.
pub fn parse_origin_list<'a>(entries: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for entry in entries {
        let origin = entry.trim().trim_end_matches('/');
        if origin.is_empty() || origins.iter().any(|o| o == origin) {
            continue;
        }
        origins.push(origin.to_string());
    }
    origins
}
