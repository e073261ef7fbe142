//! Harness runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into the client, stores and runner. Cases never read process-wide environment
//! variables themselves, which keeps parallel runs consistent.

use crate::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_API_KEY, DEFAULT_API_VERSION, DEFAULT_AWS_REGION,
    DEFAULT_DB_SCHEMA, DEFAULT_HEALTH_SKEW_SECS, DEFAULT_MAX_LATENCY_MS,
    DEFAULT_MEAN_LATENCY_MS, DEFAULT_PERF_BATCH_SIZE, DEFAULT_S3_BUCKET,
};
use crate::{HarnessError, HarnessResult};
use std::str::FromStr;
use std::time::Duration;

/// Where fixtures are installed and read back from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

/// Where Parquet snapshots are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    S3,
}

/// How to reach the API under test.
#[derive(Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub version: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Scheduling knobs of the case runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerSettings {
    pub workers: usize,
    pub case_timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

/// Timing thresholds asserted by the health and performance cases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub max_latency: Duration,
    pub mean_latency: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    pub health_skew: Duration,
}

#[derive(Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
}

impl PostgresSettings {
    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl std::fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("url", &self.redacted_url())
            .field("schema", &self.schema)
            .finish()
    }
}

#[derive(Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id.as_deref().map(key_hint))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn key_hint(key: &str) -> String {
    let head: String = key.chars().take(4).collect();
    format!("{head}...")
}

/// Everything the harness needs, resolved at startup.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub api: ApiSettings,
    pub runner: RunnerSettings,
    pub thresholds: Thresholds,
    /// Probe the database and object storage from the health group.
    pub infra_checks: bool,
    pub store: StoreBackend,
    pub postgres: PostgresSettings,
    pub storage: StorageSettings,
}

impl HarnessConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    ///
    /// Blank values count as unset. Unparseable numbers, zero worker or batch counts and
    /// unknown backends are configuration errors.
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let base_url = text("API_BASE_URL", DEFAULT_API_BASE_URL);
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HarnessError::Config(format!(
                "API_BASE_URL must be an http(s) URL, got '{base_url}'"
            )));
        }

        let api = ApiSettings {
            base_url,
            version: text("API_VERSION", DEFAULT_API_VERSION)
                .trim_matches('/')
                .to_string(),
            api_key: text("API_KEY", DEFAULT_API_KEY),
            request_timeout: millis(&get, "REQUEST_TIMEOUT_MS", 5_000)?,
        };

        let runner = RunnerSettings {
            workers: positive(&get, "WORKERS", 4)?,
            case_timeout: millis(&get, "CASE_TIMEOUT_MS", 30_000)?,
            retry_count: parse_or(&get, "RETRY_COUNT", 2)?,
            retry_delay: millis(&get, "RETRY_DELAY_MS", 500)?,
        };

        let thresholds = Thresholds {
            max_latency: millis(&get, "MAX_LATENCY_MS", DEFAULT_MAX_LATENCY_MS)?,
            mean_latency: millis(&get, "MEAN_LATENCY_MS", DEFAULT_MEAN_LATENCY_MS)?,
            batch_size: positive(&get, "PERF_BATCH_SIZE", DEFAULT_PERF_BATCH_SIZE)?,
            concurrency: positive(&get, "PERF_CONCURRENCY", 1)?,
            health_skew: Duration::from_secs(parse_or(
                &get,
                "HEALTH_SKEW_SECS",
                DEFAULT_HEALTH_SKEW_SECS,
            )?),
        };

        let store = match text("STORE_BACKEND", "memory").to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres,
            other => {
                return Err(HarnessError::Config(format!(
                    "unknown STORE_BACKEND '{other}' (use 'memory' or 'postgres')"
                )))
            }
        };

        let schema = text("DB_SCHEMA", DEFAULT_DB_SCHEMA);
        if !schema
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(HarnessError::Config(format!(
                "DB_SCHEMA '{schema}' must be a plain identifier"
            )));
        }

        let postgres = PostgresSettings {
            host: text("POSTGRES_HOST", "localhost"),
            port: parse_or(&get, "POSTGRES_PORT", 5432)?,
            user: text("POSTGRES_USER", "postgres"),
            password: text("POSTGRES_PASSWORD", "postgres"),
            database: text("POSTGRES_DB", "postgres"),
            schema,
        };

        let storage_backend = match text("STORAGE_BACKEND", "memory")
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "s3" => StorageBackend::S3,
            other => {
                return Err(HarnessError::Config(format!(
                    "unknown STORAGE_BACKEND '{other}' (use 'memory' or 's3')"
                )))
            }
        };

        let storage = StorageSettings {
            backend: storage_backend,
            bucket: text("S3_BUCKET", DEFAULT_S3_BUCKET),
            region: text("AWS_REGION", DEFAULT_AWS_REGION),
            endpoint: get("S3_ENDPOINT"),
            access_key_id: get("AWS_ACCESS_KEY_ID"),
            secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
        };

        Ok(Self {
            api,
            runner,
            thresholds,
            infra_checks: flag(&get, "INFRA_CHECKS")?,
            store,
            postgres,
            storage,
        })
    }

    /// Log the resolved configuration without secrets.
    pub fn log_summary(&self) {
        tracing::info!(
            base_url = %self.api.base_url,
            version = %self.api.version,
            workers = self.runner.workers,
            "API under test"
        );
        match self.store {
            StoreBackend::Memory => tracing::info!("Fixture store: in-memory"),
            StoreBackend::Postgres => tracing::info!(
                url = %self.postgres.redacted_url(),
                schema = %self.postgres.schema,
                "Fixture store: postgres"
            ),
        }
        match &self.storage.access_key_id {
            Some(key) => tracing::info!("AWS access key ID found (starts with: {})", key_hint(key)),
            None => tracing::info!("AWS_ACCESS_KEY_ID not set, using the default credential chain"),
        }
        tracing::info!(
            backend = ?self.storage.backend,
            bucket = %self.storage.bucket,
            region = %self.storage.region,
            "Object storage"
        );
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> HarnessResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| HarnessError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

fn positive<G>(get: &G, key: &str, default: usize) -> HarnessResult<usize>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value == 0 {
        return Err(HarnessError::Config(format!("{key} must be at least 1")));
    }
    Ok(value)
}

fn millis<G>(get: &G, key: &str, default: u64) -> HarnessResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_millis)
}

fn flag<G>(get: &G, key: &str) -> HarnessResult<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(HarnessError::Config(format!("{key} has invalid value '{v}'"))),
    }
}
