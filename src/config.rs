use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Which cache gateway the resolver talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis {
        url: String,
        key_prefix: String,
        connect_timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// SQLite connection string, e.g. "sqlite:./shortlink.db"
    pub database_url: String,

    pub cache: CacheBackend,

    /// Settings consumed by the writer and the resolver.
    pub core: CoreConfig,

    /// Upper bound on a single create/resolve/lookup call made by a handler.
    pub request_timeout: Duration,

    /// How often the store deletes rows past their retention expiry.
    pub retention_sweep_interval: Duration,
}

/// Knobs of the code generation and resolution engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of characters in every generated code.
    pub code_len: usize,

    /// Default cache TTL for a resolved code.
    pub code_ttl_secs: u64,

    /// TTL of the negative sentinel written for unknown or expired codes.
    pub not_found_ttl_secs: u64,

    /// Reserved cache value meaning "confirmed absent". Never a real URL.
    pub cache_not_found_value: String,

    /// Timeout for the HEAD/GET liveness probe of a long URL.
    pub long_url_timeout: Duration,

    /// How long a row is kept after its deadline before it may be purged.
    pub expired_keep_days: i64,

    /// Status used for successful redirects (301, 302, 303, 307 or 308).
    pub redirect_status_code: u16,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            code_len: 6,
            code_ttl_secs: 3600,
            not_found_ttl_secs: 3600,
            cache_not_found_value: "__shortlink_not_found__".into(),
            long_url_timeout: Duration::from_secs(5),
            expired_keep_days: 7,
            redirect_status_code: 302,
        }
    }
}

impl CoreConfig {
    /// Reject combinations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.code_len == 0 || self.code_len > crate::codegen::MAX_CODE_LEN {
            bail!(
                "CODE_LEN must be between 1 and {}",
                crate::codegen::MAX_CODE_LEN
            );
        }
        if self.code_ttl_secs == 0 || self.not_found_ttl_secs == 0 {
            bail!("CODE_TTL_SECS and NOT_FOUND_TTL_SECS must be positive");
        }
        if self.cache_not_found_value.trim().is_empty() {
            bail!("CACHE_NOT_FOUND_VALUE must not be empty");
        }
        // A sentinel that looks like a redirect target would be served as one.
        if let Ok(u) = url::Url::parse(&self.cache_not_found_value) {
            if u.scheme() == "http" || u.scheme() == "https" {
                bail!("CACHE_NOT_FOUND_VALUE must not be an http(s) URL");
            }
        }
        if self.expired_keep_days < 0 {
            bail!("EXPIRED_KEEP_DAYS must not be negative");
        }
        if !matches!(self.redirect_status_code, 301 | 302 | 303 | 307 | 308) {
            bail!("REDIRECT_STATUS_CODE must be one of 301, 302, 303, 307, 308");
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = get("PORT")
            .unwrap_or_else(|| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let cache = match get("CACHE_BACKEND")
            .unwrap_or_else(|| "memory".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => CacheBackend::Memory,
            "redis" => CacheBackend::Redis {
                url: get("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/0".into()),
                key_prefix: get("REDIS_KEY_PREFIX").unwrap_or_else(|| "shortlink:".into()),
                connect_timeout: Duration::from_secs(parse_or(
                    &get,
                    "REDIS_CONNECT_TIMEOUT_SECS",
                    5,
                )?),
            },
            other => bail!("CACHE_BACKEND must be 'memory' or 'redis', got '{other}'"),
        };

        let defaults = CoreConfig::default();

        let code_ttl_secs = parse_or(&get, "CODE_TTL_SECS", defaults.code_ttl_secs)?;
        let core = CoreConfig {
            code_len: parse_or(&get, "CODE_LEN", defaults.code_len)?,
            code_ttl_secs,
            not_found_ttl_secs: parse_or(&get, "NOT_FOUND_TTL_SECS", code_ttl_secs)?,
            cache_not_found_value: get("CACHE_NOT_FOUND_VALUE")
                .unwrap_or(defaults.cache_not_found_value),
            long_url_timeout: Duration::from_secs(parse_or(&get, "LONG_URL_TIMEOUT_SECS", 5)?),
            expired_keep_days: parse_or(&get, "EXPIRED_KEEP_DAYS", defaults.expired_keep_days)?,
            redirect_status_code: parse_or(
                &get,
                "REDIRECT_STATUS_CODE",
                defaults.redirect_status_code,
            )?,
        };
        core.validate()?;

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:./shortlink.db".into()),
            cache,
            core,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 10)?),
            retention_sweep_interval: Duration::from_secs(parse_or(
                &get,
                "RETENTION_SWEEP_SECS",
                3600,
            )?),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
