use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Hard cap on a single message page, regardless of configuration.
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
    pub db: DbConfig,
    /// Cord timer used when the caller does not supply one (seconds)
    pub default_self_destruct_secs: i32,
    pub max_self_destruct_secs: i32,
    pub reaper_interval: Duration,
    pub default_page_limit: i64,
    pub moderation_blocklist: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        let port = env_or("PORT", 3000u16);

        let db = DbConfig {
            database_url: database_url.clone(),
            max_connections: env_or("DB_MAX_CONNECTIONS", 20u32),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2u32),
            acquire_timeout: Duration::from_secs(env_or("DB_ACQUIRE_TIMEOUT_SECS", 10u64)),
        };
        if db.min_connections > db.max_connections {
            return Err(AppError::Config(
                "DB_MIN_CONNECTIONS must not exceed DB_MAX_CONNECTIONS".into(),
            ));
        }

        let default_self_destruct_secs = env_or("SELF_DESTRUCT_DEFAULT_SECS", 60i32);
        let max_self_destruct_secs = env_or("SELF_DESTRUCT_MAX_SECS", 7 * 24 * 3600i32);
        if default_self_destruct_secs <= 0 || default_self_destruct_secs > max_self_destruct_secs
        {
            return Err(AppError::Config(format!(
                "SELF_DESTRUCT_DEFAULT_SECS must be in 1..={max_self_destruct_secs}"
            )));
        }

        let reaper_interval = Duration::from_secs(env_or("REAPER_INTERVAL_SECS", 30u64).max(1));
        let default_page_limit = env_or("MESSAGE_PAGE_LIMIT", 50i64).clamp(1, MAX_PAGE_LIMIT);
        let moderation_blocklist = env::var("MODERATION_BLOCKLIST")
            .map(|v| Self::parse_list(&v))
            .unwrap_or_default();

        Ok(Self {
            database_url,
            redis_url,
            port,
            db,
            default_self_destruct_secs,
            max_self_destruct_secs,
            reaper_interval,
            default_page_limit,
            moderation_blocklist,
        })
    }

    /// Defaults for tests and in-memory runs; no environment is read.
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/messaging_test".into(),
            redis_url: None,
            port: 3000,
            db: DbConfig {
                database_url: "postgres://localhost/messaging_test".into(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout: Duration::from_secs(5),
            },
            default_self_destruct_secs: 60,
            max_self_destruct_secs: 7 * 24 * 3600,
            reaper_interval: Duration::from_secs(30),
            default_page_limit: 50,
            moderation_blocklist: Vec::new(),
        }
    }

    /// Resolve the cord timer for a new encrypted conversation.
    pub fn resolve_timer(&self, requested: Option<i32>) -> Result<i32, AppError> {
        match requested {
            None => Ok(self.default_self_destruct_secs),
            Some(secs) if secs > 0 && secs <= self.max_self_destruct_secs => Ok(secs),
            Some(secs) => Err(AppError::InvalidInput(format!(
                "self-destruct timer must be between 1 and {} seconds, got {secs}",
                self.max_self_destruct_secs
            ))),
        }
    }

    /// Clamp a caller-supplied page size.
    pub fn page_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_page_limit)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}
