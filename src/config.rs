//! Configuration for the stores and the service facade.
//!
//! Settings are read once at start-up and handed to constructors; nothing in the crate reads
//! configuration per call. [`Settings::load`] layers, from lowest to highest priority:
//!
//! 1. built-in defaults,
//! 2. `config/default.{toml,yaml,json,...}` (optional),
//! 3. `config/{APP_ENV}.*` (optional, `APP_ENV` defaults to `development`),
//! 4. `ROLLCALL__*` environment variables, e.g. `ROLLCALL__REDIS__URL` or
//!    `ROLLCALL__RATE_LIMIT__EXEMPT=127.0.0.1,::1`.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT: u64 = 2;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisSettings,
    pub session: SessionSettings,
    pub token: TokenSettings,
    pub rate_limit: RateLimitSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                Environment::with_prefix("ROLLCALL")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.exempt")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Connection target and timeouts for [`RedisStore`](crate::store::RedisStore).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

impl RedisSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// How long a session stays open unless closed first.
    pub ttl_secs: u64,
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenSettings {
    /// How long an issued access token can be redeemed.
    pub ttl_secs: u64,
}

impl TokenSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests allowed per client within one window.
    pub limit: u64,
    pub window_secs: u64,
    /// Client identities that are never throttled.
    pub exempt: Vec<String>,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
            exempt: vec!["127.0.0.1".to_string()],
        }
    }
}
