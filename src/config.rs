//! Runtime configuration
//!
//! Layered with figment: built-in defaults < TOML file < `CHAT_*` environment
//! variables. The TOML path defaults to `./chat-gateway.toml` and can be moved
//! with `CHAT_CONFIG`.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::auth::MIN_SECRET_LEN;

pub const DEFAULT_CONFIG_PATH: &str = "./chat-gateway.toml";
pub const ENV_PREFIX: &str = "CHAT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("jwt_secret must be at least {0} characters")]
    SecretTooShort(usize),

    #[error("ping_interval_secs ({ping}) must be shorter than pong_wait_secs ({pong_wait})")]
    PingNotShorterThanPongWait { ping: u64, pong_wait: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub host: String,
    pub port: u16,
    /// HS256 signing secret for bearer tokens
    pub jwt_secret: String,
    pub ticket_retention_secs: u64,
    pub ticket_sweep_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_wait_secs: u64,
    /// Outbound queue depth per session
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    /// Delay before resubscribing to the change feed
    pub feed_backoff_secs: u64,
    /// Buffered notifications per subscriber of the in-process feed
    pub feed_capacity: usize,
    /// Structured JSON log output
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: String::new(),
            ticket_retention_secs: 30,
            ticket_sweep_secs: 5,
            ping_interval_secs: 27,
            pong_wait_secs: 30,
            outbound_queue: 64,
            max_frame_bytes: 4096,
            feed_backoff_secs: 2,
            feed_capacity: 1024,
            log_json: false,
        }
    }
}

impl Config {
    /// Load and validate the configuration
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config: Config = Self::figment(Toml::file(path))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `toml`, then the environment
    pub fn figment(toml: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort(MIN_SECRET_LEN));
        }
        if self.ping_interval_secs >= self.pong_wait_secs {
            return Err(ConfigError::PingNotShorterThanPongWait {
                ping: self.ping_interval_secs,
                pong_wait: self.pong_wait_secs,
            });
        }
        for (name, value) in [
            ("ping_interval_secs", self.ping_interval_secs),
            ("ticket_retention_secs", self.ticket_retention_secs),
            ("ticket_sweep_secs", self.ticket_sweep_secs),
            ("outbound_queue", self.outbound_queue as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ticket_retention(&self) -> Duration {
        Duration::from_secs(self.ticket_retention_secs)
    }

    pub fn ticket_sweep(&self) -> Duration {
        Duration::from_secs(self.ticket_sweep_secs)
    }

    pub fn feed_backoff(&self) -> Duration {
        Duration::from_secs(self.feed_backoff_secs)
    }
}
