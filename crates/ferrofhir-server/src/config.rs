//! Typed server configuration.
//!
//! Values come from an optional `ferrofhir.toml` file with
//! `FERROFHIR_`-prefixed environment overrides; defaults are the
//! production values.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub idempotency: IdempotencyConfig,
    pub notifications: NotificationConfig,
    pub jobs: JobsConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_hours: u64,
    pub cleanup_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub refresh_secs: u64,
    pub delivery_secs: u64,
    pub expiry_secs: u64,
    pub cleanup_secs: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_active_per_kind: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_count: usize,
    pub max_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            idempotency: IdempotencyConfig::default(),
            notifications: NotificationConfig::default(),
            jobs: JobsConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            cleanup_minutes: 60,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 30,
            delivery_secs: 5,
            expiry_secs: 300,
            cleanup_secs: 3600,
            batch_size: 50,
            max_attempts: 5,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_active_per_kind: 5,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_count: 20,
            max_count: 100,
        }
    }
}

impl ServerConfig {
    /// Load from `ferrofhir.toml` (optional) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("ferrofhir").required(false))
            .add_source(config::Environment::with_prefix("FERROFHIR").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
