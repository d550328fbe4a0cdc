//! Layered configuration: compiled-in defaults, overridden by config
//! files, overridden by environment variables — the same three-tier
//! `config` crate pattern as the original cluster service.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub server: ServerConfig,
    pub farms: Vec<FarmConfig>,
    pub breaker: BreakerConfig,
    pub logging: LoggingConfig,
    pub job_prefix: String,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

/// One farm entry as read from `dispatch.toml` / env, mirroring the
/// `{match, hosts, maxRunning}` external schema.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FarmConfig {
    #[serde(rename = "match", default)]
    pub pattern: String,
    pub hosts: Vec<String>,
    #[serde(rename = "maxRunning", default = "default_max_running")]
    pub max_running: u32,
}

fn default_max_running() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerConfig {
    pub max_fails: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:8088".to_string(),
            },
            farms: vec![],
            breaker: BreakerConfig {
                max_fails: 5,
                reset_timeout_secs: 60,
            },
            logging: LoggingConfig {
                level: "info,docker_executor=debug".to_string(),
                format: LogFormat::Pretty,
            },
            job_prefix: "fastlane-job".to_string(),
            reap_interval_secs: 300,
        }
    }
}

impl DispatchConfig {
    /// Loads defaults, layers `/etc/docker-executor/dispatch`,
    /// `config/dispatch`, and `dispatch` (all optional), then env vars
    /// under the `DISPATCH__` prefix, then an optional `.env` file's
    /// breaker-tuning overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&DispatchConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        for path in ["/etc/docker-executor/dispatch", "config/dispatch", "dispatch"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DISPATCH")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: DispatchConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        if let Ok(max_fails) = std::env::var("CIRCUIT_BREAKER_MAX_FAILS") {
            loaded.breaker.max_fails = max_fails
                .parse()
                .context("CIRCUIT_BREAKER_MAX_FAILS must be an integer")?;
        }
        if let Ok(reset_timeout) = std::env::var("CIRCUIT_BREAKER_RESET_TIMEOUT_SECONDS") {
            loaded.breaker.reset_timeout_secs = reset_timeout
                .parse()
                .context("CIRCUIT_BREAKER_RESET_TIMEOUT_SECONDS must be an integer")?;
        }

        Ok(loaded)
    }

    /// Checks the bind address parses and that every farm's pattern
    /// compiles; a farm with an empty pattern must be last.
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .context("invalid bind_address")?;

        for (i, farm) in self.farms.iter().enumerate() {
            if !farm.pattern.is_empty() {
                regex::Regex::new(&farm.pattern)
                    .with_context(|| format!("farm {i} has an invalid match pattern"))?;
            } else if i != self.farms.len() - 1 {
                tracing::warn!(farm_index = i, "farm with no match pattern is not last; later farms are unreachable");
            }
        }

        Ok(())
    }
}
