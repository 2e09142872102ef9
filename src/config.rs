//! Server configuration from flags and environment

use std::time::Duration;

use clap::Parser;

use crate::providers::RetryPolicy;
use crate::scoring::DEFAULT_DOMAIN_WEIGHT;

#[derive(Debug, Clone, Parser)]
#[command(name = "agentlab", about = "Work-coordination server for research agent labs")]
pub struct ServerConfig {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:agentlab.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Base URL of the literature search service
    #[arg(long, env = "LITERATURE_PROVIDER_URL")]
    pub literature_provider_url: Option<String>,

    /// Base URL of the analysis service
    #[arg(long, env = "ANALYSIS_PROVIDER_URL")]
    pub analysis_provider_url: Option<String>,

    /// Bearer key sent to both providers
    #[arg(long, env = "PROVIDER_API_KEY", hide_env_values = true)]
    pub provider_api_key: Option<String>,

    /// Per-attempt timeout for upstream calls
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub provider_timeout_secs: u64,

    /// Share of the final score taken from the domain adapter
    #[arg(
        long,
        env = "DOMAIN_WEIGHT",
        default_value_t = DEFAULT_DOMAIN_WEIGHT,
        value_parser = parse_domain_weight
    )]
    pub domain_weight: f64,

    #[arg(long, env = "PROVIDER_MAX_ATTEMPTS", default_value_t = 5)]
    pub provider_max_attempts: u32,

    #[arg(long, env = "PROVIDER_RETRY_BASE_MS", default_value_t = 1000)]
    pub provider_retry_base_ms: u64,

    #[arg(long, env = "PROVIDER_RETRY_JITTER_MS", default_value_t = 500)]
    pub provider_retry_jitter_ms: u64,
}

fn parse_domain_weight(value: &str) -> Result<f64, String> {
    let weight: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid domain weight {:?}: {}", value, e))?;
    if weight.is_finite() {
        Ok(weight)
    } else {
        Err(format!("domain weight must be a finite number, got {}", value))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:agentlab.db".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            literature_provider_url: None,
            analysis_provider_url: None,
            provider_api_key: None,
            provider_timeout_secs: 30,
            domain_weight: DEFAULT_DOMAIN_WEIGHT,
            provider_max_attempts: 5,
            provider_retry_base_ms: 1000,
            provider_retry_jitter_ms: 500,
        }
    }
}

impl ServerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.provider_max_attempts,
            base_delay: Duration::from_millis(self.provider_retry_base_ms),
            max_jitter: Duration::from_millis(self.provider_retry_jitter_ms),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Domain weight clamped into [0, 1]
    pub fn domain_weight(&self) -> f64 {
        if self.domain_weight.is_finite() {
            self.domain_weight.clamp(0.0, 1.0)
        } else {
            DEFAULT_DOMAIN_WEIGHT
        }
    }

    /// Configured URL, treating a blank value as absent
    pub fn provider_url(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
