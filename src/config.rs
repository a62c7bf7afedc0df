use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::agent::{AgentSettings, DEFAULT_MAX_TURNS, DEFAULT_MODEL, OPENAI_BASE_URL};
use crate::dispatcher::{DispatchConfig, MAX_CHUNK};
use crate::rate_limiter::{DEFAULT_CAPACITY, MIN_INTERVAL};
use crate::tools::WIKIPEDIA_API_URL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("minimum interval must be a non-negative number of seconds, got {0}")]
    InvalidInterval(f64),
    #[error("rate gate capacity must be at least 1")]
    ZeroCapacity,
    #[error("max turns must be at least 1")]
    ZeroTurns,
    #[error("invalid webhook url {url}: {source}")]
    WebhookUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid listen address {0}")]
    ListenAddr(String),
}

/// Runtime settings, read from flags or the environment (`.env` included).
#[derive(Parser, Debug, Clone)]
#[command(name = "knoll", version, about = "Telegram front end for the Knoll assistant")]
pub struct Config {
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: String,

    /// Public base URL; Telegram is pointed at `<url>/webhook`.
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "KNOLL_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "KNOLL_MAX_TURNS", default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,

    #[arg(long, env = "KNOLL_AGENT_TIMEOUT_SECS", default_value_t = 120)]
    pub agent_timeout_secs: u64,

    #[arg(long, env = "WIKIPEDIA_API_URL", default_value = WIKIPEDIA_API_URL)]
    pub wikipedia_api_url: String,

    #[arg(long, env = "KNOLL_MIN_INTERVAL_SECS", default_value_t = MIN_INTERVAL)]
    pub min_interval_secs: f64,

    #[arg(long, env = "KNOLL_GATE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub gate_capacity: usize,

    #[arg(long, env = "KNOLL_LEAD_DELAY_MS", default_value_t = 1000)]
    pub lead_delay_ms: u64,

    #[arg(long, env = "KNOLL_CHUNK_DELAY_MS", default_value_t = 1000)]
    pub chunk_delay_ms: u64,

    #[arg(long, env = "KNOLL_DRAIN_TIMEOUT_SECS", default_value_t = 10)]
    pub drain_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_interval_secs.is_finite() || self.min_interval_secs < 0.0 {
            return Err(ConfigError::InvalidInterval(self.min_interval_secs));
        }
        if self.gate_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_turns == 0 {
            return Err(ConfigError::ZeroTurns);
        }
        if let Some(url) = &self.webhook_url {
            url::Url::parse(url).map_err(|source| ConfigError::WebhookUrl {
                url: url.clone(),
                source,
            })?;
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::ListenAddr(addr))
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            base_url: self.openai_base_url.clone(),
            api_key: self.openai_api_key.clone(),
            model: self.model.clone(),
            max_turns: self.max_turns,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_chunk: MAX_CHUNK,
            lead_delay: Duration::from_millis(self.lead_delay_ms),
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "knoll",
            "--telegram-token",
            "123:abc",
            "--openai-api-key",
            "sk-test",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).expect("valid args")
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = parse(&["--port", "8080", "--min-interval-secs", "2"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.min_interval_secs, 2.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
    }

    #[test]
    fn dispatch_config_uses_milliseconds() {
        let config = parse(&["--lead-delay-ms", "250", "--chunk-delay-ms", "500"]);
        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.lead_delay, Duration::from_millis(250));
        assert_eq!(dispatch.chunk_delay, Duration::from_millis(500));
        assert_eq!(dispatch.max_chunk, 4096);
    }

    #[test]
    fn rejects_bad_webhook_url() {
        let config = parse(&["--webhook-url", "not a url"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WebhookUrl { .. })
        ));
    }

    #[test]
    fn rejects_negative_interval() {
        let config = parse(&["--min-interval-secs=-1"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = parse(&["--gate-capacity", "0"]);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
    }
}
