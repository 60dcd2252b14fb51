use std::net::IpAddr;

use thiserror::Error;

use crate::config_env::{optional_trimmed_env, parse_env_or, parse_ip_list_env, require_env};
use crate::llm::ChatCompletionsConfig;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CONVERSATION_TTL_SECONDS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 120;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_MAX_REQUEST_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { redis_url: String },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub conversation_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub store_backend: StoreBackend,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub trusted_proxy_ips: Vec<IpAddr>,
    pub max_request_body_bytes: usize,
    pub pdfium_library_dir: Option<String>,
    pub llm: Option<ChatCompletionsConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let conversation_ttl_seconds =
            parse_env_or("CONVERSATION_TTL_SECONDS", DEFAULT_CONVERSATION_TTL_SECONDS)?;
        let sweep_interval_seconds = parse_env_or(
            "CONVERSATION_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let rate_limit_window_seconds =
            parse_env_or("RATE_LIMIT_WINDOW_SECONDS", DEFAULT_RATE_LIMIT_WINDOW_SECONDS)?;

        for (key, value) in [
            ("CONVERSATION_TTL_SECONDS", conversation_ttl_seconds),
            ("CONVERSATION_SWEEP_INTERVAL_SECONDS", sweep_interval_seconds),
            ("RATE_LIMIT_WINDOW_SECONDS", rate_limit_window_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        Ok(Self {
            bind_addr: optional_trimmed_env("RELAY_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            conversation_ttl_seconds,
            sweep_interval_seconds,
            store_backend: parse_store_backend()?,
            rate_limit_max_requests: parse_env_or(
                "RATE_LIMIT_MAX_REQUESTS",
                DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            )?,
            rate_limit_window_seconds,
            trusted_proxy_ips: parse_ip_list_env("TRUSTED_PROXY_IPS")?,
            max_request_body_bytes: parse_env_or(
                "MAX_REQUEST_BODY_BYTES",
                DEFAULT_MAX_REQUEST_BODY_BYTES,
            )?,
            pdfium_library_dir: optional_trimmed_env("PDFIUM_LIBRARY_DIR"),
            llm: ChatCompletionsConfig::from_env()?,
        })
    }
}

pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

fn parse_store_backend() -> Result<StoreBackend, ConfigError> {
    let raw = optional_trimmed_env("CONVERSATION_STORE").unwrap_or_else(|| "memory".to_string());
    match raw.to_ascii_lowercase().as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "redis" => Ok(StoreBackend::Redis {
            redis_url: require_env("REDIS_URL")?,
        }),
        other => Err(ConfigError::InvalidConfiguration(format!(
            "CONVERSATION_STORE must be 'memory' or 'redis', got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const MANAGED_VARS: &[&str] = &[
        "RELAY_BIND_ADDR",
        "CONVERSATION_TTL_SECONDS",
        "CONVERSATION_SWEEP_INTERVAL_SECONDS",
        "CONVERSATION_STORE",
        "REDIS_URL",
        "RATE_LIMIT_MAX_REQUESTS",
        "RATE_LIMIT_WINDOW_SECONDS",
        "TRUSTED_PROXY_IPS",
        "MAX_REQUEST_BODY_BYTES",
        "PDFIUM_LIBRARY_DIR",
        "LLM_API_KEY",
        "LLM_CHAT_COMPLETIONS_URL",
        "LLM_MODEL",
        "LLM_TIMEOUT_MS",
        "LLM_MAX_TOKENS",
    ];

    fn clear_env() {
        for key in MANAGED_VARS {
            // SAFETY: tests touching the environment are serialized.
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized.
        unsafe { std::env::set_var(key, value) };
    }

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_empty() {
        clear_env();

        let config = RelayConfig::from_env().expect("defaults should parse");
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.conversation_ttl_seconds, 3600);
        assert_eq!(config.sweep_interval_seconds, 120);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.trusted_proxy_ips.is_empty());
        assert!(config.llm.is_none());
    }

    #[test]
    #[serial]
    fn redis_backend_requires_url() {
        clear_env();
        set_env("CONVERSATION_STORE", "redis");

        let err = RelayConfig::from_env().expect_err("missing REDIS_URL should fail");
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "REDIS_URL"));

        set_env("REDIS_URL", "redis://127.0.0.1:6379");
        let config = RelayConfig::from_env().expect("redis config should parse");
        assert_eq!(
            config.store_backend,
            StoreBackend::Redis {
                redis_url: "redis://127.0.0.1:6379".to_string()
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_zero_ttl_and_bad_integers() {
        clear_env();
        set_env("CONVERSATION_TTL_SECONDS", "0");
        assert!(matches!(
            RelayConfig::from_env(),
            Err(ConfigError::InvalidConfiguration(_))
        ));

        clear_env();
        set_env("RATE_LIMIT_MAX_REQUESTS", "lots");
        assert!(matches!(
            RelayConfig::from_env(),
            Err(ConfigError::ParseInt(ref key)) if key == "RATE_LIMIT_MAX_REQUESTS"
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn api_key_enables_provider_config() {
        clear_env();
        set_env("LLM_API_KEY", "gsk-test");
        set_env("LLM_MODEL", "test-model");

        let config = RelayConfig::from_env().expect("provider config should parse");
        let llm = config.llm.expect("provider config should be present");
        assert_eq!(llm.api_key, "gsk-test");
        assert_eq!(llm.model, "test-model");
        clear_env();
    }
}
