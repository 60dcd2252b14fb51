use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use crate::config::ConfigError;

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn require_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

pub(crate) fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    optional_trimmed_env(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| ConfigError::ParseInt(key.to_string()))
        })
        .transpose()
}

pub(crate) fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

pub(crate) fn parse_ip_list_env(key: &str) -> Result<Vec<IpAddr>, ConfigError> {
    let raw = optional_trimmed_env(key).unwrap_or_default();
    let mut ips = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let ip = entry.parse::<IpAddr>().map_err(|_| {
            ConfigError::InvalidConfiguration(format!("{key} has a malformed address: {entry}"))
        })?;
        ips.push(ip);
    }

    Ok(ips)
}

pub(crate) fn parse_http_url_env(key: &str, default: &str) -> Result<String, ConfigError> {
    let raw = optional_trimmed_env(key).unwrap_or_else(|| default.to_string());

    match url::Url::parse(&raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(raw),
        Ok(parsed) => Err(ConfigError::InvalidConfiguration(format!(
            "{key} uses unsupported scheme {}",
            parsed.scheme()
        ))),
        Err(err) => Err(ConfigError::InvalidConfiguration(format!(
            "{key} is not a URL: {err}"
        ))),
    }
}
