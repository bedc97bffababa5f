use std::{env, fmt::Display, str::FromStr, time::Duration};

use reqwest::Url;
use thiserror::Error;
use tracing::info;

use crate::domain::value_objects::DEFAULT_CURRENCY;
use crate::services::Retention;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub api_base_url: Url,
    /// Service credential for gateway verification; customer calls use the caller's own token.
    pub api_token: Option<String>,
    /// Where this service is reachable; gateway return URLs are built from it.
    pub public_url: Url,
    /// Storefront pages customers land on after paying.
    pub storefront_url: Url,
    pub nats_url: Option<String>,
    pub request_timeout: Duration,
    pub currency: String,
    pub retention: Retention,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> { Self::from_lookup(|key| env::var(key).ok()) }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port: u16 = parse_or(&get, "PORT", "8083")?;
        let api_base_url = get("API_BASE_URL").ok_or(ConfigError::Missing("API_BASE_URL")).and_then(|v| url("API_BASE_URL", &v))?;
        let public_url = match get("PUBLIC_URL") {
            Some(v) => url("PUBLIC_URL", &v)?,
            None => {
                let default = format!("http://localhost:{port}");
                info!("PUBLIC_URL not set, using default: {default}");
                url("PUBLIC_URL", &default)?
            }
        };
        let timeout = seconds(&get, "REQUEST_TIMEOUT_SECS", "15")?;
        let retention = Retention {
            draft_ttl: seconds(&get, "DRAFT_TTL_SECS", "7200")?,
            pending_payment_ttl: seconds(&get, "PENDING_PAYMENT_TTL_SECS", "86400")?,
            sweep_interval: seconds(&get, "SWEEP_INTERVAL_SECS", "300")?,
        };

        Ok(Self {
            port,
            api_base_url,
            api_token: get("API_TOKEN"),
            public_url,
            storefront_url: parse_or(&get, "STOREFRONT_URL", "http://localhost:3000")?,
            nats_url: get("NATS_URL"),
            request_timeout: timeout,
            currency: get("CURRENCY").map(|c| c.to_uppercase()).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            retention,
        })
    }
}

fn url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid { key, message: e.to_string() })
}

/// A positive number of seconds.
fn seconds(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<Duration, ConfigError> {
    match parse_or::<u64>(get, key, default)? {
        0 => Err(ConfigError::Invalid { key, message: "must be positive".into() }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    get(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid { key, message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = load(&[("API_BASE_URL", "https://api.yensao.vn/api")]).unwrap();
        assert_eq!(c.port, 8083);
        assert_eq!(c.public_url.as_str(), "http://localhost:8083/");
        assert_eq!(c.storefront_url.as_str(), "http://localhost:3000/");
        assert_eq!(c.request_timeout, Duration::from_secs(15));
        assert_eq!(c.currency, "VND");
        assert_eq!(c.retention, Retention::default());
        assert!(c.api_token.is_none() && c.nats_url.is_none());
    }

    #[test]
    fn test_base_url_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("API_BASE_URL"));
        assert_eq!(load(&[("API_BASE_URL", "  ")]).unwrap_err(), ConfigError::Missing("API_BASE_URL"));
    }

    #[test]
    fn test_invalid_values() {
        let base = ("API_BASE_URL", "https://api.yensao.vn");
        assert!(matches!(load(&[base, ("PORT", "http")]), Err(ConfigError::Invalid { key: "PORT", .. })));
        assert!(matches!(load(&[base, ("REQUEST_TIMEOUT_SECS", "0")]), Err(ConfigError::Invalid { key: "REQUEST_TIMEOUT_SECS", .. })));
        assert!(matches!(load(&[base, ("STOREFRONT_URL", "not a url")]), Err(ConfigError::Invalid { key: "STOREFRONT_URL", .. })));
        assert!(matches!(load(&[base, ("SWEEP_INTERVAL_SECS", "0")]), Err(ConfigError::Invalid { key: "SWEEP_INTERVAL_SECS", .. })));
        let c = load(&[base, ("DRAFT_TTL_SECS", "600")]).unwrap();
        assert_eq!(c.retention.draft_ttl, Duration::from_secs(600));
    }
}
