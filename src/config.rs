//! Process configuration, read once from the environment at startup.
//!
//! `dotenvy` loads a `.env` file first when one exists; real environment
//! variables win over it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

/// OpenAI-compatible completion endpoint.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub api_key: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub bcrypt_cost: u32,
    pub provider: ProviderConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let host = get("API_HOST", "0.0.0.0");
        let port = get("API_PORT", "8080");
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: "API_PORT",
                value: format!("{host}:{port}"),
            })?;

        let expires = get("JWT_EXPIRES_IN", "1h");
        let jwt_expires_in = parse_duration(&expires).ok_or(ConfigError::Invalid {
            key: "JWT_EXPIRES_IN",
            value: expires,
        })?;

        let bcrypt_cost = bcrypt_cost_from(&lookup)?;

        let timeout = get("OPENAI_TIMEOUT_SECS", "30");
        let timeout = timeout
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                key: "OPENAI_TIMEOUT_SECS",
                value: timeout,
            })?;

        let format = match get("LOG_FORMAT", "text").as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(get("DATA_DIR", "mypath_data")),
            api_key: required("API_KEY")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expires_in,
            bcrypt_cost,
            provider: ProviderConfig {
                api_key: lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()),
                base_url: get("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: get("OPENAI_MODEL", "gpt-3.5-turbo"),
                timeout,
            },
            log: LogConfig {
                format,
                file: lookup("LOG_FILE").map(PathBuf::from),
            },
        })
    }
}

/// `BCRYPT_COST`, default 8. Anything outside bcrypt's 4..=31 is rejected.
pub fn bcrypt_cost_from<F>(lookup: F) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(cost) = lookup("BCRYPT_COST").filter(|v| !v.trim().is_empty()) else {
        return Ok(8);
    };
    cost.parse::<u32>()
        .ok()
        .filter(|c| (4..=31).contains(c))
        .ok_or(ConfigError::Invalid {
            key: "BCRYPT_COST",
            value: cost,
        })
}

/// Parses `3600`, `45s`, `30m`, `12h` or `7d`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let seconds = match unit.trim() {
        "" | "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(60 * 60)?,
        "d" => amount.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn durations_accept_suffixes() {
        assert_eq!(parse_duration("3600"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("1w"), None);
        assert_eq!(parse_duration("h"), None);
    }

    #[test]
    fn defaults_fill_everything_but_secrets() {
        let config = Config::from_lookup(lookup(&[("API_KEY", "k"), ("JWT_SECRET", "s")]))
            .expect("config");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.jwt_expires_in, Duration::from_secs(3600));
        assert_eq!(config.bcrypt_cost, 8);
        assert_eq!(config.provider.model, "gpt-3.5-turbo");
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn missing_secret_and_bad_values_fail() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("API_KEY", "k")])),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("API_KEY", "k"),
                ("JWT_SECRET", "s"),
                ("API_PORT", "eighty")
            ])),
            Err(ConfigError::Invalid { key: "API_PORT", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("API_KEY", "k"),
                ("JWT_SECRET", "s"),
                ("BCRYPT_COST", "2")
            ])),
            Err(ConfigError::Invalid { key: "BCRYPT_COST", .. })
        ));
    }

    #[test]
    fn bcrypt_cost_needs_no_secrets() {
        assert_eq!(bcrypt_cost_from(lookup(&[])).unwrap(), 8);
        assert_eq!(bcrypt_cost_from(lookup(&[("BCRYPT_COST", "12")])).unwrap(), 12);
        for bad in ["2", "32", "ten", "-4"] {
            assert!(matches!(
                bcrypt_cost_from(lookup(&[("BCRYPT_COST", bad)])),
                Err(ConfigError::Invalid { key: "BCRYPT_COST", .. })
            ));
        }
    }
}
