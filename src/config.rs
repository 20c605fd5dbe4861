//! Configuration types.
//!
//! Everything is read from `USSD_*` environment variables with defaults
//! suitable for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Remote profile service used for provisioning.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Base URL, e.g. `https://profiles.internal`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<SecretString>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Country calling code used to expand national phone numbers.
    pub default_country_code: String,
    /// Remote provisioning; `None` means accounts are kept locally.
    pub provisioning: Option<ProvisioningConfig>,
    /// Directory for daily-rotated log files, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            db_path: PathBuf::from("./data/ussd-onboarding.db"),
            default_country_code: "254".to_string(),
            provisioning: None,
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_var(&var, "USSD_PORT")?.unwrap_or(defaults.port);
        let bind_addr = var("USSD_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let db_path = var("USSD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let default_country_code = var("USSD_DEFAULT_COUNTRY_CODE")
            .map(|cc| cc.trim_start_matches('+').to_string())
            .unwrap_or(defaults.default_country_code);
        if default_country_code.is_empty()
            || !default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue {
                key: "USSD_DEFAULT_COUNTRY_CODE".into(),
                message: format!("{default_country_code:?} is not a calling code"),
            });
        }

        let timeout_secs: u64 = parse_var(&var, "USSD_PROVISIONING_TIMEOUT_SECS")?.unwrap_or(10);
        let token = var("USSD_PROVISIONING_TOKEN");
        let provisioning = match var("USSD_PROVISIONING_URL") {
            Some(base_url) => Some(ProvisioningConfig {
                base_url,
                token: token.map(SecretString::from),
                timeout: Duration::from_secs(timeout_secs),
            }),
            None if token.is_some() => {
                return Err(ConfigError::MissingEnvVar("USSD_PROVISIONING_URL".into()));
            }
            None => None,
        };

        let log_dir = var("USSD_LOG_DIR").map(PathBuf::from);

        Ok(Self {
            bind_addr,
            port,
            db_path,
            default_country_code,
            provisioning,
            log_dir,
        })
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.db_path, PathBuf::from("./data/ussd-onboarding.db"));
        assert_eq!(config.default_country_code, "254");
        assert!(config.provisioning.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("USSD_PORT", "9000"),
            ("USSD_BIND_ADDR", "127.0.0.1"),
            ("USSD_DB_PATH", "/tmp/ussd.db"),
            ("USSD_DEFAULT_COUNTRY_CODE", "+256"),
            ("USSD_LOG_DIR", "/var/log/ussd"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.db_path, PathBuf::from("/tmp/ussd.db"));
        assert_eq!(config.default_country_code, "256");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/ussd")));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[("USSD_PORT", "  ")])).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn provisioning_config() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("USSD_PROVISIONING_URL", "https://profiles.local"),
            ("USSD_PROVISIONING_TOKEN", "s3cret"),
            ("USSD_PROVISIONING_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();
        let provisioning = config.provisioning.unwrap();
        assert_eq!(provisioning.base_url, "https://profiles.local");
        assert_eq!(provisioning.token.unwrap().expose_secret(), "s3cret");
        assert_eq!(provisioning.timeout, Duration::from_secs(3));
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("USSD_PROVISIONING_URL", "https://profiles.local"),
            ("USSD_PROVISIONING_TOKEN", "s3cret"),
        ]))
        .unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn token_without_url_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup(&[("USSD_PROVISIONING_TOKEN", "s3cret")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "USSD_PROVISIONING_URL"));
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = ServiceConfig::from_lookup(lookup(&[("USSD_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "USSD_PORT"));

        let err = ServiceConfig::from_lookup(lookup(&[("USSD_DEFAULT_COUNTRY_CODE", "KE")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
