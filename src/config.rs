use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::Policy;

const PREFIX: &str = "STAYDESK_";
const DEFAULT_ADMIN_PASSWORD: &str = "admin";
const DEFAULT_SMTP_PORT: u16 = 587;

/// Which [`crate::store::ReservationStore`] adapter backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Csv,
    Journal,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(StoreKind::Csv),
            "journal" | "wal" => Ok(StoreKind::Journal),
            "memory" => Ok(StoreKind::Memory),
            _ => Err(()),
        }
    }
}

/// Server settings, read from `STAYDESK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub admin_password: String,
    pub guest_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub policy: Policy,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Owner email notification; `None` unless `STAYDESK_SMTP_HOST` is set.
    pub smtp: Option<SmtpConfig>,
}

/// Outgoing mail relay for booking notices.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: String, value: String },
    Missing { var: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Missing { var } => {
                write!(f, "{var} must be set when {PREFIX}SMTP_HOST is")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.is_empty());

        Ok(Self {
            port: parse_opt("PORT", get("PORT"))?.unwrap_or(5433),
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            store: parse_opt("STORE", get("STORE"))?.unwrap_or(StoreKind::Csv),
            admin_password: get("ADMIN_PASSWORD").unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.into()),
            guest_password: get("GUEST_PASSWORD").unwrap_or_else(|| "guest".into()),
            max_connections: parse_opt("MAX_CONNECTIONS", get("MAX_CONNECTIONS"))?.unwrap_or(64),
            compact_threshold: parse_opt("COMPACT_THRESHOLD", get("COMPACT_THRESHOLD"))?.unwrap_or(1000),
            policy: Policy {
                check_blocked_ranges: parse_flag("CHECK_BLOCKED", get("CHECK_BLOCKED"))?,
                revalidate_on_approve: parse_flag(
                    "REVALIDATE_ON_APPROVE",
                    get("REVALIDATE_ON_APPROVE"),
                )?,
            },
            metrics_port: parse_opt("METRICS_PORT", get("METRICS_PORT"))?,
            tls_cert: get("TLS_CERT").map(PathBuf::from),
            tls_key: get("TLS_KEY").map(PathBuf::from),
            smtp: smtp_config(&get)?,
        })
    }

    /// True when the admin password is the built-in default.
    pub fn uses_default_admin_password(&self) -> bool {
        self.admin_password == DEFAULT_ADMIN_PASSWORD
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn smtp_config(get: &impl Fn(&str) -> Option<String>) -> Result<Option<SmtpConfig>, ConfigError> {
    let Some(host) = get("SMTP_HOST") else { return Ok(None) };
    let required = |name: &str| {
        get(name).ok_or_else(|| ConfigError::Missing {
            var: format!("{PREFIX}{name}"),
        })
    };
    Ok(Some(SmtpConfig {
        host,
        port: parse_opt("SMTP_PORT", get("SMTP_PORT"))?.unwrap_or(DEFAULT_SMTP_PORT),
        username: get("SMTP_USERNAME"),
        password: get("SMTP_PASSWORD"),
        from: required("SMTP_FROM")?,
        to: required("SMTP_TO")?,
    }))
}

fn parse_opt<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: format!("{PREFIX}{name}"),
            value,
        })
    })
    .transpose()
}

fn parse_flag(name: &str, raw: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = raw else { return Ok(false) };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var: format!("{PREFIX}{name}"),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.store, StoreKind::Csv);
        assert_eq!(c.admin_password, "admin");
        assert_eq!(c.guest_password, "guest");
        assert_eq!(c.max_connections, 64);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.policy, Policy::default());
        assert_eq!(c.metrics_port, None);
        assert!(c.tls_cert.is_none() && c.tls_key.is_none());
        assert!(c.smtp.is_none());
        assert!(c.uses_default_admin_password());
    }

    #[test]
    fn explicit_admin_password_is_not_default() {
        let c = config(&[("STAYDESK_ADMIN_PASSWORD", "correct horse")]).unwrap();
        assert!(!c.uses_default_admin_password());
    }

    #[test]
    fn smtp_settings() {
        let c = config(&[
            ("STAYDESK_SMTP_HOST", "smtp.example.com"),
            ("STAYDESK_SMTP_USERNAME", "bookings"),
            ("STAYDESK_SMTP_PASSWORD", "app-password"),
            ("STAYDESK_SMTP_FROM", "bookings@example.com"),
            ("STAYDESK_SMTP_TO", "owner@example.com"),
        ])
        .unwrap();
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.username.as_deref(), Some("bookings"));
        assert_eq!(smtp.to, "owner@example.com");
        assert!(!format!("{smtp:?}").contains("app-password"));
    }

    #[test]
    fn smtp_host_without_recipient_is_an_error() {
        let err = config(&[
            ("STAYDESK_SMTP_HOST", "smtp.example.com"),
            ("STAYDESK_SMTP_FROM", "bookings@example.com"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                var: "STAYDESK_SMTP_TO".into()
            }
        );
        let bad_port = config(&[
            ("STAYDESK_SMTP_HOST", "h"),
            ("STAYDESK_SMTP_FROM", "a@b.c"),
            ("STAYDESK_SMTP_TO", "d@e.f"),
            ("STAYDESK_SMTP_PORT", "x"),
        ]);
        assert!(bad_port.is_err());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("STAYDESK_PORT", "6000"),
            ("STAYDESK_STORE", "Journal"),
            ("STAYDESK_CHECK_BLOCKED", "true"),
            ("STAYDESK_REVALIDATE_ON_APPROVE", "1"),
            ("STAYDESK_METRICS_PORT", "9100"),
            ("STAYDESK_DATA_DIR", "/var/lib/staydesk"),
        ])
        .unwrap();
        assert_eq!(c.port, 6000);
        assert_eq!(c.store, StoreKind::Journal);
        assert!(c.policy.check_blocked_ranges);
        assert!(c.policy.revalidate_on_approve);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/staydesk"));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let c = config(&[("STAYDESK_PORT", ""), ("STAYDESK_ADMIN_PASSWORD", "")]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.admin_password, "admin");
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = config(&[("STAYDESK_PORT", "lots")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "STAYDESK_PORT".into(),
                value: "lots".into()
            }
        );
        assert!(config(&[("STAYDESK_STORE", "sqlite")]).is_err());
        assert!(config(&[("STAYDESK_CHECK_BLOCKED", "maybe")]).is_err());
    }
}
