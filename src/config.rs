//! Process configuration read from environment variables.
//!
//! | Variable        | Required | Default |
//! |-----------------|----------|---------|
//! | `ADDR`          | yes      |         |
//! | `API_SERVER`    | yes      |         |
//! | `TOKEN`         | yes      |         |
//! | `APP_SELECTOR`  | yes      |         |
//! | `NAMESPACE`     | no       | none    |
//! | `QUERY_TIMEOUT` | no       | 10s     |
//! | `CA_PATH`       | yes      |         |
//! | `CERT_PATH`     | yes      |         |
//! | `KEY_PATH`      | yes      |         |
//!
//! A variable set to the empty string counts as unset.

use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const REDACTED: &str = "<redacted>";

/// Error type returned when the configuration cannot be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is not valid UTF-8.
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),
    /// A variable could not be parsed.
    #[error("invalid value {value:?} for environment variable {name}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<OsString>,
{
    fn optional(&self, name: &'static str) -> Result<Option<String>, ConfigError> {
        match (self.0)(name) {
            None => Ok(None),
            Some(v) if v.is_empty() => Ok(None),
            Some(v) => v
                .into_string()
                .map(Some)
                .map_err(|_| ConfigError::NotUnicode(name)),
        }
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name)?.ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(
        &self,
        name: &'static str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        self.optional(name)?
            .map(|value| {
                parse(&value).map_err(|reason| ConfigError::Invalid {
                    name,
                    value,
                    reason,
                })
            })
            .transpose()
    }
}

fn parse_addr(s: &str) -> Result<SocketAddr, String> {
    // ":8080" listens on every interface.
    if let Some(port) = s.strip_prefix(':') {
        return port
            .parse::<u16>()
            .map(|port| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .map_err(|e| e.to_string());
    }
    s.parse().map_err(|e: std::net::AddrParseError| e.to_string())
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let timeout = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if timeout.is_zero() {
        return Err(String::from("must be positive"));
    }
    Ok(timeout)
}

/// Locations of the PEM files used for mutual TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsPaths {
    /// CA bundle used to verify peers (`CA_PATH`).
    pub ca_path: PathBuf,
    /// This process's certificate chain (`CERT_PATH`).
    pub cert_path: PathBuf,
    /// Private key for [`TlsPaths::cert_path`] (`KEY_PATH`).
    pub key_path: PathBuf,
}

impl TlsPaths {
    /// Read the TLS section from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| std::env::var_os(name))
    }

    /// Read the TLS section using `lookup` in place of the environment.
    pub fn load_from(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, ConfigError> {
        Self::load_env(&Env(lookup))
    }

    fn load_env<F: Fn(&str) -> Option<OsString>>(env: &Env<F>) -> Result<Self, ConfigError> {
        Ok(Self {
            ca_path: env.required("CA_PATH")?.into(),
            cert_path: env.required("CERT_PATH")?.into(),
            key_path: env.required("KEY_PATH")?.into(),
        })
    }
}

/// Configuration for a logcache process.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to listen on (`ADDR`).
    pub addr: SocketAddr,
    /// Upstream API server (`API_SERVER`).
    pub api_server: String,
    /// Credential for [`Config::api_server`] (`TOKEN`). Never reported.
    pub token: String,
    /// Selects which applications are served (`APP_SELECTOR`).
    pub app_selector: String,
    /// Namespace restriction, if any (`NAMESPACE`).
    pub namespace: Option<String>,
    /// Maximum runtime of a single query (`QUERY_TIMEOUT`), given either
    /// as whole seconds or as a duration such as `1m30s`.
    pub query_timeout: Duration,
    /// Mutual TLS material.
    pub tls: TlsPaths,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| std::env::var_os(name))
    }

    /// Read the configuration using `lookup` in place of the environment.
    pub fn load_from(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        Ok(Self {
            addr: env
                .parsed("ADDR", parse_addr)?
                .ok_or(ConfigError::Missing("ADDR"))?,
            api_server: env.required("API_SERVER")?,
            token: env.required("TOKEN")?,
            app_selector: env.required("APP_SELECTOR")?,
            namespace: env.optional("NAMESPACE")?,
            query_timeout: env
                .parsed("QUERY_TIMEOUT", parse_timeout)?
                .unwrap_or(DEFAULT_QUERY_TIMEOUT),
            tls: TlsPaths::load_env(&env)?,
        })
    }

    /// The reportable settings as `(variable, value)` pairs, secrets
    /// redacted.
    pub fn reported(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ADDR", self.addr.to_string()),
            ("API_SERVER", self.api_server.clone()),
            ("TOKEN", String::from(REDACTED)),
            ("APP_SELECTOR", self.app_selector.clone()),
            (
                "QUERY_TIMEOUT",
                humantime::format_duration(self.query_timeout).to_string(),
            ),
            ("CA_PATH", self.tls.ca_path.display().to_string()),
            ("CERT_PATH", self.tls.cert_path.display().to_string()),
            ("KEY_PATH", self.tls.key_path.display().to_string()),
        ]
    }

    /// Log each reportable setting at `info` level.
    pub fn report(&self) {
        for (name, value) in self.reported() {
            log::info!("{}: {}", name, value);
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("api_server", &self.api_server)
            .field("token", &REDACTED)
            .field("app_selector", &self.app_selector)
            .field("namespace", &self.namespace)
            .field("query_timeout", &self.query_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}
