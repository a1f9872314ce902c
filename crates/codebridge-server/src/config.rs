//! Server configuration loaded from `CODEBRIDGE_*` environment variables.
//!
//! # Environment Variables
//!
//! - `CODEBRIDGE_BIND_ADDR`: Listen address. Default: `0.0.0.0:8000`
//! - `CODEBRIDGE_TOKEN_SECRET`: HMAC secret for listener identity tokens
//! - `CODEBRIDGE_ACCOUNTS`: Comma-separated account names allowed to push
//! - `CODEBRIDGE_ACCOUNTS_FILE`: TOML file with `accounts = ["alice", ...]`
//! - `CODEBRIDGE_CORS_ORIGINS`: Comma-separated allowed origins (permissive when unset)
//! - `CODEBRIDGE_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`
//!
//! # Examples
//!
//! ```bash
//! CODEBRIDGE_TOKEN_SECRET=change-me CODEBRIDGE_ACCOUNTS=alice,bob cargo run
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CODEBRIDGE_BIND_ADDR {value:?}: {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to read accounts file {path:?}: {source}")]
    AccountsFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse accounts file {path:?}: {source}")]
    AccountsFileParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a log format name (case-insensitive). Unknown values fall back to `Pretty`.
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<String>,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Identity token signing secret
    pub token_secret: Option<String>,
    /// Accounts allowed to push, sorted and deduplicated
    pub accounts: Vec<String>,
    /// Allowed CORS origins; empty means permissive
    pub cors_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            token_secret: None,
            accounts: Vec::new(),
            cors_origins: Vec::new(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_value =
            lookup("CODEBRIDGE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_value
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_value.clone(),
                source,
            })?;

        let token_secret = lookup("CODEBRIDGE_TOKEN_SECRET").filter(|s| !s.is_empty());

        let mut accounts = lookup("CODEBRIDGE_ACCOUNTS")
            .map(|list| split_list(&list))
            .unwrap_or_default();
        if let Some(path) = lookup("CODEBRIDGE_ACCOUNTS_FILE").filter(|p| !p.is_empty()) {
            accounts.extend(load_accounts_file(PathBuf::from(path))?);
        }
        accounts.sort();
        accounts.dedup();

        let cors_origins = lookup("CODEBRIDGE_CORS_ORIGINS")
            .map(|list| split_list(&list))
            .unwrap_or_default();

        let log_format = lookup("CODEBRIDGE_LOG_FORMAT")
            .map(|s| LogFormat::from_name(&s))
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            token_secret,
            accounts,
            cors_origins,
            log_format,
        })
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        info!("Log format: {}", self.log_format);
        info!("Accounts allowed to push: {}", self.accounts.len());

        if self.token_secret.is_none() {
            warn!("CODEBRIDGE_TOKEN_SECRET not set; using a random secret, tokens will not survive a restart");
        }
        if self.accounts.is_empty() {
            warn!("No accounts configured; every push will be rejected");
        }
        if self.cors_origins.is_empty() {
            info!("CORS: permissive");
        } else {
            info!(origins = ?self.cors_origins, "CORS: restricted");
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_accounts_file(path: PathBuf) -> Result<Vec<String>, ConfigError> {
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::AccountsFileRead {
        path: path.clone(),
        source,
    })?;
    let file: AccountsFile =
        toml::from_str(&contents).map_err(|source| ConfigError::AccountsFileParse {
            path: path.clone(),
            source,
        })?;
    Ok(file
        .accounts
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8000".parse().unwrap());
        assert!(config.token_secret.is_none());
        assert!(config.accounts.is_empty());
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_accounts_list_is_trimmed_and_deduplicated() {
        let config = ServerConfig::from_lookup(lookup_from(&[(
            "CODEBRIDGE_ACCOUNTS",
            " bob, alice,,bob ",
        )]))
        .unwrap();

        assert_eq!(config.accounts, vec!["alice", "bob"]);
    }

    #[test]
    fn test_accounts_file_is_merged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "accounts = [\"carol\", \"alice\"]").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = ServerConfig::from_lookup(lookup_from(&[
            ("CODEBRIDGE_ACCOUNTS", "alice"),
            ("CODEBRIDGE_ACCOUNTS_FILE", &path),
        ]))
        .unwrap();

        assert_eq!(config.accounts, vec!["alice", "carol"]);
    }

    #[test]
    fn test_missing_accounts_file_is_an_error() {
        let result = ServerConfig::from_lookup(lookup_from(&[(
            "CODEBRIDGE_ACCOUNTS_FILE",
            "/nonexistent/codebridge-accounts.toml",
        )]));
        assert!(matches!(result, Err(ConfigError::AccountsFileRead { .. })));
    }

    #[test]
    fn test_invalid_bind_addr() {
        let result =
            ServerConfig::from_lookup(lookup_from(&[("CODEBRIDGE_BIND_ADDR", "not-an-addr")]));
        assert!(matches!(result, Err(ConfigError::InvalidBindAddr { .. })));
    }

    #[test]
    fn test_empty_secret_counts_as_unset() {
        let config =
            ServerConfig::from_lookup(lookup_from(&[("CODEBRIDGE_TOKEN_SECRET", "")])).unwrap();
        assert!(config.token_secret.is_none());
    }

    #[test]
    fn test_log_format_from_name() {
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_cors_origins_split() {
        let config = ServerConfig::from_lookup(lookup_from(&[(
            "CODEBRIDGE_CORS_ORIGINS",
            "https://a.example, https://b.example",
        )]))
        .unwrap();
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
