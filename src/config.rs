//! Remote endpoint configuration.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the remote host the exporter reads from.
///
/// Built once at startup and shared by reference; nothing here changes
/// after the channel is created.
#[derive(Debug)]
pub struct ExporterConfig {
    /// Remote host name or address
    pub host: String,
    /// Remote SSH port
    pub port: u16,
    /// Remote user name
    pub username: Option<String>,
    /// Password for password authentication
    pub password: Option<SecretString>,
    /// Private key for key authentication
    pub identity_file: Option<PathBuf>,
    /// Optional remote textfile (or directory of `*.prom` files) to pass through
    pub textfile_path: Option<String>,
    /// Maximum time to wait for the connection to come up
    pub connect_timeout: Duration,
    /// Keepalive interval for the underlying session
    pub keepalive: Duration,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_SSH_PORT,
            username: None,
            password: None,
            identity_file: None,
            textfile_path: None,
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
            keepalive: Duration::from_secs(60),
        }
    }
}

impl ExporterConfig {
    /// Create a configuration for the given remote host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the remote SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the remote user name.
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self
    }

    /// Set the password used for authentication.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password
            .filter(|p| !p.is_empty())
            .map(SecretString::from);
        self
    }

    /// Set the private key used for authentication.
    pub fn with_identity_file(mut self, path: Option<PathBuf>) -> Self {
        self.identity_file = path;
        self
    }

    /// Set the remote textfile path. Trailing slashes are dropped.
    pub fn with_textfile_path(mut self, path: Option<String>) -> Self {
        self.textfile_path = path
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port` as used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `user@host` destination, or just the host when no user is set.
    pub fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Remote glob or file added to the pre-read batch for the textfile collector.
    pub fn textfile_target(&self) -> Option<String> {
        self.textfile_path.as_ref().map(|path| {
            if path.ends_with(".prom") {
                path.clone()
            } else {
                format!("{}/*.prom", path)
            }
        })
    }
}
