//! Channel configuration.
//!
//! Connection parameters for the handshake: credentials, TLS policy and the
//! caching_sha2_password RSA options.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::capabilities::{CLIENT_CONNECT_WITH_DB, CLIENT_SSL, REQUIRED_FLAGS};
use crate::protocol::charset;

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Use SSL if the server offers it, fall back to plaintext
    Preferred,
    /// Require SSL
    Required,
    /// Require SSL and verify the server certificate
    VerifyCa,
    /// Require SSL and verify the certificate matches the hostname
    VerifyIdentity,
}

impl SslMode {
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificate material for the TLS upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA certificate (PEM) used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key (PEM) for mutual TLS
    pub client_key_path: Option<PathBuf>,
    /// Name to verify and send as SNI instead of the configured host
    pub server_name: Option<String>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Disable certificate verification. Only for testing against
    /// self-signed servers.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }
}

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database to select during the handshake
    pub database: Option<String>,
    /// Collation id sent in the handshake response (default: utf8mb4)
    pub charset: u8,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    pub ssl_mode: SslMode,
    pub tls: TlsConfig,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
    /// Server RSA public key (PEM) for caching_sha2_password full auth
    /// over plaintext connections
    pub server_public_key: Option<String>,
    /// Allow asking the server for its RSA public key when none is
    /// configured. The key arrives unauthenticated, so this is off by
    /// default.
    pub allow_public_key_retrieval: bool,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            max_packet_size: 64 * 1024 * 1024,
            server_public_key: None,
            allow_public_key_retrieval: false,
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Use this PEM-encoded RSA key for full authentication without TLS.
    pub fn server_public_key(mut self, pem: impl Into<String>) -> Self {
        self.server_public_key = Some(pem.into());
        self
    }

    pub fn allow_public_key_retrieval(mut self, allow: bool) -> Self {
        self.allow_public_key_retrieval = allow;
        self
    }

    pub(crate) fn password_str(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// `host:port`, for logging.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Capability flags the client would like; the handshake intersects
    /// them with the server's offer.
    pub fn capability_flags(&self) -> u32 {
        let mut flags = REQUIRED_FLAGS;
        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        if self.ssl_mode.should_try_ssl() {
            flags |= CLIENT_SSL;
        }
        flags
    }
}
