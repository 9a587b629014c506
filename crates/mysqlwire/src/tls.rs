//! TLS support.
//!
//! # Upgrade flow
//!
//! 1. Server sends the initial handshake with `CLIENT_SSL`
//! 2. Client sends the short SSL request (capabilities, max packet size,
//!    charset, 23 reserved bytes)
//! 3. Client performs the TLS handshake on the same socket
//! 4. The handshake response and everything after it travel encrypted; the
//!    sequence counter carries on from the SSL request
//!
//! The rustls plumbing is compiled only with the `tls` feature. Without
//! it, mode validation still works and an attempted upgrade fails.

#![allow(clippy::cast_possible_truncation)]

use mysqlwire_core::error::{ConfigError, TransportError, TransportErrorKind};
use mysqlwire_core::{Error, Result};

use crate::config::{SslMode, TlsConfig};
use crate::protocol::capabilities;

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, given the mode and the server's offer.
///
/// - `Ok(true)`: upgrade
/// - `Ok(false)`: stay in plaintext
/// - `Err(_)`: SSL is required but the server does not offer it
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let server_supports = server_supports_ssl(server_caps);
    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(tls_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Check certificate settings for the verifying modes.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<()> {
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.ca_cert_path.is_none() && !tls_config.danger_skip_verify {
                return Err(config_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode. \
                     Set ca_cert_path or danger_skip_verify.",
                ));
            }
            if tls_config.client_cert_path.is_some() != tls_config.client_key_path.is_some() {
                return Err(config_error(
                    "client certificate and client key must be set together for mutual TLS",
                ));
            }
            Ok(())
        }
    }
}

pub(crate) fn tls_error(message: impl Into<String>) -> Error {
    Error::Transport(TransportError {
        kind: TransportErrorKind::Tls,
        message: message.into(),
        source: None,
    })
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}

/// Name used for SNI and certificate verification.
#[cfg(feature = "tls")]
pub(crate) fn server_name(
    tls_config: &TlsConfig,
    host: &str,
) -> Result<rustls::pki_types::ServerName<'static>> {
    let name = tls_config.server_name.as_deref().unwrap_or(host);
    name.to_string()
        .try_into()
        .map_err(|e| tls_error(format!("invalid server name '{name}': {e}")))
}

/// Create the rustls client state for one connection.
#[cfg(feature = "tls")]
pub(crate) fn client_connection(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
    host: &str,
) -> Result<rustls::ClientConnection> {
    let config = build_client_config(tls_config, ssl_mode)?;
    rustls::ClientConnection::new(Arc::new(config), server_name(tls_config, host)?)
        .map_err(|e| tls_error(format!("failed to create TLS connection: {e}")))
}

/// Blocking TLS wrapper over a connected stream.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Run the TLS handshake over `stream`.
    pub fn new(mut stream: S, tls_config: &TlsConfig, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let mut conn = client_connection(tls_config, ssl_mode, host)?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                if n == 0 {
                    return Err(tls_error("connection closed during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        tracing::debug!(version = ?conn.protocol_version(), "TLS established");
        Ok(TlsStream { conn, stream })
    }

    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.conn.wants_read() {
                return Ok(0);
            }
            if self.conn.read_tls(&mut self.stream)? == 0 {
                return Ok(0);
            }
            self.conn
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

/// Build a rustls `ClientConfig` for the SSL mode.
///
/// Preferred and Required verify against webpki roots unless verification
/// is explicitly skipped; the Verify modes use the configured CA when set.
#[cfg(feature = "tls")]
pub(crate) fn build_client_config(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(tls_error("TLS upgrade attempted with SslMode::Disable")),
        _ if tls_config.danger_skip_verify => build_no_verify_config(&provider),
        SslMode::VerifyCa | SslMode::VerifyIdentity if tls_config.ca_cert_path.is_some() => {
            build_custom_ca_config(&provider, tls_config)
        }
        _ => build_webpki_config(&provider, tls_config),
    }
}

#[cfg(feature = "tls")]
fn versioned_builder(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier>> {
    rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {e}")))
}

/// A config that accepts any server certificate.
#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct NoVerifier {
        schemes: Vec<SignatureScheme>,
    }

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.schemes.clone()
        }
    }

    let verifier = NoVerifier {
        schemes: provider
            .signature_verification_algorithms
            .supported_schemes(),
    };
    Ok(versioned_builder(provider)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    add_client_auth(
        versioned_builder(provider)?.with_root_certificates(root_store),
        tls_config,
    )
}

#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let Some(ca_path) = tls_config.ca_cert_path.as_deref() else {
        return build_webpki_config(provider, tls_config);
    };
    let certs = load_certs(ca_path, "CA certificate")?;
    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("failed to add CA certificate: {e}")))?;
    }
    add_client_auth(
        versioned_builder(provider)?.with_root_certificates(root_store),
        tls_config,
    )
}

#[cfg(feature = "tls")]
fn load_certs(
    path: &std::path::Path,
    what: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| tls_error(format!("failed to open {what} '{}': {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("failed to parse {what}: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in {what} file '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = load_certs(cert_path, "client certificate")?;
    let key_file = std::fs::File::open(key_path).map_err(|e| {
        tls_error(format!(
            "failed to open client key '{}': {e}",
            key_path.display()
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| tls_error(format!("failed to parse client key: {e}")))?
        .ok_or_else(|| tls_error(format!("no private key found in '{}'", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("failed to configure client auth: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysqlwire_core::TransportErrorKind;

    #[test]
    fn test_server_supports_ssl() {
        assert!(server_supports_ssl(capabilities::CLIENT_SSL));
        assert!(!server_supports_ssl(capabilities::CLIENT_PROTOCOL_41));
    }

    #[test]
    fn test_validate_ssl_mode() {
        assert!(!validate_ssl_mode(SslMode::Disable, capabilities::CLIENT_SSL).unwrap());
        assert!(!validate_ssl_mode(SslMode::Preferred, 0).unwrap());
        assert!(validate_ssl_mode(SslMode::Preferred, capabilities::CLIENT_SSL).unwrap());
        assert!(validate_ssl_mode(SslMode::Required, capabilities::CLIENT_SSL).unwrap());

        for mode in [SslMode::Required, SslMode::VerifyCa, SslMode::VerifyIdentity] {
            match validate_ssl_mode(mode, 0) {
                Err(Error::Transport(e)) => assert_eq!(e.kind, TransportErrorKind::Tls),
                other => panic!("Expected TLS error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_tls_config() {
        let bare = TlsConfig::new();
        assert!(validate_tls_config(SslMode::Required, &bare).is_ok());
        assert!(matches!(
            validate_tls_config(SslMode::VerifyCa, &bare),
            Err(Error::Config(_))
        ));
        assert!(validate_tls_config(SslMode::VerifyCa, &bare.clone().skip_verify(true)).is_ok());

        let with_ca = TlsConfig::new().ca_cert("/path/to/ca.pem");
        assert!(validate_tls_config(SslMode::VerifyIdentity, &with_ca).is_ok());
        let half_mtls = with_ca.clone().client_cert("/path/to/client.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &half_mtls).is_err());
        let full_mtls = half_mtls.client_key("/path/to/client-key.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &full_mtls).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_build_client_config_modes() {
        let tls = TlsConfig::new();
        assert!(build_client_config(&tls, SslMode::Disable).is_err());
        assert!(build_client_config(&tls, SslMode::Required).is_ok());
        assert!(build_client_config(&tls.clone().skip_verify(true), SslMode::VerifyCa).is_ok());

        let missing_ca = TlsConfig::new().ca_cert("/nonexistent/ca.pem");
        assert!(build_client_config(&missing_ca, SslMode::VerifyCa).is_err());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_server_name_override() {
        let tls = TlsConfig::new().server_name("db.internal");
        assert!(server_name(&tls, "10.0.0.1").is_ok());
        assert!(server_name(&TlsConfig::new(), "bad name!").is_err());
    }
}
