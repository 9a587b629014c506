//! Connection-phase state machine.
//!
//! [`Handshake`] performs no I/O. The driver feeds it [`Event`]s and carries
//! out the [`Step`] it returns, one I/O call per step, so the blocking and
//! async channels share one implementation:
//!
//! ```text
//! Start -> GotInitialHandshake -> [SslUpgrading] -> ResponseSent
//!       -> {AuthSwitch | AuthMoreData}* -> {Authenticated | Failed}
//! ```

use mysqlwire_core::error::{AuthErrorKind, ProtocolErrorKind};
use mysqlwire_core::Result;

use crate::auth::{self, AuthPlugin, auth_error, caching_sha2};
use crate::config::MySqlConfig;
use crate::protocol::handshake::{
    AUTH_MORE_DATA_HEADER, AUTH_SWITCH_HEADER, AuthMoreData, AuthSwitchRequest,
    HandshakeResponse, InitialHandshake, SslRequest,
};
use crate::protocol::{
    Deserialize, OkPacket, Serialize, capabilities, protocol_error, server_error,
    unexpected_packet,
};
use crate::tls::{validate_ssl_mode, validate_tls_config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the server greeting
    Start,
    GotInitialHandshake,
    /// SSL request written, TLS upgrade pending
    SslUpgrading,
    ResponseSent,
    AuthSwitch,
    AuthMoreData,
    Authenticated,
    Failed,
}

/// What happened since the last step.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Start,
    /// One complete message from the server
    Message(&'a [u8]),
    /// The last `Step::Write` payload was sent
    Written,
    /// The transport finished the TLS handshake
    TlsUpgraded,
}

/// The I/O the driver must perform next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Read one message and resume with `Event::Message`
    Read,
    /// Write one message and resume with `Event::Written`
    Write(Vec<u8>),
    /// Upgrade the transport and resume with `Event::TlsUpgraded`
    UpgradeTls,
    /// Authenticated; the channel is ready for commands
    Done,
}

/// What the server announced in its greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_version: String,
    pub connection_id: u32,
    /// Capabilities the server offered (before intersection)
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
}

/// One connection-phase exchange.
#[derive(Debug)]
pub struct Handshake<'c> {
    config: &'c MySqlConfig,
    state: HandshakeState,
    secure: bool,
    server: Option<ServerInfo>,
    capabilities: u32,
    plugin: AuthPlugin,
    challenge: Vec<u8>,
    awaiting_public_key: bool,
    status_flags: u16,
}

impl<'c> Handshake<'c> {
    /// `secure` is whether the transport is already encrypted.
    pub fn new(config: &'c MySqlConfig, secure: bool) -> Self {
        Self {
            config,
            state: HandshakeState::Start,
            secure,
            server: None,
            capabilities: 0,
            plugin: AuthPlugin::NativePassword,
            challenge: Vec::new(),
            awaiting_public_key: false,
            status_flags: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Negotiated capability flags (zero before the greeting).
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn plugin(&self) -> AuthPlugin {
        self.plugin
    }

    /// Status flags from the final OK packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// Advance by one event. Any error moves the machine to `Failed`.
    pub fn resume(&mut self, event: Event<'_>) -> Result<Step> {
        let result = self.advance(event);
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn advance(&mut self, event: Event<'_>) -> Result<Step> {
        use HandshakeState as S;
        match (self.state, event) {
            (S::Start, Event::Start) => Ok(Step::Read),
            (S::Start, Event::Message(payload)) => self.on_greeting(payload),
            (S::SslUpgrading, Event::Written) => Ok(Step::UpgradeTls),
            (S::SslUpgrading, Event::TlsUpgraded) => {
                self.secure = true;
                tracing::debug!("TLS upgrade complete");
                Ok(self.send_response())
            }
            (S::ResponseSent | S::AuthSwitch | S::AuthMoreData, Event::Written) => Ok(Step::Read),
            (S::ResponseSent | S::AuthSwitch | S::AuthMoreData, Event::Message(payload)) => {
                self.on_auth_reply(payload)
            }
            (state, event) => Err(protocol_error(
                ProtocolErrorKind::UnexpectedPacket,
                format!("handshake cannot handle {event:?} in state {state:?}"),
            )),
        }
    }

    fn on_greeting(&mut self, payload: &[u8]) -> Result<Step> {
        if payload.first() == Some(&0xFF) {
            return Err(server_error(payload));
        }
        let greeting = InitialHandshake::from_payload(payload)?;

        let missing = capabilities::missing_required(greeting.capabilities);
        if !missing.is_empty() {
            return Err(protocol_error(
                ProtocolErrorKind::MissingCapability,
                format!(
                    "server does not support required capabilities: {}",
                    missing.join(", ")
                ),
            ));
        }

        let use_tls =
            !self.secure && validate_ssl_mode(self.config.ssl_mode, greeting.capabilities)?;
        if use_tls {
            validate_tls_config(self.config.ssl_mode, &self.config.tls)?;
        }

        let mut caps = self.config.capability_flags() & greeting.capabilities;
        if !use_tls {
            caps &= !capabilities::CLIENT_SSL;
        }
        self.capabilities = caps;
        self.plugin = AuthPlugin::from_name(&greeting.auth_plugin)?;
        self.challenge = greeting.auth_data;
        self.state = HandshakeState::GotInitialHandshake;

        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = self.plugin.name(),
            capabilities = caps,
            tls = use_tls,
            "received initial handshake"
        );

        self.server = Some(ServerInfo {
            server_version: greeting.server_version,
            connection_id: greeting.connection_id,
            capabilities: greeting.capabilities,
            charset: greeting.charset,
            status_flags: greeting.status_flags,
        });

        if use_tls {
            self.state = HandshakeState::SslUpgrading;
            return Ok(Step::Write(
                SslRequest {
                    capabilities: caps,
                    max_packet_size: self.config.max_packet_size,
                    charset: self.config.charset,
                }
                .to_payload(),
            ));
        }
        Ok(self.send_response())
    }

    fn send_response(&mut self) -> Step {
        let auth_response = self
            .plugin
            .scramble(self.config.password_str(), &self.challenge);
        let payload = HandshakeResponse {
            capabilities: self.capabilities,
            max_packet_size: self.config.max_packet_size,
            charset: self.config.charset,
            username: &self.config.user,
            auth_response: &auth_response,
            database: self.config.database.as_deref(),
            auth_plugin: self.plugin.name(),
        }
        .to_payload();
        self.state = HandshakeState::ResponseSent;
        Step::Write(payload)
    }

    fn on_auth_reply(&mut self, payload: &[u8]) -> Result<Step> {
        match payload.first().copied() {
            Some(0x00) => {
                let ok = OkPacket::from_payload(payload)?;
                self.status_flags = ok.status_flags;
                self.state = HandshakeState::Authenticated;
                tracing::debug!(plugin = self.plugin.name(), "authenticated");
                Ok(Step::Done)
            }
            Some(0xFF) => Err(server_error(payload)),
            Some(AUTH_SWITCH_HEADER) => {
                let request = AuthSwitchRequest::from_payload(payload)?;
                self.plugin = AuthPlugin::from_name(&request.plugin)?;
                self.challenge = request.auth_data.to_vec();
                self.awaiting_public_key = false;
                self.state = HandshakeState::AuthSwitch;
                tracing::debug!(plugin = self.plugin.name(), "auth switch");
                Ok(Step::Write(
                    self.plugin
                        .scramble(self.config.password_str(), &self.challenge),
                ))
            }
            Some(AUTH_MORE_DATA_HEADER) => {
                let more = AuthMoreData::from_payload(payload)?;
                self.state = HandshakeState::AuthMoreData;
                self.on_more_data(more.data)
            }
            _ => Err(unexpected_packet("during authentication", payload)),
        }
    }

    fn on_more_data(&mut self, data: &[u8]) -> Result<Step> {
        if self.awaiting_public_key {
            self.awaiting_public_key = false;
            tracing::debug!("received server public key");
            return self.encrypted_password(data);
        }
        if self.plugin != AuthPlugin::CachingSha2Password {
            return Err(protocol_error(
                ProtocolErrorKind::UnexpectedPacket,
                format!("unexpected auth-more-data for {}", self.plugin.name()),
            ));
        }
        match data.first().copied() {
            Some(caching_sha2::FAST_AUTH_SUCCESS) => {
                tracing::debug!("fast auth succeeded");
                Ok(Step::Read)
            }
            Some(caching_sha2::PERFORM_FULL_AUTH) => self.full_auth(),
            other => Err(protocol_error(
                ProtocolErrorKind::UnexpectedPacket,
                format!("unknown caching_sha2_password status {other:?}"),
            )),
        }
    }

    fn full_auth(&mut self) -> Result<Step> {
        tracing::debug!(secure = self.secure, "full authentication requested");
        if self.secure {
            return Ok(Step::Write(auth::cleartext_password(
                self.config.password_str(),
            )));
        }
        if let Some(pem) = &self.config.server_public_key {
            return self.encrypted_password(pem.as_bytes());
        }
        if self.config.allow_public_key_retrieval {
            self.awaiting_public_key = true;
            tracing::debug!("requesting server public key");
            return Ok(Step::Write(vec![caching_sha2::REQUEST_PUBLIC_KEY]));
        }
        Err(auth_error(
            AuthErrorKind::RequiresSecureChannel,
            "caching_sha2_password full authentication requires TLS or the server's RSA public key",
        ))
    }

    fn encrypted_password(&self, pem: &[u8]) -> Result<Step> {
        let encrypted =
            auth::encrypt_password_rsa(self.config.password_str(), &self.challenge, pem)?;
        Ok(Step::Write(encrypted))
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::*;
    use super::*;
    use crate::auth::test_keys;
    use crate::config::SslMode;
    use crate::protocol::PacketReader;
    use crate::protocol::capabilities::*;
    use mysqlwire_core::{Error, TransportErrorKind};
    use sha1::Sha1;

    fn config() -> MySqlConfig {
        MySqlConfig::new().user("app").password("secret")
    }

    fn expect_write(step: Step) -> Vec<u8> {
        match step {
            Step::Write(payload) => payload,
            other => panic!("expected write, got {other:?}"),
        }
    }

    struct Response {
        capabilities: u32,
        username: String,
        auth_response: Vec<u8>,
        database: Option<String>,
        plugin: String,
    }

    fn parse_response(payload: &[u8]) -> Response {
        let mut r = PacketReader::new(payload);
        let capabilities = r.read_u32_le().unwrap();
        r.skip(4 + 1 + 23).unwrap();
        let username = r.read_null_string().unwrap();
        let auth_response = r.read_lenenc_bytes().unwrap().to_vec();
        let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 {
            Some(r.read_null_string().unwrap())
        } else {
            None
        };
        let plugin = r.read_null_string().unwrap();
        Response {
            capabilities,
            username,
            auth_response,
            database,
            plugin,
        }
    }

    #[test]
    fn test_native_password_flow() {
        let config = config().database("shop");
        let mut hs = Handshake::new(&config, false);
        assert_eq!(hs.resume(Event::Start).unwrap(), Step::Read);

        let response = expect_write(
            hs.resume(Event::Message(&greeting("mysql_native_password")))
                .unwrap(),
        );
        assert_eq!(hs.state(), HandshakeState::ResponseSent);
        let response = parse_response(&response);
        assert_eq!(response.username, "app");
        assert_eq!(
            response.auth_response,
            auth::mysql_native_password("secret", SALT)
        );
        assert_eq!(response.database.as_deref(), Some("shop"));
        assert_eq!(response.plugin, "mysql_native_password");
        assert_eq!(response.capabilities & CLIENT_SSL, 0);
        assert_eq!(response.capabilities & REQUIRED_FLAGS, REQUIRED_FLAGS);

        assert_eq!(hs.resume(Event::Written).unwrap(), Step::Read);
        assert_eq!(
            hs.resume(Event::Message(&ok_packet(0, 0))).unwrap(),
            Step::Done
        );
        assert_eq!(hs.state(), HandshakeState::Authenticated);
        assert_eq!(hs.server().unwrap().server_version, "8.0.36");
        assert_eq!(hs.server().unwrap().connection_id, 7);
        assert_eq!(hs.status_flags(), 2);
    }

    #[test]
    fn test_no_database_no_connect_with_db() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let response = expect_write(
            hs.resume(Event::Message(&greeting("mysql_native_password")))
                .unwrap(),
        );
        let response = parse_response(&response);
        assert_eq!(response.capabilities & CLIENT_CONNECT_WITH_DB, 0);
        assert_eq!(response.database, None);
    }

    #[test]
    fn test_missing_required_capability() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let err = hs
            .resume(Event::Message(&greeting_with(
                "mysql_native_password",
                REQUIRED_FLAGS & !CLIENT_DEPRECATE_EOF,
            )))
            .unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::MissingCapability));
        assert!(err.to_string().contains("CLIENT_DEPRECATE_EOF"));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_greeting_error_packet() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let err = hs
            .resume(Event::Message(&err_packet(1040, "08004", "Too many connections")))
            .unwrap_err();
        assert_eq!(err.server_code(), Some(1040));
    }

    #[test]
    fn test_tls_upgrade_flow() {
        let config = config().ssl_mode(SslMode::Required);
        let mut hs = Handshake::new(&config, false);
        let ssl_request = expect_write(
            hs.resume(Event::Message(&greeting("caching_sha2_password")))
                .unwrap(),
        );
        assert_eq!(ssl_request.len(), 32);
        let caps = u32::from_le_bytes(ssl_request[..4].try_into().unwrap());
        assert_ne!(caps & CLIENT_SSL, 0);
        assert_eq!(hs.state(), HandshakeState::SslUpgrading);

        assert_eq!(hs.resume(Event::Written).unwrap(), Step::UpgradeTls);
        let response = expect_write(hs.resume(Event::TlsUpgraded).unwrap());
        assert!(hs.is_secure());
        let response = parse_response(&response);
        assert_ne!(response.capabilities & CLIENT_SSL, 0);
        assert_eq!(response.plugin, "caching_sha2_password");
    }

    #[test]
    fn test_tls_required_but_unsupported() {
        let config = config().ssl_mode(SslMode::Required);
        let mut hs = Handshake::new(&config, false);
        let err = hs
            .resume(Event::Message(&greeting_with(
                "mysql_native_password",
                REQUIRED_FLAGS,
            )))
            .unwrap_err();
        match err {
            Error::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Tls),
            other => panic!("expected TLS error, got {other:?}"),
        }
    }

    #[test]
    fn test_tls_preferred_falls_back() {
        let config = config().ssl_mode(SslMode::Preferred);
        let mut hs = Handshake::new(&config, false);
        let response = expect_write(
            hs.resume(Event::Message(&greeting_with(
                "mysql_native_password",
                REQUIRED_FLAGS,
            )))
            .unwrap(),
        );
        assert_eq!(hs.state(), HandshakeState::ResponseSent);
        assert_eq!(parse_response(&response).capabilities & CLIENT_SSL, 0);
    }

    #[test]
    fn test_verify_mode_needs_ca() {
        let config = config().ssl_mode(SslMode::VerifyCa);
        let mut hs = Handshake::new(&config, false);
        let err = hs
            .resume(Event::Message(&greeting("mysql_native_password")))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_caching_sha2_fast_auth() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let response = expect_write(
            hs.resume(Event::Message(&greeting("caching_sha2_password")))
                .unwrap(),
        );
        let response = parse_response(&response);
        assert_eq!(
            response.auth_response,
            auth::caching_sha2_password("secret", SALT)
        );
        assert!(!response.auth_response.windows(6).any(|w| w == b"secret"));

        hs.resume(Event::Written).unwrap();
        assert_eq!(
            hs.resume(Event::Message(&[0x01, caching_sha2::FAST_AUTH_SUCCESS]))
                .unwrap(),
            Step::Read
        );
        assert_eq!(
            hs.resume(Event::Message(&ok_packet(0, 0))).unwrap(),
            Step::Done
        );
    }

    #[test]
    fn test_caching_sha2_full_auth_requires_secure_channel() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let err = hs
            .resume(Event::Message(&[0x01, caching_sha2::PERFORM_FULL_AUTH]))
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::RequiresSecureChannel));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_caching_sha2_full_auth_over_tls() {
        let config = config();
        let mut hs = Handshake::new(&config, true);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let password = expect_write(
            hs.resume(Event::Message(&[0x01, caching_sha2::PERFORM_FULL_AUTH]))
                .unwrap(),
        );
        assert_eq!(password, b"secret\0");
    }

    #[test]
    fn test_caching_sha2_full_auth_with_configured_key() {
        let (private, pem) = test_keys::key_pair();
        let config = config().server_public_key(pem);
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let encrypted = expect_write(
            hs.resume(Event::Message(&[0x01, caching_sha2::PERFORM_FULL_AUTH]))
                .unwrap(),
        );
        let decrypted = private
            .decrypt(rsa::Oaep::new::<Sha1>(), &encrypted)
            .unwrap();
        assert_eq!(decrypted, auth::xor_password_with_seed("secret", SALT));
    }

    #[test]
    fn test_caching_sha2_public_key_retrieval() {
        let (private, pem) = test_keys::key_pair();
        let config = config().allow_public_key_retrieval(true);
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let request = expect_write(
            hs.resume(Event::Message(&[0x01, caching_sha2::PERFORM_FULL_AUTH]))
                .unwrap(),
        );
        assert_eq!(request, vec![caching_sha2::REQUEST_PUBLIC_KEY]);
        assert_eq!(hs.resume(Event::Written).unwrap(), Step::Read);

        let mut key_packet = vec![AUTH_MORE_DATA_HEADER];
        key_packet.extend_from_slice(pem.as_bytes());
        let encrypted = expect_write(hs.resume(Event::Message(&key_packet)).unwrap());
        let decrypted = private
            .decrypt(rsa::Oaep::new::<Sha1>(), &encrypted)
            .unwrap();
        assert_eq!(decrypted, auth::xor_password_with_seed("secret", SALT));

        hs.resume(Event::Written).unwrap();
        assert_eq!(
            hs.resume(Event::Message(&ok_packet(0, 0))).unwrap(),
            Step::Done
        );
    }

    #[test]
    fn test_retrieved_key_garbage() {
        let config = config().allow_public_key_retrieval(true);
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        hs.resume(Event::Message(&[0x01, caching_sha2::PERFORM_FULL_AUTH]))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let err = hs
            .resume(Event::Message(b"\x01not a pem"))
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::RsaKeyUnavailable));
    }

    #[test]
    fn test_auth_switch() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("caching_sha2_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();

        let new_salt = b"abcdefghij0123456789";
        let mut switch = vec![AUTH_SWITCH_HEADER];
        switch.extend_from_slice(b"mysql_native_password\0");
        switch.extend_from_slice(new_salt);
        switch.push(0);
        let response = expect_write(hs.resume(Event::Message(&switch)).unwrap());
        assert_eq!(hs.state(), HandshakeState::AuthSwitch);
        assert_eq!(hs.plugin(), AuthPlugin::NativePassword);
        assert_eq!(response, auth::mysql_native_password("secret", new_salt));

        assert_eq!(hs.resume(Event::Written).unwrap(), Step::Read);
        assert_eq!(
            hs.resume(Event::Message(&ok_packet(0, 0))).unwrap(),
            Step::Done
        );
    }

    #[test]
    fn test_auth_switch_to_unknown_plugin() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("mysql_native_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let mut switch = vec![AUTH_SWITCH_HEADER];
        switch.extend_from_slice(b"sha256_password\0");
        switch.extend_from_slice(SALT);
        let err = hs.resume(Event::Message(&switch)).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::UnsupportedPlugin));
    }

    #[test]
    fn test_unknown_default_plugin() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let err = hs
            .resume(Event::Message(&greeting("auth_gssapi_client")))
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::UnsupportedPlugin));
    }

    #[test]
    fn test_access_denied() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("mysql_native_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let err = hs
            .resume(Event::Message(&err_packet(
                1045,
                "28000",
                "Access denied for user 'app'@'localhost'",
            )))
            .unwrap_err();
        assert_eq!(err.server_code(), Some(1045));
        assert_eq!(err.sqlstate(), Some("28000"));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_more_data_for_native_password() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        hs.resume(Event::Message(&greeting("mysql_native_password")))
            .unwrap();
        hs.resume(Event::Written).unwrap();
        let err = hs.resume(Event::Message(&[0x01, 0x03])).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::UnexpectedPacket));
    }

    #[test]
    fn test_out_of_order_event() {
        let config = config();
        let mut hs = Handshake::new(&config, false);
        let err = hs.resume(Event::TlsUpgraded).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::UnexpectedPacket));
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert!(hs.resume(Event::Start).is_err());
    }
}
