//! Error types for protocol engine operations.

use std::fmt;

/// The primary error type for all client operations.
#[derive(Debug)]
pub enum Error {
    /// I/O failure on the underlying byte stream
    Transport(TransportError),
    /// Malformed or unexpected bytes on the wire
    Protocol(ProtocolError),
    /// Error packet decoded from the server
    Server(ServerError),
    /// Authentication could not proceed
    Auth(AuthError),
    /// API misuse (parameter counts, closed statements, broken channels)
    Usage(UsageError),
    /// Typed access to a value of another kind
    Type(TypeError),
    /// Invalid configuration
    Config(ConfigError),
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Failed to establish the TCP connection
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Stream closed or failed mid-operation
    Disconnected,
    /// Connect or I/O deadline elapsed
    Timeout,
    /// TLS negotiation or record-layer failure
    Tls,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Truncated or otherwise undecodable message
    Malformed,
    /// Leading byte not valid in the current exchange
    UnexpectedPacket,
    /// Frame arrived with the wrong sequence number
    SequenceMismatch,
    /// Length-encoded count does not fit `usize`, or is zero where forbidden
    CountOverflow,
    /// Server does not offer a mandatory capability
    MissingCapability,
    /// Server asked for a LOCAL INFILE upload
    LocalInfile,
}

/// A decoded server error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The server requested a plugin this client does not implement
    UnsupportedPlugin,
    /// Full authentication needs TLS or an RSA key and neither is available
    RequiresSecureChannel,
    /// The RSA public key could not be parsed or used
    RsaKeyUnavailable,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// Statement executed with the wrong number of parameters
    WrongParamCount { expected: usize, actual: usize },
    /// Statement used after `close()`
    StatementClosed,
    /// Statement used on a channel other than the one that prepared it
    ForeignStatement,
    /// Channel was left mid-exchange by an earlier fatal error or cancellation
    ChannelBroken,
    /// Channel was closed
    ChannelClosed,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Whether the channel that produced this error must be discarded.
    ///
    /// Transport, protocol and authentication failures leave the exchange at
    /// an unknown point. Server errors arrive as complete packets and leave
    /// the channel usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Protocol(_) | Error::Auth(_)
        )
    }

    /// Server error code, if this is a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// SQLSTATE if available (e.g., "28000" for access denied).
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(e.sqlstate.as_str()),
            _ => None,
        }
    }

    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            Error::Protocol(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            Error::Auth(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl ServerError {
    /// Access denied for user (ER_ACCESS_DENIED_ERROR).
    pub fn is_access_denied(&self) -> bool {
        self.code == 1045
    }

    /// Duplicate key (ER_DUP_ENTRY).
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(f, "Server error: {}", e),
            Error::Auth(e) => write!(f, "Authentication error: {}", e.message),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.sqlstate, self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Timeout
            }
            _ => TransportErrorKind::Disconnected,
        };
        Error::Transport(TransportError {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
