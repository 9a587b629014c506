//! MySQL wire protocol implementation.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum frame payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple frames.

pub mod frame;
pub mod handshake;
pub mod message;
pub mod prepared;
pub mod reader;
pub mod writer;

pub use frame::FrameCodec;
pub use message::{ComPing, ComQuery, ComQuit, Deserialize, Serialize};
pub use prepared::{ComStmtClose, ComStmtExecute, ComStmtPrepare, StmtPrepareOk};
pub use reader::PacketReader;
pub use writer::PacketWriter;

use mysqlwire_core::error::{ProtocolError, ProtocolErrorKind};
use mysqlwire_core::{Error, ServerError};

/// Maximum payload size for a single frame (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Flags the server must offer; the engine depends on every one of them.
    pub const REQUIRED_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF;

    /// Flags requested only when configuration calls for them.
    pub const OPTIONAL_FLAGS: u32 = CLIENT_SSL | CLIENT_CONNECT_WITH_DB;

    /// Human-readable names of the required flags missing from `offered`.
    pub fn missing_required(offered: u32) -> Vec<&'static str> {
        [
            (CLIENT_PROTOCOL_41, "CLIENT_PROTOCOL_41"),
            (CLIENT_SECURE_CONNECTION, "CLIENT_SECURE_CONNECTION"),
            (CLIENT_PLUGIN_AUTH, "CLIENT_PLUGIN_AUTH"),
            (
                CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA,
                "CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA",
            ),
            (CLIENT_DEPRECATE_EOF, "CLIENT_DEPRECATE_EOF"),
        ]
        .into_iter()
        .filter(|(flag, _)| offered & flag == 0)
        .map(|(_, name)| name)
        .collect()
    }
}

/// MySQL command codes (COM_xxx) used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Text protocol query
    Query = 0x03,
    /// Ping server
    Ping = 0x0e,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Close prepared statement
    StmtClose = 0x19,
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// MySQL character set codes.
#[allow(dead_code)]
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Default charset for new connections (utf8mb4).
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_0900_AI_CI;
}

/// A frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Server response packet types, classified by leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF-flavoured OK packet (0xFE with a short payload)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else: a row, a field count, or handshake data
    Data,
}

impl PacketType {
    /// Detect packet type from the first byte of payload.
    ///
    /// A 0xFE byte opens a row whose first column is longer than 2^24 - 1
    /// bytes; the payload length tells the two apart.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < MAX_PACKET_SIZE => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }

    pub fn of(payload: &[u8]) -> Option<Self> {
        payload
            .first()
            .map(|&b| PacketType::from_first_byte(b, payload.len()))
    }
}

/// Parsed OK packet (also the deprecate-EOF terminator).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

/// Build a protocol error.
pub(crate) fn protocol_error(kind: ProtocolErrorKind, msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        kind,
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

pub(crate) fn malformed(msg: impl Into<String>) -> Error {
    protocol_error(ProtocolErrorKind::Malformed, msg)
}

/// Build an "unexpected packet" error carrying the offending payload.
pub(crate) fn unexpected_packet(context: &str, payload: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        kind: ProtocolErrorKind::UnexpectedPacket,
        message: format!(
            "unexpected packet 0x{:02x} {}",
            payload.first().copied().unwrap_or_default(),
            context
        ),
        raw_data: Some(payload.to_vec()),
        source: None,
    })
}

/// Decode an error packet into a server error.
pub(crate) fn server_error(payload: &[u8]) -> Error {
    match ServerError::deserialize(&mut PacketReader::new(payload)) {
        Ok(err) => Error::Server(err),
        Err(e) => e,
    }
}
