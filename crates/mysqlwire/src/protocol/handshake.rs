//! Connection-phase records: server greeting, SSL request, handshake
//! response, auth switch and auth-more-data.

#![allow(clippy::cast_possible_truncation)]

use mysqlwire_core::Result;
use mysqlwire_core::error::ProtocolErrorKind;

use super::message::{Deserialize, Serialize};
use super::{PacketReader, PacketWriter, capabilities, malformed, protocol_error};

/// Protocol version spoken by every supported server.
pub const PROTOCOL_VERSION: u8 = 10;

/// Marker byte of an auth switch request.
pub const AUTH_SWITCH_HEADER: u8 = 0xFE;

/// Marker byte of an auth-more-data packet.
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;

/// The server's initial handshake (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub server_version: String,
    pub connection_id: u32,
    /// Both scramble parts concatenated, trailing NUL removed.
    pub auth_data: Vec<u8>,
    /// Lower and upper capability words merged.
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

impl Deserialize<'_> for InitialHandshake {
    fn deserialize(r: &mut PacketReader<'_>) -> Result<Self> {
        let protocol_version = r.read_u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(protocol_error(
                ProtocolErrorKind::UnexpectedPacket,
                format!("unsupported protocol version: {protocol_version}"),
            ));
        }
        let server_version = r.read_null_string()?;
        let connection_id = r.read_u32_le()?;
        let auth_data_1 = r.read_bytes(8)?;
        r.skip(1)?; // filler
        let caps_lower = r.read_u16_le()?;
        let charset = r.read_u8()?;
        let status_flags = r.read_u16_le()?;
        let caps_upper = r.read_u16_le()?;
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);
        let auth_data_len = usize::from(r.read_u8()?);
        r.skip(10)?; // reserved

        let mut auth_data = auth_data_1.to_vec();
        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len.saturating_sub(8).max(13);
            let part2 = r.read_bytes(len2)?;
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            // Some servers omit the terminator on the final field.
            match r.read_null_string() {
                Ok(name) => name,
                Err(_) => r.read_rest_string(),
            }
        } else {
            String::new()
        };

        Ok(InitialHandshake {
            server_version,
            connection_id,
            auth_data,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }
}

/// Server-side encoding, used to script servers in tests and tools.
impl Serialize for InitialHandshake {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(PROTOCOL_VERSION);
        w.write_null_string(&self.server_version);
        w.write_u32_le(self.connection_id);
        let (part1, part2) = self.auth_data.split_at(self.auth_data.len().min(8));
        w.write_bytes(part1);
        w.write_zeros(8 - part1.len());
        w.write_u8(0);
        w.write_u16_le((self.capabilities & 0xFFFF) as u16);
        w.write_u8(self.charset);
        w.write_u16_le(self.status_flags);
        w.write_u16_le((self.capabilities >> 16) as u16);
        w.write_u8((self.auth_data.len() + 1) as u8);
        w.write_zeros(10);
        w.write_bytes(part2);
        w.write_zeros(13usize.saturating_sub(part2.len()).max(1));
        w.write_null_string(&self.auth_plugin);
    }
}

/// SSLRequest: the first 32 bytes of a handshake response, sent in clear
/// before the TLS upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslRequest {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
}

impl Serialize for SslRequest {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u32_le(self.capabilities | capabilities::CLIENT_SSL);
        w.write_u32_le(self.max_packet_size);
        w.write_u8(self.charset);
        w.write_zeros(23);
    }
}

/// HandshakeResponse41.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeResponse<'a> {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin: &'a str,
}

impl Serialize for HandshakeResponse<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u32_le(self.capabilities);
        w.write_u32_le(self.max_packet_size);
        w.write_u8(self.charset);
        w.write_zeros(23);
        w.write_null_string(self.username);
        w.write_lenenc_bytes(self.auth_response);
        if self.capabilities & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            w.write_null_string(self.database.unwrap_or_default());
        }
        w.write_null_string(self.auth_plugin);
    }
}

/// Auth switch request: 0xFE, plugin name, then the new challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest<'a> {
    pub plugin: String,
    pub auth_data: &'a [u8],
}

impl<'a> Deserialize<'a> for AuthSwitchRequest<'a> {
    fn deserialize(r: &mut PacketReader<'a>) -> Result<Self> {
        let header = r.read_u8()?;
        if header != AUTH_SWITCH_HEADER {
            return Err(malformed(format!(
                "bad auth switch header 0x{header:02x}"
            )));
        }
        let plugin = r.read_null_string()?;
        let rest = r.read_rest();
        Ok(AuthSwitchRequest {
            plugin,
            auth_data: rest.strip_suffix(&[0]).unwrap_or(rest),
        })
    }
}

impl Serialize for AuthSwitchRequest<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(AUTH_SWITCH_HEADER);
        w.write_null_string(&self.plugin);
        w.write_null_bytes(self.auth_data);
    }
}

/// Extra round within the current plugin: 0x01 then plugin-specific data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMoreData<'a> {
    pub data: &'a [u8],
}

impl<'a> Deserialize<'a> for AuthMoreData<'a> {
    fn deserialize(r: &mut PacketReader<'a>) -> Result<Self> {
        let header = r.read_u8()?;
        if header != AUTH_MORE_DATA_HEADER {
            return Err(malformed(format!(
                "bad auth-more-data header 0x{header:02x}"
            )));
        }
        Ok(AuthMoreData { data: r.read_rest() })
    }
}

impl Serialize for AuthMoreData<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(AUTH_MORE_DATA_HEADER);
        w.write_bytes(self.data);
    }
}
