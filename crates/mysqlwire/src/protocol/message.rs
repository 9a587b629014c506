//! Typed protocol records.
//!
//! Each record implements [`Serialize`] or [`Deserialize`] by walking its
//! fields in wire order. Decoding stops at the first field that fails.

use mysqlwire_core::{Result, ServerError};

use super::{Command, OkPacket, PacketReader, PacketWriter, malformed};

/// A record the client sends.
pub trait Serialize {
    fn serialize(&self, w: &mut PacketWriter);

    fn to_payload(&self) -> Vec<u8> {
        let mut w = PacketWriter::new();
        self.serialize(&mut w);
        w.into_bytes()
    }
}

/// A record the client receives.
pub trait Deserialize<'a>: Sized {
    fn deserialize(r: &mut PacketReader<'a>) -> Result<Self>;

    fn from_payload(payload: &'a [u8]) -> Result<Self> {
        Self::deserialize(&mut PacketReader::new(payload))
    }
}

/// Raw bytes sent as-is (auth responses after the handshake response).
impl Serialize for [u8] {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_bytes(self);
    }
}

impl Serialize for Vec<u8> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_bytes(self);
    }
}

/// COM_QUERY: command byte followed by the EOF-terminated statement text.
#[derive(Debug, Clone, Copy)]
pub struct ComQuery<'a> {
    pub sql: &'a str,
}

impl Serialize for ComQuery<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::Query as u8);
        w.write_bytes(self.sql.as_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComPing;

impl Serialize for ComPing {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::Ping as u8);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComQuit;

impl Serialize for ComQuit {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::Quit as u8);
    }
}

/// OK packet (protocol 4.1+):
/// - 0x00 header (0xFE when it terminates a resultset)
/// - affected_rows: lenenc int
/// - last_insert_id: lenenc int
/// - status_flags: 2 bytes
/// - warnings: 2 bytes
/// - info: rest of packet
impl Deserialize<'_> for OkPacket {
    fn deserialize(r: &mut PacketReader<'_>) -> Result<Self> {
        let header = r.read_u8()?;
        if header != 0x00 && header != 0xFE {
            return Err(malformed(format!("bad OK packet header 0x{header:02x}")));
        }
        // Pre-deprecate-EOF servers send the 5-byte EOF form here.
        if header == 0xFE && r.remaining() == 4 {
            let warnings = r.read_u16_le()?;
            let status_flags = r.read_u16_le()?;
            return Ok(OkPacket {
                warnings,
                status_flags,
                ..OkPacket::default()
            });
        }
        Ok(OkPacket {
            affected_rows: r.read_lenenc_int()?,
            last_insert_id: r.read_lenenc_int()?,
            status_flags: r.read_u16_le()?,
            warnings: r.read_u16_le()?,
            info: r.read_rest_string(),
        })
    }
}

/// ERR packet (protocol 4.1+):
/// - 0xFF header
/// - error_code: 2 bytes
/// - '#' marker and 5-byte SQL state
/// - error_message: rest of packet
impl Deserialize<'_> for ServerError {
    fn deserialize(r: &mut PacketReader<'_>) -> Result<Self> {
        let header = r.read_u8()?;
        if header != 0xFF {
            return Err(malformed(format!("bad ERR packet header 0x{header:02x}")));
        }
        let code = r.read_u16_le()?;
        let sqlstate = if r.peek() == Some(b'#') {
            r.skip(1)?;
            r.read_string(5)?
        } else {
            String::new()
        };
        Ok(ServerError {
            code,
            sqlstate,
            message: r.read_rest_string(),
        })
    }
}
