//! Command-phase pipeline steps shared by the blocking and async channels.
//!
//! Nothing here performs I/O: [`ChannelCore`] owns the sequence counter
//! and the reusable buffers, and the classify functions turn one server
//! message into the next pipeline decision.

use std::sync::atomic::{AtomicU64, Ordering};

use mysqlwire_core::error::{ProtocolErrorKind, UsageError, UsageErrorKind};
use mysqlwire_core::{Error, Result, Value};

use crate::handshake::{Handshake, ServerInfo};
use crate::protocol::{
    Deserialize, FrameCodec, OkPacket, PacketReader, PacketType, StmtPrepareOk, malformed,
    protocol_error, server_error, unexpected_packet,
};
use crate::types::{ColumnDef, decode_binary_row, decode_text_row};

/// Bytes requested from the transport per read call.
const READ_CHUNK: usize = 8192;

/// Upper bound on speculative allocation for server-announced counts.
const MAX_PREALLOC: usize = 1024;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Idle, ready for the next command
    Ready,
    /// A resultset has rows left on the wire
    ReadingRows,
    /// A fatal error or cancellation left the exchange mid-way
    Broken,
    Closed,
}

/// Sequence counter, buffers and negotiated session facts of one channel.
#[derive(Debug)]
pub(crate) struct ChannelCore {
    pub(crate) id: u64,
    pub(crate) state: ChannelState,
    pub(crate) capabilities: u32,
    pub(crate) server: Option<ServerInfo>,
    pub(crate) secure: bool,
    pub(crate) status_flags: u16,
    /// Set from the command write until its response head is consumed
    in_flight: bool,
    codec: FrameCodec,
    read_buf: Vec<u8>,
    filled: usize,
    write_buf: Vec<u8>,
}

impl ChannelCore {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            state: ChannelState::Ready,
            capabilities: 0,
            server: None,
            secure: false,
            status_flags: 0,
            in_flight: false,
            codec: FrameCodec::new(),
            read_buf: Vec::with_capacity(READ_CHUNK),
            filled: 0,
            write_buf: Vec::new(),
        }
    }

    /// Copy the negotiated session out of a finished handshake.
    pub(crate) fn adopt(&mut self, handshake: &Handshake<'_>) {
        self.capabilities = handshake.capabilities();
        self.server = handshake.server().cloned();
        self.secure = handshake.is_secure();
        self.status_flags = handshake.status_flags();
        self.state = ChannelState::Ready;
        self.in_flight = false;
    }

    /// The channel state as seen between operations. An exchange still in
    /// flight here was abandoned with its response unread.
    pub(crate) fn current_state(&self) -> ChannelState {
        if self.in_flight {
            ChannelState::Broken
        } else {
            self.state
        }
    }

    /// Fail fast on channels that must not carry another command.
    pub(crate) fn check_usable(&mut self) -> Result<()> {
        if self.in_flight {
            tracing::debug!(
                channel = self.id,
                "previous command abandoned before its response, channel broken"
            );
            self.in_flight = false;
            self.state = ChannelState::Broken;
        }
        match self.state {
            ChannelState::Ready | ChannelState::ReadingRows => Ok(()),
            ChannelState::Broken => Err(usage_error(
                UsageErrorKind::ChannelBroken,
                "channel is broken after an earlier failure; reconnect",
            )),
            ChannelState::Closed => Err(usage_error(
                UsageErrorKind::ChannelClosed,
                "channel is closed",
            )),
        }
    }

    /// Record the effect of a failed step on the channel.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        self.in_flight = false;
        if err.is_fatal() {
            if self.state != ChannelState::Closed {
                tracing::debug!(channel = self.id, error = %err, "channel broken");
                self.state = ChannelState::Broken;
            }
        } else if matches!(err, Error::Server(_)) && self.state == ChannelState::ReadingRows {
            // An error packet terminates the resultset.
            self.state = ChannelState::Ready;
        }
        err
    }

    pub(crate) fn start_command(&mut self) {
        self.codec.reset();
        self.in_flight = true;
    }

    /// The response head has been consumed; the channel may be reused.
    pub(crate) fn end_exchange(&mut self) {
        self.in_flight = false;
    }

    /// Mark the channel broken after a cancelled exchange.
    pub(crate) fn interrupt(&mut self) {
        self.in_flight = false;
        if self.state != ChannelState::Closed {
            tracing::debug!(channel = self.id, "cancelled mid-exchange, channel broken");
            self.state = ChannelState::Broken;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.in_flight = false;
        self.state = ChannelState::Closed;
    }

    /// Frame `payload` into the write buffer and return the wire bytes.
    pub(crate) fn frame(&mut self, payload: &[u8]) -> &[u8] {
        self.write_buf.clear();
        self.codec.encode(payload, &mut self.write_buf);
        &self.write_buf
    }

    /// Free space for the next transport read.
    pub(crate) fn read_space(&mut self) -> &mut [u8] {
        if self.read_buf.len() < self.filled + READ_CHUNK {
            self.read_buf.resize(self.filled + READ_CHUNK, 0);
        }
        &mut self.read_buf[self.filled..]
    }

    pub(crate) fn advance_read(&mut self, n: usize) {
        self.filled += n;
    }

    /// Pop one complete message off the read buffer, if there is one.
    pub(crate) fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        match self.codec.decode(&self.read_buf[..self.filled])? {
            Some((payload, used)) => {
                self.read_buf.copy_within(used..self.filled, 0);
                self.filled -= used;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }
}

pub(crate) fn usage_error(kind: UsageErrorKind, message: impl Into<String>) -> Error {
    Error::Usage(UsageError {
        kind,
        message: message.into(),
    })
}

/// First message of a command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHead {
    /// No resultset: affected rows, insert id and status
    Ok(OkPacket),
    /// `field_count` column definitions follow
    Rows { field_count: usize },
}

/// Classify the first response message of a query or execute.
pub fn classify_response(payload: &[u8]) -> Result<ResponseHead> {
    match PacketType::of(payload) {
        None => Err(malformed("empty command response")),
        Some(PacketType::Ok) => Ok(ResponseHead::Ok(OkPacket::from_payload(payload)?)),
        Some(PacketType::Error) => Err(server_error(payload)),
        Some(PacketType::LocalInfile) => Err(protocol_error(
            ProtocolErrorKind::LocalInfile,
            "LOCAL INFILE requests are not supported",
        )),
        Some(PacketType::Eof) => Err(unexpected_packet("as command response", payload)),
        Some(PacketType::Data) => {
            let mut r = PacketReader::new(payload);
            let field_count = r.read_lenenc_count()?;
            if !r.is_empty() {
                return Err(malformed(format!(
                    "{} trailing bytes after field count",
                    r.remaining()
                )));
            }
            if field_count == 0 {
                return Err(malformed("resultset announced zero fields"));
            }
            Ok(ResponseHead::Rows { field_count })
        }
    }
}

/// Capacity to reserve for `count` server-announced items.
pub(crate) fn prealloc(count: usize) -> usize {
    count.min(MAX_PREALLOC)
}

/// Classify the COM_STMT_PREPARE response header.
pub fn classify_prepare(payload: &[u8]) -> Result<StmtPrepareOk> {
    match PacketType::of(payload) {
        Some(PacketType::Error) => Err(server_error(payload)),
        Some(PacketType::Ok) => StmtPrepareOk::from_payload(payload),
        _ => Err(unexpected_packet("as COM_STMT_PREPARE response", payload)),
    }
}

/// Classify the reply to COM_PING.
pub fn classify_ping(payload: &[u8]) -> Result<OkPacket> {
    match PacketType::of(payload) {
        Some(PacketType::Ok) => OkPacket::from_payload(payload),
        Some(PacketType::Error) => Err(server_error(payload)),
        _ => Err(unexpected_packet("as COM_PING response", payload)),
    }
}

/// Row encoding of a resultset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY: every value is a length-encoded string
    Text,
    /// COM_STMT_EXECUTE: NULL bitmap plus native encodings
    Binary,
}

impl RowFormat {
    pub fn decode(self, columns: &[ColumnDef], payload: &[u8]) -> Result<Vec<Value>> {
        match self {
            RowFormat::Text => decode_text_row(columns, payload),
            RowFormat::Binary => decode_binary_row(columns, payload),
        }
    }
}

/// One message of the row stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMessage {
    Row(Vec<Value>),
    /// The deprecate-EOF terminator
    End(OkPacket),
}

/// Classify one message of a row stream and decode it.
pub fn classify_row(format: RowFormat, columns: &[ColumnDef], payload: &[u8]) -> Result<RowMessage> {
    match PacketType::of(payload) {
        None => Err(malformed("empty row packet")),
        Some(PacketType::Eof) => Ok(RowMessage::End(OkPacket::from_payload(payload)?)),
        Some(PacketType::Error) => Err(server_error(payload)),
        Some(_) => Ok(RowMessage::Row(format.decode(columns, payload)?)),
    }
}

/// Whether a message ends the row stream, for draining without metadata.
pub(crate) fn ends_rows(payload: &[u8]) -> bool {
    matches!(
        PacketType::of(payload),
        Some(PacketType::Eof | PacketType::Error)
    )
}
