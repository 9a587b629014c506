//! Blocking channel.
//!
//! [`Channel`] drives the handshake state machine and the command pipeline
//! synchronously on the calling thread. Commands are strictly serialized: a
//! [`Resultset`] borrows the channel until it is dropped.

use mysqlwire_core::error::{TransportErrorKind, UsageErrorKind};
use mysqlwire_core::{Result, Value};

use crate::config::MySqlConfig;
use crate::execute::{
    ChannelCore, ChannelState, ResponseHead, RowFormat, classify_ping, classify_prepare,
    classify_response, ends_rows, prealloc, usage_error,
};
use crate::handshake::{Event, Handshake, Step};
use crate::protocol::{
    ComPing, ComQuery, ComQuit, ComStmtClose, ComStmtExecute, ComStmtPrepare, Deserialize,
    Serialize, StmtPrepareOk,
};
use crate::resultset::{Resultset, RowCursor};
use crate::transport::{MySqlStream, Transport, transport_error};
use crate::types::ColumnDef;

/// A prepared statement handle.
///
/// The handle remembers which channel prepared it and is checked on every
/// use; it does not borrow the channel.
#[derive(Debug)]
pub struct PreparedStatement {
    id: u32,
    channel_id: u64,
    params: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
    warnings: u16,
    closed: bool,
}

impl PreparedStatement {
    pub(crate) fn new(
        channel_id: u64,
        ok: StmtPrepareOk,
        params: Vec<ColumnDef>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        Self {
            id: ok.statement_id,
            channel_id,
            params,
            columns,
            warnings: ok.warnings,
            closed: false,
        }
    }

    /// Server-assigned statement id.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Parameter definitions sent by the server at prepare time.
    pub fn params(&self) -> &[ColumnDef] {
        &self.params
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn check_owner(&self, channel_id: u64) -> Result<()> {
        if self.channel_id == channel_id {
            Ok(())
        } else {
            Err(usage_error(
                UsageErrorKind::ForeignStatement,
                format!(
                    "statement {} belongs to channel {}, not channel {channel_id}",
                    self.id, self.channel_id
                ),
            ))
        }
    }

    /// Validate an execute call before anything is written.
    pub(crate) fn check_execute(&self, channel_id: u64, params: &[Value]) -> Result<()> {
        self.check_owner(channel_id)?;
        if self.closed {
            return Err(usage_error(
                UsageErrorKind::StatementClosed,
                format!("statement {} is closed", self.id),
            ));
        }
        if params.len() != self.num_params() {
            return Err(usage_error(
                UsageErrorKind::WrongParamCount {
                    expected: self.num_params(),
                    actual: params.len(),
                },
                format!(
                    "expected {} params, but got {}",
                    self.num_params(),
                    params.len()
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

/// A blocking client channel over transport `S`.
pub struct Channel<S: Transport = MySqlStream> {
    pub(crate) stream: S,
    pub(crate) core: ChannelCore,
}

impl<S: Transport> std::fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.core.id)
            .field("state", &self.core.current_state())
            .field("server_version", &self.server_version())
            .field("connection_id", &self.connection_id())
            .field("secure", &self.core.secure)
            .finish_non_exhaustive()
    }
}

impl Channel<MySqlStream> {
    /// Open a TCP connection and authenticate.
    #[tracing::instrument(level = "debug", skip(config), fields(addr = %config.socket_addr()))]
    pub fn connect(config: &MySqlConfig) -> Result<Self> {
        let stream = MySqlStream::connect(config)?;
        Self::handshake(stream, config)
    }
}

impl<S: Transport> Channel<S> {
    /// Authenticate over an already connected stream.
    pub fn handshake(stream: S, config: &MySqlConfig) -> Result<Self> {
        let mut channel = Channel {
            stream,
            core: ChannelCore::new(),
        };
        let mut hs = Handshake::new(config, channel.stream.is_secure());
        let mut step = hs.resume(Event::Start)?;
        loop {
            step = match step {
                Step::Read => {
                    let message = channel.read_message()?;
                    hs.resume(Event::Message(&message))?
                }
                Step::Write(payload) => {
                    channel.write_message(&payload)?;
                    hs.resume(Event::Written)?
                }
                Step::UpgradeTls => {
                    channel.stream.upgrade_tls(config)?;
                    hs.resume(Event::TlsUpgraded)?
                }
                Step::Done => break,
            };
        }
        channel.core.adopt(&hs);
        Ok(channel)
    }

    /// Run a text-protocol statement.
    #[tracing::instrument(level = "debug", skip(self), fields(channel = self.core.id))]
    pub fn query(&mut self, sql: &str) -> Result<Resultset<'_, S>> {
        self.core.check_usable()?;
        let cursor = self.run_command(&ComQuery { sql }.to_payload(), RowFormat::Text)?;
        Ok(Resultset::new(self, cursor))
    }

    #[tracing::instrument(level = "debug", skip(self), fields(channel = self.core.id))]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.core.check_usable()?;
        self.drain_rows()?;
        self.core.start_command();
        self.write_message(&ComStmtPrepare { sql }.to_payload())?;
        let payload = self.read_message()?;
        let ok = classify_prepare(&payload).map_err(|e| self.core.fail(e))?;
        let params = self.read_fields(usize::from(ok.num_params))?;
        let columns = self.read_fields(usize::from(ok.num_columns))?;
        self.core.end_exchange();
        tracing::debug!(
            statement_id = ok.statement_id,
            params = params.len(),
            columns = columns.len(),
            "statement prepared"
        );
        Ok(PreparedStatement::new(self.core.id, ok, params, columns))
    }

    /// Execute a prepared statement with binary-encoded parameters.
    #[tracing::instrument(
        level = "debug",
        skip(self, stmt, params),
        fields(channel = self.core.id, statement_id = stmt.id())
    )]
    pub fn execute(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<Resultset<'_, S>> {
        self.core.check_usable()?;
        stmt.check_execute(self.core.id, params)?;
        let request = ComStmtExecute {
            statement_id: stmt.id(),
            params,
        }
        .to_payload();
        let cursor = self.run_command(&request, RowFormat::Binary)?;
        Ok(Resultset::new(self, cursor))
    }

    /// Deallocate a prepared statement. Closing twice is a no-op.
    #[tracing::instrument(
        level = "debug",
        skip(self, stmt),
        fields(channel = self.core.id, statement_id = stmt.id())
    )]
    pub fn close_statement(&mut self, stmt: &mut PreparedStatement) -> Result<()> {
        if stmt.is_closed() {
            return Ok(());
        }
        stmt.check_owner(self.core.id)?;
        self.core.check_usable()?;
        self.drain_rows()?;
        self.core.start_command();
        self.write_message(
            &ComStmtClose {
                statement_id: stmt.id(),
            }
            .to_payload(),
        )?;
        self.core.end_exchange();
        stmt.mark_closed();
        Ok(())
    }

    /// COM_PING round trip.
    #[tracing::instrument(level = "debug", skip(self), fields(channel = self.core.id))]
    pub fn ping(&mut self) -> Result<()> {
        self.core.check_usable()?;
        self.drain_rows()?;
        self.core.start_command();
        self.write_message(&ComPing.to_payload())?;
        let payload = self.read_message()?;
        let ok = classify_ping(&payload).map_err(|e| self.core.fail(e))?;
        self.core.end_exchange();
        self.core.status_flags = ok.status_flags;
        Ok(())
    }

    /// Send COM_QUIT (best effort) and mark the channel closed.
    #[tracing::instrument(level = "debug", skip(self), fields(channel = self.core.id))]
    pub fn close(&mut self) -> Result<()> {
        match self.core.current_state() {
            ChannelState::Closed => return Ok(()),
            ChannelState::Broken => {}
            ChannelState::Ready | ChannelState::ReadingRows => {
                self.core.start_command();
                if let Err(e) = self.write_message(&ComQuit.to_payload()) {
                    tracing::debug!(error = %e, "COM_QUIT failed");
                }
            }
        }
        self.core.mark_closed();
        Ok(())
    }

    /// Process-unique id, recorded by prepared statements.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn state(&self) -> ChannelState {
        self.core.current_state()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.core
            .server
            .as_ref()
            .map(|s| s.server_version.as_str())
    }

    pub fn connection_id(&self) -> u32 {
        self.core.server.as_ref().map_or(0, |s| s.connection_id)
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.core.capabilities
    }

    /// Status flags from the most recent OK packet.
    pub fn status_flags(&self) -> u16 {
        self.core.status_flags
    }

    pub fn is_secure(&self) -> bool {
        self.core.secure
    }

    pub fn is_broken(&self) -> bool {
        self.core.current_state() == ChannelState::Broken
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn run_command(&mut self, request: &[u8], format: RowFormat) -> Result<RowCursor> {
        self.drain_rows()?;
        self.core.start_command();
        self.write_message(request)?;
        let payload = self.read_message()?;
        match classify_response(&payload).map_err(|e| self.core.fail(e))? {
            ResponseHead::Ok(ok) => {
                self.core.end_exchange();
                self.core.status_flags = ok.status_flags;
                Ok(RowCursor::from_ok(ok))
            }
            ResponseHead::Rows { field_count } => {
                let fields = self.read_fields(field_count)?;
                self.core.end_exchange();
                Ok(RowCursor::from_fields(format, fields))
            }
        }
    }

    fn read_fields(&mut self, count: usize) -> Result<Vec<ColumnDef>> {
        let mut fields = Vec::with_capacity(prealloc(count));
        for _ in 0..count {
            let payload = self.read_message()?;
            fields.push(ColumnDef::from_payload(&payload).map_err(|e| self.core.fail(e))?);
        }
        Ok(fields)
    }

    /// Consume the rest of an abandoned resultset.
    fn drain_rows(&mut self) -> Result<()> {
        if self.core.state != ChannelState::ReadingRows {
            return Ok(());
        }
        tracing::warn!(channel = self.core.id, "draining unread rows of an abandoned resultset");
        loop {
            let payload = self.read_message()?;
            if ends_rows(&payload) {
                break;
            }
        }
        self.core.state = ChannelState::Ready;
        Ok(())
    }

    pub(crate) fn finish_rows(&mut self, status_flags: u16) {
        self.core.state = ChannelState::Ready;
        self.core.status_flags = status_flags;
    }

    pub(crate) fn read_message(&mut self) -> Result<Vec<u8>> {
        self.read_message_inner().map_err(|e| self.core.fail(e))
    }

    fn read_message_inner(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(payload) = self.core.next_message()? {
                return Ok(payload);
            }
            let n = self.stream.read(self.core.read_space())?;
            if n == 0 {
                return Err(transport_error(
                    TransportErrorKind::Disconnected,
                    "connection closed by server",
                    None,
                ));
            }
            self.core.advance_read(n);
        }
    }

    pub(crate) fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.write_message_inner(payload)
            .map_err(|e| self.core.fail(e))
    }

    fn write_message_inner(&mut self, payload: &[u8]) -> Result<()> {
        let frames = self.core.frame(payload);
        self.stream.write_all(frames)?;
        self.stream.flush()
    }
}
