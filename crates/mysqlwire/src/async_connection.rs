//! Async channel on the asupersync runtime.
//!
//! [`AsyncChannel`] mirrors [`Channel`](crate::Channel) operation for
//! operation. Every operation takes a `&Cx` and returns an [`Outcome`].
//!
//! Cancellation is checked before each message is read and before each
//! write. An operation that observes it returns [`Outcome::Cancelled`] and
//! leaves the channel broken, whether or not a command was in flight, and
//! later operations fail with `ChannelBroken`. Dropping an operation's
//! future after its command is written but before the response head is
//! consumed has the same effect.

use asupersync::types::CancelReason;
use asupersync::{Cx, Outcome};
use mysqlwire_core::error::TransportErrorKind;
use mysqlwire_core::{Error, Value};

use crate::config::MySqlConfig;
use crate::connection::PreparedStatement;
use crate::execute::{
    ChannelCore, ChannelState, ResponseHead, RowFormat, classify_ping, classify_prepare,
    classify_response, ends_rows, prealloc,
};
use crate::handshake::{Event, Handshake, Step};
use crate::protocol::{
    ComPing, ComQuery, ComQuit, ComStmtClose, ComStmtExecute, ComStmtPrepare, Deserialize,
    Serialize,
};
use crate::resultset::{AsyncResultset, RowCursor};
use crate::transport::{AsyncMySqlStream, AsyncTransport, transport_error};
use crate::types::ColumnDef;

/// An async client channel over transport `S`.
pub struct AsyncChannel<S: AsyncTransport = AsyncMySqlStream> {
    pub(crate) stream: S,
    pub(crate) core: ChannelCore,
}

impl<S: AsyncTransport> std::fmt::Debug for AsyncChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncChannel")
            .field("id", &self.core.id)
            .field("state", &self.core.current_state())
            .field("server_version", &self.server_version())
            .field("connection_id", &self.connection_id())
            .field("secure", &self.core.secure)
            .finish_non_exhaustive()
    }
}

impl AsyncChannel<AsyncMySqlStream> {
    /// Open a TCP connection and authenticate.
    pub async fn connect(cx: &Cx, config: &MySqlConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cancel_requested(cx) {
            return Outcome::Cancelled(reason);
        }
        tracing::debug!(addr = %config.socket_addr(), "connecting");
        let stream = match AsyncMySqlStream::connect(config).await {
            Ok(stream) => stream,
            Err(e) => return Outcome::Err(e),
        };
        Self::handshake(cx, stream, config).await
    }
}

impl<S: AsyncTransport> AsyncChannel<S> {
    /// Authenticate over an already connected stream.
    pub async fn handshake(cx: &Cx, stream: S, config: &MySqlConfig) -> Outcome<Self, Error> {
        let mut channel = AsyncChannel {
            stream,
            core: ChannelCore::new(),
        };
        let mut hs = Handshake::new(config, channel.stream.is_secure());
        let mut step = match hs.resume(Event::Start) {
            Ok(step) => step,
            Err(e) => return Outcome::Err(e),
        };
        loop {
            let next = match step {
                Step::Read => {
                    let message = match channel.read_message(cx).await {
                        Outcome::Ok(m) => m,
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    };
                    hs.resume(Event::Message(&message))
                }
                Step::Write(payload) => {
                    match channel.write_message(cx, &payload).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                    hs.resume(Event::Written)
                }
                Step::UpgradeTls => {
                    if let Some(reason) = cancel_requested(cx) {
                        return Outcome::Cancelled(reason);
                    }
                    if let Err(e) = channel.stream.upgrade_tls(config).await {
                        return Outcome::Err(e);
                    }
                    hs.resume(Event::TlsUpgraded)
                }
                Step::Done => break,
            };
            step = match next {
                Ok(step) => step,
                Err(e) => return Outcome::Err(e),
            };
        }
        channel.core.adopt(&hs);
        Outcome::Ok(channel)
    }

    /// Run a text-protocol statement.
    pub async fn query(&mut self, cx: &Cx, sql: &str) -> Outcome<AsyncResultset<'_, S>, Error> {
        if let Err(e) = self.core.check_usable() {
            return Outcome::Err(e);
        }
        tracing::debug!(channel = self.core.id, sql, "query");
        let request = ComQuery { sql }.to_payload();
        match self.run_command(cx, &request, RowFormat::Text).await {
            Outcome::Ok(cursor) => Outcome::Ok(AsyncResultset::new(self, cursor)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub async fn prepare(&mut self, cx: &Cx, sql: &str) -> Outcome<PreparedStatement, Error> {
        if let Err(e) = self.core.check_usable() {
            return Outcome::Err(e);
        }
        match self.drain_rows(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.core.start_command();
        match self.write_message(cx, &ComStmtPrepare { sql }.to_payload()).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let payload = match self.read_message(cx).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let ok = match classify_prepare(&payload) {
            Ok(ok) => ok,
            Err(e) => return Outcome::Err(self.core.fail(e)),
        };
        let params = match self.read_fields(cx, usize::from(ok.num_params)).await {
            Outcome::Ok(f) => f,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let columns = match self.read_fields(cx, usize::from(ok.num_columns)).await {
            Outcome::Ok(f) => f,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.core.end_exchange();
        tracing::debug!(
            statement_id = ok.statement_id,
            params = params.len(),
            columns = columns.len(),
            "statement prepared"
        );
        Outcome::Ok(PreparedStatement::new(self.core.id, ok, params, columns))
    }

    /// Execute a prepared statement with binary-encoded parameters.
    pub async fn execute(
        &mut self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Outcome<AsyncResultset<'_, S>, Error> {
        if let Err(e) = self.core.check_usable() {
            return Outcome::Err(e);
        }
        if let Err(e) = stmt.check_execute(self.core.id, params) {
            return Outcome::Err(e);
        }
        let request = ComStmtExecute {
            statement_id: stmt.id(),
            params,
        }
        .to_payload();
        match self.run_command(cx, &request, RowFormat::Binary).await {
            Outcome::Ok(cursor) => Outcome::Ok(AsyncResultset::new(self, cursor)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Deallocate a prepared statement. Closing twice is a no-op.
    pub async fn close_statement(
        &mut self,
        cx: &Cx,
        stmt: &mut PreparedStatement,
    ) -> Outcome<(), Error> {
        if stmt.is_closed() {
            return Outcome::Ok(());
        }
        if let Err(e) = stmt.check_owner(self.core.id) {
            return Outcome::Err(e);
        }
        if let Err(e) = self.core.check_usable() {
            return Outcome::Err(e);
        }
        match self.drain_rows(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.core.start_command();
        let request = ComStmtClose {
            statement_id: stmt.id(),
        }
        .to_payload();
        match self.write_message(cx, &request).await {
            Outcome::Ok(()) => {
                self.core.end_exchange();
                stmt.mark_closed();
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// COM_PING round trip.
    pub async fn ping(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Err(e) = self.core.check_usable() {
            return Outcome::Err(e);
        }
        match self.drain_rows(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.core.start_command();
        match self.write_message(cx, &ComPing.to_payload()).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let payload = match self.read_message(cx).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match classify_ping(&payload) {
            Ok(ok) => {
                self.core.end_exchange();
                self.core.status_flags = ok.status_flags;
                Outcome::Ok(())
            }
            Err(e) => Outcome::Err(self.core.fail(e)),
        }
    }

    /// Send COM_QUIT (best effort) and mark the channel closed.
    ///
    /// Runs to completion even if `cx` is cancelled.
    pub async fn close(&mut self, _cx: &Cx) -> Outcome<(), Error> {
        match self.core.current_state() {
            ChannelState::Closed => return Outcome::Ok(()),
            ChannelState::Broken => {}
            ChannelState::Ready | ChannelState::ReadingRows => {
                self.core.start_command();
                if let Err(e) = self.write_message_inner(&ComQuit.to_payload()).await {
                    tracing::debug!(error = %e, "COM_QUIT failed");
                }
            }
        }
        self.core.mark_closed();
        Outcome::Ok(())
    }

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

    pub fn capabilities(&self) -> u32 {
        self.core.capabilities
    }

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

    async fn run_command(
        &mut self,
        cx: &Cx,
        request: &[u8],
        format: RowFormat,
    ) -> Outcome<RowCursor, Error> {
        match self.drain_rows(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.core.start_command();
        match self.write_message(cx, request).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let payload = match self.read_message(cx).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let head = match classify_response(&payload) {
            Ok(head) => head,
            Err(e) => return Outcome::Err(self.core.fail(e)),
        };
        match head {
            ResponseHead::Ok(ok) => {
                self.core.end_exchange();
                self.core.status_flags = ok.status_flags;
                Outcome::Ok(RowCursor::from_ok(ok))
            }
            ResponseHead::Rows { field_count } => match self.read_fields(cx, field_count).await {
                Outcome::Ok(fields) => {
                    self.core.end_exchange();
                    Outcome::Ok(RowCursor::from_fields(format, fields))
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
        }
    }

    async fn read_fields(&mut self, cx: &Cx, count: usize) -> Outcome<Vec<ColumnDef>, Error> {
        let mut fields = Vec::with_capacity(prealloc(count));
        for _ in 0..count {
            let payload = match self.read_message(cx).await {
                Outcome::Ok(p) => p,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match ColumnDef::from_payload(&payload) {
                Ok(field) => fields.push(field),
                Err(e) => return Outcome::Err(self.core.fail(e)),
            }
        }
        Outcome::Ok(fields)
    }

    /// Consume the rest of an abandoned resultset.
    async fn drain_rows(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.core.state != ChannelState::ReadingRows {
            return Outcome::Ok(());
        }
        tracing::warn!(channel = self.core.id, "draining unread rows of an abandoned resultset");
        loop {
            let payload = match self.read_message(cx).await {
                Outcome::Ok(p) => p,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if ends_rows(&payload) {
                break;
            }
        }
        self.core.state = ChannelState::Ready;
        Outcome::Ok(())
    }

    pub(crate) fn finish_rows(&mut self, status_flags: u16) {
        self.core.state = ChannelState::Ready;
        self.core.status_flags = status_flags;
    }

    pub(crate) async fn read_message(&mut self, cx: &Cx) -> Outcome<Vec<u8>, Error> {
        loop {
            if let Some(reason) = cancel_requested(cx) {
                self.core.interrupt();
                return Outcome::Cancelled(reason);
            }
            match self.core.next_message() {
                Ok(Some(payload)) => return Outcome::Ok(payload),
                Ok(None) => {}
                Err(e) => return Outcome::Err(self.core.fail(e)),
            }
            let n = match self.stream.read(self.core.read_space()).await {
                Ok(n) => n,
                Err(e) => return Outcome::Err(self.core.fail(e)),
            };
            if n == 0 {
                let err = transport_error(
                    TransportErrorKind::Disconnected,
                    "connection closed by server",
                    None,
                );
                return Outcome::Err(self.core.fail(err));
            }
            self.core.advance_read(n);
        }
    }

    pub(crate) async fn write_message(&mut self, cx: &Cx, payload: &[u8]) -> Outcome<(), Error> {
        if let Some(reason) = cancel_requested(cx) {
            self.core.interrupt();
            return Outcome::Cancelled(reason);
        }
        match self.write_message_inner(payload).await {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(self.core.fail(e)),
        }
    }

    async fn write_message_inner(&mut self, payload: &[u8]) -> mysqlwire_core::Result<()> {
        let frames = self.core.frame(payload);
        self.stream.write_all(frames).await?;
        self.stream.flush().await
    }
}

fn cancel_requested(cx: &Cx) -> Option<CancelReason> {
    if cx.is_cancel_requested() {
        Some(
            cx.cancel_reason()
                .unwrap_or_else(|| CancelReason::user("cancelled")),
        )
    } else {
        None
    }
}
