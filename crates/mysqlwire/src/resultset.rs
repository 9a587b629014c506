//! Lazy, single-pass resultsets.
//!
//! A resultset mutably borrows its channel until it is dropped, so no other
//! command can start while rows are still on the wire. Dropping it early is
//! allowed: the channel drains the leftover rows before its next command.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use mysqlwire_core::{ColumnInfo, Error, Result, Row};

use crate::async_connection::AsyncChannel;
use crate::connection::Channel;
use crate::execute::{ChannelState, RowFormat, RowMessage, classify_row};
use crate::protocol::OkPacket;
use crate::transport::{AsyncTransport, Transport};
use crate::types::ColumnDef;

/// Metadata and decode state of one resultset, independent of I/O.
#[derive(Debug, Clone)]
pub struct RowCursor {
    format: RowFormat,
    fields: Vec<ColumnDef>,
    columns: Arc<ColumnInfo>,
    status: OkPacket,
    exhausted: bool,
}

impl RowCursor {
    /// OK-shape: no fields, already exhausted.
    pub(crate) fn from_ok(ok: OkPacket) -> Self {
        Self {
            format: RowFormat::Text,
            fields: Vec::new(),
            columns: Arc::new(ColumnInfo::default()),
            status: ok,
            exhausted: true,
        }
    }

    /// Rows-shape: rows follow on the wire.
    pub(crate) fn from_fields(format: RowFormat, fields: Vec<ColumnDef>) -> Self {
        let columns = Arc::new(ColumnInfo::new(
            fields.iter().map(|f| f.name.clone()).collect(),
        ));
        Self {
            format,
            fields,
            columns,
            status: OkPacket::default(),
            exhausted: false,
        }
    }

    /// Consume one row-stream message. `Ok(None)` marks the end.
    pub(crate) fn accept(&mut self, payload: &[u8]) -> Result<Option<Row>> {
        match classify_row(self.format, &self.fields, payload) {
            Ok(RowMessage::Row(values)) => Ok(Some(Row::with_columns(self.columns.clone(), values))),
            Ok(RowMessage::End(ok)) => {
                self.status = ok;
                self.exhausted = true;
                Ok(None)
            }
            Err(e) => {
                if matches!(e, Error::Server(_)) {
                    self.exhausted = true;
                }
                Err(e)
            }
        }
    }

    pub fn fields(&self) -> &[ColumnDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// Rows changed by the command. Zero for row-returning statements.
    pub fn affected_rows(&self) -> u64 {
        self.status.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.status.last_insert_id
    }

    /// Warning count. For rows, known once exhausted.
    pub fn warnings(&self) -> u16 {
        self.status.warnings
    }

    pub fn status_flags(&self) -> u16 {
        self.status.status_flags
    }

    /// Human-readable info string from the OK packet, often empty.
    pub fn info(&self) -> &str {
        &self.status.info
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Rows of one command on a blocking channel.
#[derive(Debug)]
pub struct Resultset<'c, S: Transport> {
    channel: &'c mut Channel<S>,
    cursor: RowCursor,
}

impl<'c, S: Transport> Resultset<'c, S> {
    pub(crate) fn new(channel: &'c mut Channel<S>, cursor: RowCursor) -> Self {
        if !cursor.is_exhausted() {
            channel.core.state = ChannelState::ReadingRows;
        }
        Self { channel, cursor }
    }

    /// Next row, or `None` once the resultset is exhausted.
    ///
    /// Calling again after exhaustion keeps returning `None`.
    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        self.channel.core.check_usable()?;
        let payload = self.channel.read_message()?;
        match self.cursor.accept(&payload) {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.channel.finish_rows(self.cursor.status_flags());
                Ok(None)
            }
            Err(e) => Err(self.channel.core.fail(e)),
        }
    }

    /// All remaining rows.
    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Read and discard the remaining rows.
    pub fn complete(&mut self) -> Result<()> {
        while self.fetch_one()?.is_some() {}
        Ok(())
    }

    pub fn cursor(&self) -> &RowCursor {
        &self.cursor
    }

    pub fn fields(&self) -> &[ColumnDef] {
        self.cursor.fields()
    }

    pub fn field_count(&self) -> usize {
        self.cursor.field_count()
    }

    pub fn affected_rows(&self) -> u64 {
        self.cursor.affected_rows()
    }

    pub fn last_insert_id(&self) -> u64 {
        self.cursor.last_insert_id()
    }

    pub fn warnings(&self) -> u16 {
        self.cursor.warnings()
    }

    pub fn status_flags(&self) -> u16 {
        self.cursor.status_flags()
    }

    pub fn info(&self) -> &str {
        self.cursor.info()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }
}

/// Rows of one command on an async channel.
#[derive(Debug)]
pub struct AsyncResultset<'c, S: AsyncTransport> {
    channel: &'c mut AsyncChannel<S>,
    cursor: RowCursor,
}

impl<'c, S: AsyncTransport> AsyncResultset<'c, S> {
    pub(crate) fn new(channel: &'c mut AsyncChannel<S>, cursor: RowCursor) -> Self {
        if !cursor.is_exhausted() {
            channel.core.state = ChannelState::ReadingRows;
        }
        Self { channel, cursor }
    }

    /// Next row, or `None` once the resultset is exhausted.
    pub async fn fetch_one(&mut self, cx: &Cx) -> Outcome<Option<Row>, Error> {
        if self.cursor.is_exhausted() {
            return Outcome::Ok(None);
        }
        if let Err(e) = self.channel.core.check_usable() {
            return Outcome::Err(e);
        }
        let payload = match self.channel.read_message(cx).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.cursor.accept(&payload) {
            Ok(Some(row)) => Outcome::Ok(Some(row)),
            Ok(None) => {
                self.channel.finish_rows(self.cursor.status_flags());
                Outcome::Ok(None)
            }
            Err(e) => Outcome::Err(self.channel.core.fail(e)),
        }
    }

    pub async fn fetch_all(&mut self, cx: &Cx) -> Outcome<Vec<Row>, Error> {
        let mut rows = Vec::new();
        loop {
            match self.fetch_one(cx).await {
                Outcome::Ok(Some(row)) => rows.push(row),
                Outcome::Ok(None) => return Outcome::Ok(rows),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
    }

    pub async fn complete(&mut self, cx: &Cx) -> Outcome<(), Error> {
        loop {
            match self.fetch_one(cx).await {
                Outcome::Ok(Some(_)) => {}
                Outcome::Ok(None) => return Outcome::Ok(()),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
    }

    pub fn cursor(&self) -> &RowCursor {
        &self.cursor
    }

    pub fn fields(&self) -> &[ColumnDef] {
        self.cursor.fields()
    }

    pub fn field_count(&self) -> usize {
        self.cursor.field_count()
    }

    pub fn affected_rows(&self) -> u64 {
        self.cursor.affected_rows()
    }

    pub fn last_insert_id(&self) -> u64 {
        self.cursor.last_insert_id()
    }

    pub fn warnings(&self) -> u16 {
        self.cursor.warnings()
    }

    pub fn status_flags(&self) -> u16 {
        self.cursor.status_flags()
    }

    pub fn info(&self) -> &str {
        self.cursor.info()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::test_server::{eof_packet, err_packet, ok_packet};
    use crate::protocol::Deserialize;
    use crate::types::{FieldType, encode};
    use mysqlwire_core::Value;

    fn ok(affected: u64, id: u64) -> OkPacket {
        OkPacket::from_payload(&ok_packet(affected, id)).unwrap()
    }

    #[test]
    fn test_ok_shape() {
        let cursor = RowCursor::from_ok(ok(2, 9));
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.field_count(), 0);
        assert!(cursor.fields().is_empty());
        assert!(cursor.columns().is_empty());
        assert_eq!(cursor.affected_rows(), 2);
        assert_eq!(cursor.last_insert_id(), 9);
    }

    #[test]
    fn test_rows_shape() {
        let mut cursor = RowCursor::from_fields(
            RowFormat::Text,
            vec![
                ColumnDef::new("id", FieldType::LongLong),
                ColumnDef::new("name", FieldType::VarString),
            ],
        );
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.field_count(), 2);

        let row = cursor
            .accept(&encode::text_row(&[Some("5"), Some("ada")]))
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Int64(5)));
        assert_eq!(row.get_by_name("name"), Some(&Value::from("ada")));

        assert!(cursor.accept(&eof_packet(1)).unwrap().is_none());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.warnings(), 1);
        assert_eq!(cursor.status_flags(), 0x0022);
    }

    #[test]
    fn test_server_error_ends_rows() {
        let mut cursor =
            RowCursor::from_fields(RowFormat::Text, vec![ColumnDef::new("a", FieldType::Long)]);
        let err = cursor
            .accept(&err_packet(1317, "70100", "Query execution was interrupted"))
            .unwrap_err();
        assert_eq!(err.server_code(), Some(1317));
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_decode_error_keeps_cursor_open() {
        let mut cursor =
            RowCursor::from_fields(RowFormat::Text, vec![ColumnDef::new("a", FieldType::Long)]);
        assert!(cursor.accept(&encode::text_row(&[Some("x")])).is_err());
        assert!(!cursor.is_exhausted());
    }
}
